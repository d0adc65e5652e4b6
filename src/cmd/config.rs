//! Configuration view and validation commands: `specflow config`.

use anyhow::{Context, Result};
use std::path::Path;

use specflow::config::SpecflowConfig;
use specflow_common::Phase;

use crate::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let sync = cli.no_sync.then_some(false);
    let config = SpecflowConfig::with_cli_args(project_dir.to_path_buf(), sync)?;
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("specflow configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No specflow.toml found at {}", config_path.display());
                println!("Using default configuration. Run 'specflow init' to create one.");
            }
            println!();

            let rendered =
                toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  specs_dir = \"{}\"", config.specs_dir().display());
            println!("  database = \"{}\"", config.database_path().display());
            println!("  sync_enabled = {}", config.sync_enabled());
            match config.github_repo() {
                Some(repo) => println!("  github_repo = \"{}\"", repo),
                None => println!("  github_repo = (from origin remote)"),
            }
            println!(
                "  {} = {}",
                config.toml.github.token_env,
                if config.github_token().is_some() {
                    "set"
                } else {
                    "unset"
                }
            );
            for phase in Phase::all() {
                println!("  label[{}] = \"{}\"", phase, config.phase_label(*phase));
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No specflow.toml found. Using defaults.");
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
