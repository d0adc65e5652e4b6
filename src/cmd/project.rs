//! Project initialization command.

use anyhow::Result;
use console::style;
use std::path::Path;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use specflow::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "{} Initialized specflow project at {}",
            style("✓").green(),
            result.specflow_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .specflow/");
        println!("  ├── specflow.toml  # Project configuration");
        println!("  └── logs/          # Diagnostic logs");
        println!("  specs/             # Spec documents");
        println!();
        println!("Next steps:");
        println!("  1. Set GITHUB_TOKEN to enable issue sync");
        println!("  2. Run `specflow create \"<name>\"` to start a spec");
    } else {
        println!(
            "specflow project already initialized at {}",
            result.specflow_dir.display()
        );
        if result.config_written {
            println!("Wrote missing specflow.toml with defaults.");
        }
        println!("Directory structure verified.");
    }

    Ok(())
}
