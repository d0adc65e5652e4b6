use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cmd;

#[derive(Parser)]
#[command(name = "specflow")]
#[command(version, about = "Spec lifecycle manager with git branches and GitHub issue sync")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Diagnostic log format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Disable GitHub issue sync for this invocation
    #[arg(long, global = true)]
    pub no_sync: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new specflow project
    Init,
    /// Create a spec in the requirements phase
    Create {
        /// Human-readable spec name
        name: String,
        /// Optional longer description for the spec document
        #[arg(short, long)]
        description: Option<String>,
        /// Custom suffix for the spec branch (defaults to the spec name)
        #[arg(long)]
        branch_name: Option<String>,
        /// Do not create a git branch
        #[arg(long)]
        no_branch: bool,
    },
    /// Move a spec to another phase
    Phase {
        /// Spec id or unique prefix (at least 8 characters)
        id: String,
        /// Target phase
        phase: String,
    },
    /// Link a spec to a GitHub issue
    Sync {
        /// Spec id or unique prefix
        id: String,
        /// Report the existing sync record instead of creating an issue
        #[arg(long)]
        no_create: bool,
    },
    /// Show a spec and its sync status
    Show {
        /// Spec id or unique prefix
        id: String,
    },
    /// List all specs
    List,
    /// Delete a spec, its sync records and its document
    Delete {
        /// Spec id or unique prefix
        id: String,
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

/// Install stderr logging plus a daily rolling file under `.specflow/logs`
/// once the project is initialized. The guard must outlive `main`'s work.
fn init_tracing(cli: &Cli, project_dir: &Path) -> Option<WorkerGuard> {
    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let (text, json) = match cli.log_format {
        LogFormat::Text => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    let log_dir = specflow::config::log_dir(project_dir);
    let (file, guard) = if specflow::init::is_initialized(project_dir)
        && std::fs::create_dir_all(&log_dir).is_ok()
    {
        let appender = tracing_appender::rolling::daily(&log_dir, "specflow.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            ),
            Some(guard),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .with(file)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let _log_guard = init_tracing(&cli, &project_dir);

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Create {
            name,
            description,
            branch_name,
            no_branch,
        } => {
            let app = cmd::open_app(&cli, &project_dir)?;
            cmd::cmd_create(
                &app,
                name,
                description.as_deref(),
                branch_name.as_deref(),
                *no_branch,
            )
            .await?
        }
        Commands::Phase { id, phase } => {
            let app = cmd::open_app(&cli, &project_dir)?;
            cmd::cmd_phase(&app, id, phase).await?
        }
        Commands::Sync { id, no_create } => {
            let app = cmd::open_app(&cli, &project_dir)?;
            cmd::cmd_sync(&app, id, !*no_create).await?
        }
        Commands::Show { id } => {
            let app = cmd::open_app(&cli, &project_dir)?;
            cmd::cmd_show(&app, id).await?
        }
        Commands::List => {
            let app = cmd::open_app(&cli, &project_dir)?;
            cmd::cmd_list(&app).await?
        }
        Commands::Delete { id, force } => {
            let app = cmd::open_app(&cli, &project_dir)?;
            cmd::cmd_delete(&app, id, *force).await?
        }
        Commands::Config { command } => {
            cmd::cmd_config(&cli, &project_dir, command.clone())?
        }
    }

    Ok(())
}
