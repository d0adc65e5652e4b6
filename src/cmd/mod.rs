//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `project`       | `Init`                                             |
//! | `spec`          | `Create`, `Phase`, `Sync`, `Show`, `List`, `Delete` |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod project;
pub mod spec;

use anyhow::Result;
use std::path::Path;

use specflow::App;
use specflow::config::SpecflowConfig;
use specflow::init::is_initialized;

use crate::Cli;

pub use config::cmd_config;
pub use project::cmd_init;
pub use spec::{cmd_create, cmd_delete, cmd_list, cmd_phase, cmd_show, cmd_sync};

/// Open an initialized project with CLI overrides applied.
pub fn open_app(cli: &Cli, project_dir: &Path) -> Result<App> {
    if !is_initialized(project_dir) {
        anyhow::bail!(
            "No specflow project at {}. Run `specflow init` first.",
            project_dir.display()
        );
    }
    let sync = cli.no_sync.then_some(false);
    let config = SpecflowConfig::with_cli_args(project_dir.to_path_buf(), sync)?;
    App::open(config)
}
