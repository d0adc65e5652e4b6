pub mod app;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod errors;
pub mod events;
pub mod init;
pub mod remote;
pub mod store;
pub mod sync;
pub mod util;
pub mod vcs;

#[cfg(test)]
mod testing;

pub use app::App;
pub use errors::{Result, SpecError};
