//! Configuration for keystone sessions.
//!
//! Settings persist to disk as RON, tolerate missing and unknown fields, and
//! can be overridden from the command line via clap.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, NetworkConfig, SessionConfig, SpawnerConfig, default_config_dir,
};
pub use error::ConfigError;
