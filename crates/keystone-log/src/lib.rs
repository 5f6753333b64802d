//! Structured logging for keystone sessions.
//!
//! Console output carries uptime, target and level. Optionally a second
//! layer writes the same events as JSON lines to `keystone.log` so a run of
//! several simulated peers can be inspected afterwards. `RUST_LOG` wins over
//! the configured filter.

use std::path::Path;

use keystone_config::Config;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Name of the JSON log file inside the log directory.
pub const LOG_FILE: &str = "keystone.log";

const DEFAULT_FILTER: &str = "info";

/// Install the global tracing subscriber.
///
/// * `log_dir` - directory for [`LOG_FILE`]; ignored unless `file_logging`
/// * `file_logging` - also write JSON lines to disk
/// * `config` - source of the filter directives (`debug.log_level`)
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_logging(log_dir: Option<&Path>, file_logging: bool, config: Option<&Config>) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let file_layer = match log_dir {
        Some(log_dir) if file_logging => json_file_layer(log_dir),
        _ => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .is_ok()
}

/// Filter directives taken from `config`, or the default when absent or
/// blank.
pub fn filter_directives(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.trim().is_empty() => {
            config.debug.log_level.clone()
        }
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Create an `EnvFilter` with the default filter string.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

/// A JSON-lines layer writing to `log_dir/keystone.log`. `None` if the
/// directory or file cannot be created.
pub fn json_file_layer(log_dir: &Path) -> Option<impl Layer<Registry> + use<>> {
    if let Err(err) = std::fs::create_dir_all(log_dir) {
        eprintln!("file logging disabled, cannot create {}: {err}", log_dir.display());
        return None;
    }
    let log_file = match std::fs::File::create(log_dir.join(LOG_FILE)) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("file logging disabled, cannot create {LOG_FILE}: {err}");
            return None;
        }
    };
    Some(
        fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json(),
    )
}
