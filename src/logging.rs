/*!
 * Logging setup for the plugin host
 *
 * One subscriber is installed per process. Records go either to stdout in
 * compact form or, when `[log] file` is set, as JSON lines appended to that
 * file. Proxy lifecycle events come from `plugin_connect`, so the default
 * filter covers both crates.
 */

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LogConfig;
use crate::error::{HostError, Result};

/// Directive used when `RUST_LOG` is not set
pub fn default_directive(level: Level) -> String {
    format!("plugin_host={level},plugin_connect={level}")
}

/// `--debug` wins over the configured level.
fn effective_level(config: &LogConfig, debug: bool) -> Level {
    if debug {
        Level::DEBUG
    } else {
        config.level.to_tracing_level()
    }
}

fn build_filter(level: Level) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directive(level))
            .map_err(|e| HostError::Config(format!("Invalid log filter: {}", e))),
    }
}

/// Log files survive restarts: records are appended, never truncated.
fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| HostError::Config(format!("Failed to open log file {:?}: {}", path, e)))
}

/// Install the process-wide subscriber described by `[log]`
pub fn init_logging(config: &LogConfig, debug: bool) -> Result<()> {
    let filter = build_filter(effective_level(config, debug))?;
    let log_file = config.file.as_deref().map(open_log_file).transpose()?;

    let file_layer = log_file.map(|file| {
        fmt::layer()
            .json()
            .with_writer(Arc::new(file))
            .with_ansi(false)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
    });
    let stdout_layer = file_layer
        .is_none()
        .then(|| fmt::layer().compact().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| HostError::Config(format!("Logging already initialised: {}", e)))
}

#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::new(default_directive(Level::DEBUG)))
            .with(fmt::layer().with_test_writer().compact())
            .try_init();
    });
}
