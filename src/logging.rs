// src/logging.rs
//
// Tracing setup for embedding hosts. Installed once per process: stderr
// always, plus a file layer when the config names a log file. The level
// filter sits behind a reload layer so it can change while nodes run.

use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::sync::{Arc, Once};

use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::error::{Result, StoreError};
use crate::node::{LogFormat, LogLevel, NodeConfig};

static TRACING_INIT: Once = Once::new();
static FILTER_HANDLE: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

/// Install the global subscriber from the first config seen. A subscriber
/// already installed by the host is left alone.
pub fn init(config: &NodeConfig) {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
        let (filter_layer, handle) = reload::Layer::new(filter);

        let ansi = match config.log_format {
            LogFormat::Auto => std::io::stderr().is_terminal(),
            LogFormat::Colors => true,
            LogFormat::NoColors => false,
        };
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_thread_names(true)
            .with_ansi(ansi);

        let file_layer = config.log_file.as_ref().and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(
                    fmt::layer()
                        .with_writer(Arc::new(file))
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_ansi(false),
                ),
                Err(e) => {
                    eprintln!("codex: cannot open log file {}: {e}", path.display());
                    None
                }
            }
        });

        let installed = tracing_subscriber::registry()
            .with(filter_layer)
            .with(stderr_layer)
            .with(file_layer)
            .try_init();

        if installed.is_ok() {
            let _ = FILTER_HANDLE.set(handle);
            tracing::debug!(level = %config.log_level, "tracing initialized");
        }
    });
}

/// Swap the active level filter.
pub fn set_level(level: LogLevel) -> Result<()> {
    let handle = FILTER_HANDLE
        .get()
        .ok_or_else(|| StoreError::config("logging is not managed by this library"))?;
    handle
        .reload(EnvFilter::new(level.as_filter()))
        .map_err(|e| StoreError::config(format!("cannot change log level: {e}")))?;
    tracing::info!(%level, "log level changed");
    Ok(())
}
