//! Tracing setup.
//!
//! The terminal belongs to the TUI, so log lines only ever go to a file.
//! Filtering follows `DELVIEW_LOG`, then `RUST_LOG`, defaulting to `info`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::domain::DVError;

pub const LOG_ENV: &str = "DELVIEW_LOG";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Without a log file only the span trace
/// layer is installed.
pub fn init(log_file: Option<&Path>) -> Result<(), DVError> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|e| DVError::LoadingFailed(format!("cannot install logger: {e}")))
}
