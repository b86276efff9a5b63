//! Logging setup: compact stdout output plus a plain-text copy in the
//! experiment directory.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*};

pub const LOG_FILE: &str = "log.log";

/// Install the global subscriber. With `log_dir`, records are also appended
/// to `<log_dir>/log.log`.
pub fn init_logging(log_dir: Option<&Path>, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let file_layer = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let file = File::options()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(level)
        .with(fmt::layer().compact().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}
