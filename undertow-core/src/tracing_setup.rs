//! Tracing setup for the download engine.
//!
//! The engine narrates connection initiation and peer admission at info
//! level and everything else at debug. The console shows a compact feed
//! for the operator; a per-run debug log can additionally be kept on
//! disk for postmortems of long downloads.

use std::fs::{File, create_dir_all};
use std::path::Path;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Environment variable holding console filter directives, e.g.
/// `UNDERTOW_LOG=undertow_core::torrent=debug`.
const LOG_ENV: &str = "UNDERTOW_LOG";

/// Per-run debug log written inside the logs directory.
const LOG_FILE: &str = "engine.log";

/// Initializes tracing for an engine run.
///
/// The console filter comes from [`LOG_ENV`] when set; otherwise only
/// this crate's events at `console_level` and above are shown, so an
/// embedding application's own targets stay quiet. When `logs_dir` is
/// given, a full debug log of the run is also written to
/// `<logs_dir>/engine.log`, overwriting the previous run; with `None`
/// nothing touches the filesystem.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - the logs directory could not be
///   created or the log file could not be opened for writing
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let console_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("undertow_core={console_level}")));

    let console_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = match logs_dir {
        Some(dir) => {
            create_dir_all(dir)?;
            let log_file = File::create(dir.join(LOG_FILE))?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(log_file)
                .with_filter(EnvFilter::new("debug"));
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::debug!("tracing initialized at {console_level}");
    Ok(())
}
