//! Undertow Core - command-scheduled multi-source download engine
//!
//! This crate provides the concurrency core of a multi-protocol download
//! engine: a cooperative, single-threaded command scheduler, the
//! connection-initiation pipeline for HTTP origins and proxies, and the
//! admission controller that maintains the outbound BitTorrent peer set.

#![deny(missing_docs)]
#![deny(clippy::missing_errors_doc)]
#![warn(clippy::too_many_lines)]

pub mod clock;
pub mod config;
pub mod download;
pub mod engine;
pub mod http;
pub mod network;
pub mod torrent;
pub mod tracing_setup;
pub mod transfer;

// Re-export main types for convenient access
pub use config::UndertowConfig;
pub use download::{DownloadError, DownloadOutcome, DownloadResult, RequestGroup};
pub use engine::{Command, CommandScope, Cuid, DownloadEngine, EngineContext, Execution};
pub use torrent::{BtRuntime, InfoHash, PeerId};
pub use tracing_setup::init_tracing;

/// Core errors that can bubble up from any Undertow subsystem.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    /// Download-layer errors (DNS, connect, transfer, protocol)
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Human-readable description of the configuration error
        reason: String,
    },

    /// Standard I/O errors from filesystem operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using UndertowError as the error type
pub type Result<T> = std::result::Result<T, UndertowError>;
