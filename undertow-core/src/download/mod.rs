//! Per-download state: request groups, piece bookkeeping, and results.

pub mod context;
pub mod piece_store;
pub mod request_group;

use std::net::SocketAddr;
use std::time::Duration;

pub use context::DownloadContext;
pub use piece_store::PieceStore;
pub use request_group::RequestGroup;

use crate::engine::Cuid;

/// Errors surfaced by download commands.
///
/// Each variant maps onto a [`DownloadOutcome`] recorded against the URI
/// that was being fetched when the command failed.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// No address resolved for the URI host
    #[error("no address resolved for {host}")]
    Dns {
        /// Host name that failed to resolve
        host: String,
    },

    /// TCP SYN deadline exceeded
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Endpoint that did not answer
        addr: SocketAddr,
        /// Deadline that expired
        timeout: Duration,
    },

    /// Response or read deadline exceeded
    #[error("transfer deadline exceeded for {uri}")]
    Timeout {
        /// URI being fetched
        uri: String,
    },

    /// Server reported 404 or equivalent
    #[error("resource not found: {uri}")]
    ResourceNotFound {
        /// URI that was not found
        uri: String,
    },

    /// Unexpected handshake or invalid proxy method
    #[error("protocol error: {reason}")]
    Protocol {
        /// What the remote (or configuration) got wrong
        reason: String,
    },

    /// Socket-level failure
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Halt requested externally
    #[error("download aborted")]
    Abort,
}

impl DownloadError {
    /// Maps the error onto the outcome recorded for the failing URI.
    pub fn outcome(&self) -> DownloadOutcome {
        match self {
            DownloadError::Dns { .. } => DownloadOutcome::DnsFailure,
            DownloadError::ConnectTimeout { .. } => DownloadOutcome::ConnectTimeout,
            DownloadError::Timeout { .. } => DownloadOutcome::TimeOut,
            DownloadError::ResourceNotFound { .. } => DownloadOutcome::ResourceNotFound,
            DownloadError::Protocol { .. } => DownloadOutcome::ProtocolError,
            DownloadError::Network(_) => DownloadOutcome::UnknownError,
            DownloadError::Abort => DownloadOutcome::Abort,
        }
    }
}

/// Classified outcome of fetching one URI, and of a whole download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Payload fully retrieved and verified
    Finished,
    /// Response or read deadline exceeded
    TimeOut,
    /// Server reported the resource missing
    ResourceNotFound,
    /// Host name did not resolve
    DnsFailure,
    /// TCP establishment timed out
    ConnectTimeout,
    /// Handshake or proxy negotiation failed
    ProtocolError,
    /// Halt requested externally
    Abort,
    /// Catch-all when no more specific class applies
    UnknownError,
}

/// One URI attempt and how it ended.
///
/// Records are insertion-ordered within a request group; the same URI may
/// appear more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriResult {
    /// The URI that was attempted
    pub uri: String,
    /// How the attempt ended
    pub outcome: DownloadOutcome,
}

/// A server discovered during connection initiation.
///
/// The id equals the cuid of the command that discovered the host, tying
/// registry entries back to the scheduler's audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHost {
    /// Cuid of the discovering command
    pub id: Cuid,
    /// Host name as it appeared in the URI
    pub hostname: String,
}

impl ServerHost {
    /// Creates a registry entry for a discovered host.
    pub fn new(id: Cuid, hostname: impl Into<String>) -> Self {
        Self {
            id,
            hostname: hostname.into(),
        }
    }
}

/// Final rollup of one logical download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    /// Destination path (possibly `[MEMORY]`-prefixed)
    pub file_path: String,
    /// Total payload length in bytes
    pub total_length: u64,
    /// First remaining URI, or empty when none remain
    pub uri: String,
    /// Count of remaining URIs
    pub num_uri: usize,
    /// Bytes downloaded during this session
    pub session_download_length: u64,
    /// Wall-clock session duration
    pub session_time: Duration,
    /// Overall outcome per the rollup rule
    pub result: DownloadOutcome,
}
