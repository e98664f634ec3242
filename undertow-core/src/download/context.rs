//! Static metadata describing one download's payload.

/// Immutable description of the payload a request group is fetching.
#[derive(Debug, Clone)]
pub struct DownloadContext {
    piece_length: u64,
    total_length: u64,
    path: String,
}

impl DownloadContext {
    /// Creates a context for a single-file payload.
    pub fn new(piece_length: u64, total_length: u64, path: impl Into<String>) -> Self {
        Self {
            piece_length,
            total_length,
            path: path.into(),
        }
    }

    /// Length of each verification piece in bytes.
    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    /// Total payload length in bytes.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Destination path for the payload.
    pub fn path(&self) -> &str {
        &self.path
    }
}
