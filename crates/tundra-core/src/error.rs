use thiserror::Error;

pub type TundraResult<T> = Result<T, TundraError>;

#[derive(Debug, Error)]
pub enum TundraError {
    /// Part size is not 1 MiB multiplied by a power of two (up to 4 GiB)
    #[error("invalid part size {0}: must be 1 MiB multiplied by a power of two, at most 4 GiB")]
    InvalidPartSize(u64),

    /// A tree hash was requested over zero bytes
    #[error("cannot compute a tree hash over an empty span")]
    EmptySpan,

    #[error("source read failed: {0}")]
    SourceRead(#[source] std::io::Error),

    #[error("sink write failed: {0}")]
    Sink(#[source] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("invalid range {range}: {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TundraError {
    /// Precondition violations are caller bugs and never worth retrying.
    pub fn is_precondition(&self) -> bool {
        matches!(self, TundraError::InvalidPartSize(_) | TundraError::EmptySpan)
    }
}
