//! Protocol error types.

/// A protocol failure. The scheduler treats every one as fatal: once the
/// stream is out of sync there is nothing safe to resume from.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The underlying transport failed.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// A packet could not be decoded.
    #[error("malformed packet: {0}")]
    Decode(String),
}
