//! Error types for MIME parsing and extraction.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An accessor was called before a source was attached.
    #[error("No message has been attached; call one of the attach methods first")]
    NotParsed,

    /// The source is too malformed to establish a header/body split.
    #[error("Structural error: {0}")]
    Structural(String),

    /// Scoped temporary storage could not be created or written.
    #[error("Temporary storage unavailable: {0}")]
    Resource(#[source] std::io::Error),

    /// A caller-supplied argument is outside the accepted set.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid MIME header.
    #[error("Invalid MIME header: {0}")]
    InvalidHeader(String),

    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// I/O error while reading the byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
