//! Error types for message representation.

/// Result type alias for message operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message representation errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Invalid transfer or header encoding.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// An address header could not be parsed.
    #[error("Malformed address in {header}: {reason}")]
    MalformedAddress {
        /// Header the address came from.
        header: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Charset label not known to the decoder.
    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),
}

impl Error {
    /// Creates a malformed-address error.
    #[must_use]
    pub fn malformed_address(header: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedAddress {
            header: header.into(),
            reason: reason.into(),
        }
    }
}
