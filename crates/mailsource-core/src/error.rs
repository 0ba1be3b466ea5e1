//! Error types for the mail source core.
//!
//! Two taxonomies are kept apart: [`Error`] aborts startup, while
//! [`MessageError`] only ever costs the one message it was raised for.

use thiserror::Error;

/// Startup errors. Any of these stops the flow before it starts running.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The store URL scheme is not imap, imaps, pop3 or pop3s.
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Options that cannot be combined for the chosen protocol.
    #[error("Incompatible options: {0}")]
    IncompatibleOptions(String),

    /// The store URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A protocol property or option has a value that cannot be used.
    #[error("Invalid property {key}: {reason}")]
    InvalidProperty {
        /// Property or option name.
        key: String,
        /// What was wrong with the value.
        reason: String,
    },
}

impl Error {
    /// Creates an invalid-property error.
    #[must_use]
    pub fn invalid_property(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using the startup [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Per-message errors. The message is dropped and the flow keeps running.
#[derive(Debug, Error)]
pub enum MessageError {
    /// An address header could not be parsed.
    #[error("Malformed address in {header}: {reason}")]
    MalformedAddress {
        /// Header the address came from.
        header: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The charset used to decode the payload is unknown.
    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),

    /// Any other message representation failure (bad transfer encoding).
    #[error("Message error: {0}")]
    Mime(mailsource_mime::Error),
}

impl From<mailsource_mime::Error> for MessageError {
    fn from(err: mailsource_mime::Error) -> Self {
        match err {
            mailsource_mime::Error::MalformedAddress { header, reason } => {
                Self::MalformedAddress { header, reason }
            }
            mailsource_mime::Error::UnsupportedCharset(label) => Self::UnsupportedCharset(label),
            other => Self::Mime(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_errors_map_to_message_taxonomy() {
        let err: MessageError = mailsource_mime::Error::malformed_address("Cc", "missing '@'").into();
        assert!(matches!(err, MessageError::MalformedAddress { ref header, .. } if header == "Cc"));

        let err: MessageError = mailsource_mime::Error::UnsupportedCharset("x-bogus".into()).into();
        assert!(matches!(err, MessageError::UnsupportedCharset(ref c) if c == "x-bogus"));

        let err: MessageError = mailsource_mime::Error::InvalidEncoding("bad".into()).into();
        assert!(matches!(err, MessageError::Mime(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::invalid_property("mail.debug", "expected true or false").to_string(),
            "Invalid property mail.debug: expected true or false"
        );
        assert_eq!(
            Error::UnsupportedProtocol("smtp".into()).to_string(),
            "Unsupported protocol: smtp"
        );
    }
}
