//! Error types for store access.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to a mail store.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// The transport profile or options cannot be used.
    #[error("Configuration error: {0}")]
    Config(#[from] mailsource_core::Error),

    /// IMAP server returned NO.
    #[error("Server returned NO: {0}")]
    No(String),

    /// IMAP server returned BAD.
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// IMAP server sent BYE.
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// POP3 server returned -ERR.
    #[error("Server returned -ERR: {0}")]
    Pop3(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The server lacks a capability the strategy needs.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
