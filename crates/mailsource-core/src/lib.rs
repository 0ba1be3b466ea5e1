//! # mailsource-core
//!
//! Decides how a mail store is reached and turns retrieved messages into
//! output records.
//!
//! This crate provides:
//! - Store URL parsing ([`StoreUrl`])
//! - Transport profiles per protocol, with operator overrides
//!   ([`TransportProfile`])
//! - Retrieval strategy selection: IMAP poll, POP3 poll or IMAP idle
//!   ([`select`])
//! - Recipient normalization and payload decoding
//! - The [`MailSourceFlow`] that ties them together and publishes to a
//!   [`RecordSink`]
//!
//! Nothing here touches the network.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod envelope;
mod error;
pub mod flow;
pub mod options;
pub mod payload;
pub mod profile;
pub mod record;
pub mod strategy;
pub mod url;

pub use envelope::{AddressField, Envelope, normalize};
pub use error::{Error, MessageError, Result};
pub use flow::MailSourceFlow;
pub use options::{MailSourceProperties, RetrievalOptions, parse_protocol_properties};
pub use profile::{SocketFactory, TransportProfile};
pub use record::{OutputRecord, RecordHeaders, RecordSink};
pub use strategy::{
    DEFAULT_USER_FLAG, ImapRetrieval, Pop3Retrieval, RetrievalStrategy, select,
};
pub use url::{Protocol, StoreUrl};

pub use mailsource_mime::Message;
