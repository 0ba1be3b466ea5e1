//! # mailsource-mime
//!
//! Representation of a retrieved mail message as the mail source sees it.
//!
//! ## Features
//!
//! - **Lenient parsing**: Split a raw RFC 5322 message into ordered headers
//!   and a body kept as raw bytes in the store's native encoding
//! - **Transfer decoding**: Base64 and Quoted-Printable bodies
//! - **Header words**: RFC 2047 encoded-word decoding in any known charset
//! - **Addresses**: `To`/`Cc`/`Bcc` address-list parsing with groups,
//!   quoted display names and comments
//! - **Charsets**: Label lookup and decoding through `encoding_rs`
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailsource_mime::Message;
//!
//! let raw = b"From: sender@example.com\r\n\
//!             To: Alice <alice@example.com>, bob@example.com\r\n\
//!             Subject: Test\r\n\
//!             \r\n\
//!             Hello, World!";
//!
//! let message = Message::parse(raw);
//! let to = message.addresses("to")?;
//! assert_eq!(to[0].to_string(), "Alice <alice@example.com>");
//! assert_eq!(message.decoded_body()?, b"Hello, World!");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod content_type;
mod error;
mod header;
mod message;

pub mod charset;
pub mod encoding;

pub use address::{Mailbox, parse_address_list};
pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Message, TransferEncoding};
