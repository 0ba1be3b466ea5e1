//! # mailsource-store
//!
//! Network side of the mail source: opens plain or TLS connections to an
//! IMAP or POP3 store and retrieves raw messages.
//!
//! This crate provides:
//! - [`connect`] with optional TLS-to-plaintext fallback
//! - Minimal IMAP ([`ImapSession`]) and POP3 ([`Pop3Session`]) clients
//! - One receiver per retrieval strategy ([`Receiver`])
//!
//! ## Example
//!
//! ```ignore
//! use mailsource_core::MailSourceFlow;
//! use mailsource_store::{IdleSettings, Receiver};
//!
//! let flow = MailSourceFlow::configure(&properties)?;
//! let receiver = Receiver::for_strategy(flow.url(), flow.strategy(), IdleSettings::default())?;
//! for raw in receiver.poll(Some(10)).await? {
//!     flow.dispatch(&raw, &mut sink)?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod framed;
pub mod imap;
pub mod pop3;
pub mod receiver;
pub mod stream;

pub use error::{Error, Result};
pub use framed::FramedStream;
pub use imap::{IdleEvent, ImapSession, MailboxStatus};
pub use pop3::{MaildropStat, Pop3Session};
pub use receiver::{
    IdleSettings, ImapIdleReceiver, ImapPollReceiver, Pop3PollReceiver, Receiver,
};
pub use stream::{MailStream, Transport, connect};
