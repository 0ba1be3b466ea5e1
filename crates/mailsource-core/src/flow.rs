//! The mail source flow: configuration at startup, then one record per
//! retrieved message.

use chrono::Utc;
use mailsource_mime::{Message, charset, encoding::decode_rfc2047};
use tracing::{debug, info, warn};

use crate::envelope;
use crate::error::{MessageError, Result};
use crate::options::{MailSourceProperties, RetrievalOptions};
use crate::payload;
use crate::record::{OutputRecord, RecordHeaders, RecordSink};
use crate::strategy::{self, RetrievalStrategy};
use crate::url::StoreUrl;

/// A configured mail source.
///
/// Holding one means startup succeeded. Its methods take `&self` and keep
/// no mutable state, so one flow may serve concurrent retrieval callbacks.
#[derive(Debug, Clone)]
pub struct MailSourceFlow {
    url: StoreUrl,
    strategy: RetrievalStrategy,
    charset: Option<String>,
}

impl MailSourceFlow {
    /// Parses the URL and selects the strategy.
    ///
    /// # Errors
    ///
    /// Any startup [`crate::Error`]: unsupported protocol, bad URL,
    /// incompatible options or an invalid property.
    pub fn configure(properties: &MailSourceProperties) -> Result<Self> {
        let url = StoreUrl::parse(&properties.url)?;
        Self::from_parts(url, &properties.retrieval_options())
    }

    /// Builds a flow from an already parsed URL.
    ///
    /// # Errors
    ///
    /// Same as [`MailSourceFlow::configure`], minus URL errors.
    pub fn from_parts(url: StoreUrl, options: &RetrievalOptions) -> Result<Self> {
        let strategy = strategy::select(&url, options)?;

        if matches!(strategy, RetrievalStrategy::Pop3Poll(_)) {
            let ignored = options.imap_only_options();
            if !ignored.is_empty() {
                warn!(options = ?ignored, "Options have no effect on POP3 and are ignored");
            }
        }

        if let Some(label) = options.charset.as_deref()
            && !charset::is_supported(label)
        {
            warn!(charset = %label, "Unknown charset configured, every message will be dropped");
        }

        info!(url = %url, strategy = strategy.name(), "Mail source configured");

        Ok(Self {
            url,
            strategy,
            charset: options.charset.clone(),
        })
    }

    /// Store URL.
    #[must_use]
    pub const fn url(&self) -> &StoreUrl {
        &self.url
    }

    /// Selected strategy.
    #[must_use]
    pub const fn strategy(&self) -> &RetrievalStrategy {
        &self.strategy
    }

    /// Turns one message into an output record.
    ///
    /// # Errors
    ///
    /// Returns a [`MessageError`] if the payload or recipients cannot be
    /// decoded. Only this message is affected.
    pub fn transform(&self, message: &Message) -> std::result::Result<OutputRecord, MessageError> {
        let payload = payload::decode(message, self.charset.as_deref())?;
        let envelope = envelope::normalize(message)?;

        Ok(OutputRecord {
            payload,
            headers: RecordHeaders {
                envelope,
                from: decoded_header(message, "From"),
                subject: decoded_header(message, "Subject"),
                message_id: message.headers.get("Message-ID").map(str::to_string),
                date: message.headers.get("Date").map(str::to_string),
                received_at: Utc::now(),
            },
        })
    }

    /// Like [`MailSourceFlow::transform`], but logs and drops a message
    /// that fails.
    #[must_use]
    pub fn handle(&self, message: &Message) -> Option<OutputRecord> {
        match self.transform(message) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    message_id = message.headers.get("Message-ID").unwrap_or("<none>"),
                    error = %e,
                    "Dropping message"
                );
                None
            }
        }
    }

    /// Parses a raw message, transforms it and publishes the record once.
    ///
    /// Returns whether a record was published.
    ///
    /// # Errors
    ///
    /// Returns the sink's error. Message errors are logged, not returned.
    pub fn dispatch<S: RecordSink + ?Sized>(&self, raw: &[u8], sink: &mut S) -> std::io::Result<bool> {
        let message = Message::parse(raw);
        let Some(record) = self.handle(&message) else {
            return Ok(false);
        };
        sink.publish(&record)?;
        debug!(bytes = raw.len(), recipients = record.headers.envelope.to.len(), "Record published");
        Ok(true)
    }
}

/// Header value with encoded words decoded, or as sent if they cannot be.
fn decoded_header(message: &Message, name: &str) -> Option<String> {
    message
        .headers
        .get(name)
        .map(|raw| decode_rfc2047(raw).unwrap_or_else(|_| raw.to_string()))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::error::Error;

    const RAW: &str = concat!(
        "From: =?utf-8?Q?J=C3=B6rg?= <joerg@example.com>\r\n",
        "To: Foo <foo@bar.com>\r\n",
        "Cc: a@b.c, d@e.f\r\n",
        "Bcc: bcc@example.com\r\n",
        "Subject: Test Mail\r\n",
        "Message-ID: <42@example.com>\r\n",
        "\r\n",
        "foo\r\n\r\n"
    );

    fn flow(properties: MailSourceProperties) -> MailSourceFlow {
        MailSourceFlow::configure(&properties).unwrap()
    }

    #[test]
    fn test_configure_failures_are_startup_errors() {
        let err = MailSourceFlow::configure(&MailSourceProperties::new("nntp://host")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocol(_)));

        let mut props = MailSourceProperties::new("pop3://host");
        props.idle_imap = true;
        let err = MailSourceFlow::configure(&props).unwrap_err();
        assert!(matches!(err, Error::IncompatibleOptions(_)));
    }

    #[test]
    fn test_pop3_with_imap_options_still_configures() {
        let mut props = MailSourceProperties::new("pop3://host");
        props.mark_as_read = true;
        props.user_flag = Some("done".into());
        let flow = flow(props);
        assert!(matches!(flow.strategy(), RetrievalStrategy::Pop3Poll(_)));
    }

    #[test]
    fn test_transform() {
        let flow = flow(MailSourceProperties::new("imap://localhost/INBOX"));
        let record = flow.transform(&Message::parse(RAW.as_bytes())).unwrap();

        assert!(record.payload.ends_with("foo\r\n\r\n"));
        assert_eq!(record.headers.envelope.to, vec!["Foo <foo@bar.com>"]);
        assert_eq!(record.headers.envelope.cc, vec!["a@b.c", "d@e.f"]);
        assert_eq!(record.headers.envelope.bcc, vec!["bcc@example.com"]);
        assert_eq!(record.headers.from.as_deref(), Some("Jörg <joerg@example.com>"));
        assert_eq!(record.headers.subject.as_deref(), Some("Test Mail"));
        assert_eq!(record.headers.message_id.as_deref(), Some("<42@example.com>"));
        assert_eq!(record.headers.date, None);
    }

    #[test]
    fn test_bad_message_is_dropped_and_flow_keeps_going() {
        let mut props = MailSourceProperties::new("imap://localhost");
        props.charset = Some("x-martian".into());
        let broken = flow(props);
        let good = flow(MailSourceProperties::new("imap://localhost"));

        let mut sink: Vec<OutputRecord> = Vec::new();
        assert!(!broken.dispatch(RAW.as_bytes(), &mut sink).unwrap());
        assert!(!good.dispatch(b"To: nobody\r\n\r\nx", &mut sink).unwrap());
        assert!(good.dispatch(RAW.as_bytes(), &mut sink).unwrap());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_dispatch_publishes_exactly_once() {
        struct Counting(usize);
        impl RecordSink for Counting {
            fn publish(&mut self, _record: &OutputRecord) -> std::io::Result<()> {
                self.0 += 1;
                Ok(())
            }
        }

        let flow = flow(MailSourceProperties::new("imaps://localhost"));
        let mut sink = Counting(0);
        flow.dispatch(RAW.as_bytes(), &mut sink).unwrap();
        assert_eq!(sink.0, 1);
    }

    #[test]
    fn test_sink_error_propagates() {
        struct Broken;
        impl RecordSink for Broken {
            fn publish(&mut self, _record: &OutputRecord) -> std::io::Result<()> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            }
        }

        let flow = flow(MailSourceProperties::new("imap://localhost"));
        let err = flow.dispatch(RAW.as_bytes(), &mut Broken).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_flow_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MailSourceFlow>();
    }
}
