//! Recipient header normalization.

use mailsource_mime::Message;
use serde::{Deserialize, Serialize};

use crate::error::MessageError;

/// A recipient header copied into the output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    /// `To`
    To,
    /// `Cc`
    Cc,
    /// `Bcc`
    Bcc,
}

/// Source header name and record key for each recipient field.
const FIELDS: [(AddressField, &str, &str); 3] = [
    (AddressField::To, "To", "to"),
    (AddressField::Cc, "Cc", "cc"),
    (AddressField::Bcc, "Bcc", "bcc"),
];

impl AddressField {
    /// Message header the field is read from.
    #[must_use]
    pub fn header(self) -> &'static str {
        FIELDS
            .iter()
            .find(|(field, ..)| *field == self)
            .map_or("", |(_, header, _)| header)
    }

    /// Key the field is written under in the record headers.
    #[must_use]
    pub fn key(self) -> &'static str {
        FIELDS
            .iter()
            .find(|(field, ..)| *field == self)
            .map_or("", |(.., key)| key)
    }
}

/// Recipient lists of one message. Every list is present, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// `To` recipients in message order.
    pub to: Vec<String>,
    /// `Cc` recipients in message order.
    pub cc: Vec<String>,
    /// `Bcc` recipients in message order.
    pub bcc: Vec<String>,
}

impl Envelope {
    /// The list for one field.
    #[must_use]
    pub fn field(&self, field: AddressField) -> &[String] {
        match field {
            AddressField::To => &self.to,
            AddressField::Cc => &self.cc,
            AddressField::Bcc => &self.bcc,
        }
    }

    fn field_mut(&mut self, field: AddressField) -> &mut Vec<String> {
        match field {
            AddressField::To => &mut self.to,
            AddressField::Cc => &mut self.cc,
            AddressField::Bcc => &mut self.bcc,
        }
    }
}

/// Reads the `To`, `Cc` and `Bcc` headers of `message` into ordered
/// address strings.
///
/// # Errors
///
/// Returns [`MessageError::MalformedAddress`] if any of them fails to parse.
pub fn normalize(message: &Message) -> Result<Envelope, MessageError> {
    let mut envelope = Envelope::default();
    for (field, header, _) in FIELDS {
        *envelope.field_mut(field) = message
            .addresses(header)?
            .iter()
            .map(ToString::to_string)
            .collect();
    }
    Ok(envelope)
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

    #[test]
    fn test_field_table() {
        assert_eq!(AddressField::To.header(), "To");
        assert_eq!(AddressField::Cc.key(), "cc");
        assert_eq!(AddressField::Bcc.header(), "Bcc");
    }

    #[test]
    fn test_missing_fields_are_empty_lists() {
        let raw = "To: a@example.com\r\nBcc: b@example.com, c@example.com\r\n\r\nbody";
        let envelope = normalize(&Message::parse(raw.as_bytes())).unwrap();
        assert_eq!(
            envelope,
            Envelope {
                to: vec!["a@example.com".into()],
                cc: vec![],
                bcc: vec!["b@example.com".into(), "c@example.com".into()],
            }
        );

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["cc"], serde_json::json!([]));
    }

    #[test]
    fn test_display_names_kept() {
        let raw = "Cc: \"Smith, Bob\" <bob@example.com>, Eve <eve@example.com>\r\n\r\n";
        let envelope = normalize(&Message::parse(raw.as_bytes())).unwrap();
        assert_eq!(
            envelope.field(AddressField::Cc),
            ["\"Smith, Bob\" <bob@example.com>", "Eve <eve@example.com>"]
        );
        assert!(envelope.to.is_empty());
    }

    #[test]
    fn test_malformed_address() {
        let raw = "To: ok@example.com\r\nCc: not an address\r\n\r\n";
        let err = normalize(&Message::parse(raw.as_bytes())).unwrap_err();
        assert!(matches!(err, MessageError::MalformedAddress { ref header, .. } if header == "Cc"));
    }
}
