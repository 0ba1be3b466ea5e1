//! Output records and the sink they are published to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

/// One retrieved message, normalized for downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Decoded body text.
    pub payload: String,
    /// Normalized headers.
    pub headers: RecordHeaders,
}

/// Headers attached to an [`OutputRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordHeaders {
    /// `to`, `cc` and `bcc`, always present.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// Sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Subject, encoded words decoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// `Message-ID` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// `Date` header as sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// When the mail source produced the record.
    pub received_at: DateTime<Utc>,
}

impl OutputRecord {
    /// Serializes the record as a single JSON line (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Destination for output records.
pub trait RecordSink {
    /// Publishes one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be delivered.
    fn publish(&mut self, record: &OutputRecord) -> std::io::Result<()>;
}

impl RecordSink for Vec<OutputRecord> {
    fn publish(&mut self, record: &OutputRecord) -> std::io::Result<()> {
        self.push(record.clone());
        Ok(())
    }
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
    use chrono::TimeZone;

    fn record() -> OutputRecord {
        OutputRecord {
            payload: "foo\r\n".into(),
            headers: RecordHeaders {
                envelope: Envelope {
                    to: vec!["a@example.com".into()],
                    cc: vec![],
                    bcc: vec![],
                },
                from: Some("Sender <s@example.com>".into()),
                subject: None,
                message_id: Some("<1@example.com>".into()),
                date: None,
                received_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            },
        }
    }

    #[test]
    fn test_json_shape() {
        let value: serde_json::Value = serde_json::from_str(&record().to_json_line().unwrap()).unwrap();
        assert_eq!(value["payload"], "foo\r\n");
        let headers = &value["headers"];
        assert_eq!(headers["to"], serde_json::json!(["a@example.com"]));
        assert_eq!(headers["cc"], serde_json::json!([]));
        assert_eq!(headers["bcc"], serde_json::json!([]));
        assert_eq!(headers["from"], "Sender <s@example.com>");
        assert_eq!(headers["message-id"], "<1@example.com>");
        assert_eq!(headers["received-at"], "2024-05-01T12:00:00Z");
        assert!(headers.get("subject").is_none());
    }

    #[test]
    fn test_json_line_round_trip() {
        let line = record().to_json_line().unwrap();
        assert!(!line.contains('\n'));
        let back: OutputRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back, record());
    }

    #[test]
    fn test_vec_sink() {
        let mut sink = Vec::new();
        sink.publish(&record()).unwrap();
        assert_eq!(sink.len(), 1);
    }
}
