//! JSON-lines transport for output records.

use std::io::{self, Write};

use mailsource_core::{OutputRecord, RecordSink};

/// Writes each record as one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    /// Wraps a writer.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn publish(&mut self, record: &OutputRecord) -> io::Result<()> {
        let line = record.to_json_line().map_err(io::Error::other)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
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
    use mailsource_core::{MailSourceFlow, MailSourceProperties};

    #[test]
    fn test_one_line_per_record() {
        let flow =
            MailSourceFlow::configure(&MailSourceProperties::new("imap://u:p@localhost")).unwrap();
        let mut out = Vec::new();
        {
            let mut sink = JsonLinesSink::new(&mut out);
            for to in ["a@example.com", "b@example.com"] {
                let raw = format!("To: {to}\r\nSubject: hi\r\n\r\nbody\r\n");
                assert!(flow.dispatch(raw.as_bytes(), &mut sink).unwrap());
            }
        }
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["payload"], "body\r\n");
        assert_eq!(first["headers"]["to"], serde_json::json!(["a@example.com"]));
        assert_eq!(first["headers"]["cc"], serde_json::json!([]));
        assert_eq!(first["headers"]["subject"], "hi");
    }
}
