//! A retrieved message: ordered headers plus the raw body.

use crate::address::{Mailbox, parse_address_list};
use crate::content_type::ContentType;
use crate::encoding::{decode_base64, decode_quoted_printable};
use crate::error::Result;
use crate::header::Headers;
use std::fmt;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit text.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses a `Content-Transfer-Encoding` value. Unknown tokens count as
    /// 7bit, the RFC 2045 default.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Binary => "binary",
        })
    }
}

/// A message as fetched from a store.
///
/// The body stays in the store's native bytes; nothing is decoded until a
/// caller asks for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Message headers in wire order.
    pub headers: Headers,
    /// Body bytes after the header/body separator.
    pub body: Vec<u8>,
}

impl Message {
    /// Creates a message from parts.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Splits a raw RFC 5322 message into headers and body.
    ///
    /// Never fails. A message without a blank separator line is all
    /// headers; header bytes that are not UTF-8 are replaced.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let (head, body) = split_header_block(raw);
        Self {
            headers: Headers::parse(&String::from_utf8_lossy(head)),
            body: body.to_vec(),
        }
    }

    /// Gets the content type, or the implicit `text/plain` when the header
    /// is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the `Content-Type` header is present but invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::implicit()), ContentType::parse)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// The charset named by the `Content-Type` header, if any.
    ///
    /// An unparseable `Content-Type` is treated as naming no charset.
    #[must_use]
    pub fn declared_charset(&self) -> Option<String> {
        self.content_type()
            .ok()
            .and_then(|ct| ct.charset().map(str::to_string))
    }

    /// Returns the body with its transfer encoding removed.
    ///
    /// Multipart bodies are returned raw: their parts carry their own
    /// encodings and the boundary structure is part of the content.
    ///
    /// # Errors
    ///
    /// Returns an error if a Base64 or Quoted-Printable body is malformed.
    pub fn decoded_body(&self) -> Result<Vec<u8>> {
        if self.content_type().is_ok_and(|ct| ct.is_multipart()) {
            return Ok(self.body.clone());
        }

        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(&self.body),
            TransferEncoding::QuotedPrintable => decode_quoted_printable(&self.body),
            TransferEncoding::SevenBit | TransferEncoding::EightBit | TransferEncoding::Binary => {
                Ok(self.body.clone())
            }
        }
    }

    /// Parses every header line named `name` as an address list and
    /// concatenates the results in wire order.
    ///
    /// A missing header yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedAddress`] if any line fails to parse.
    pub fn addresses(&self, name: &str) -> Result<Vec<Mailbox>> {
        let mut mailboxes = Vec::new();
        for value in self.headers.get_all(name) {
            mailboxes.extend(parse_address_list(name, value)?);
        }
        Ok(mailboxes)
    }
}

/// Splits at the first blank line, accepting CRLF or bare LF endings.
fn split_header_block(raw: &[u8]) -> (&[u8], &[u8]) {
    if raw.starts_with(b"\r\n") {
        return (&[], &raw[2..]);
    }
    if raw.starts_with(b"\n") {
        return (&[], &raw[1..]);
    }

    let crlf = find(raw, b"\r\n\r\n").map(|i| (i, 4));
    let lf = find(raw, b"\n\n").map(|i| (i, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match split {
        Some((at, len)) => (&raw[..at], &raw[at + len..]),
        None => (raw, &[]),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
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
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse(" quoted-printable "),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("x-uuencode"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::QuotedPrintable.to_string(), "quoted-printable");
    }

    #[test]
    fn test_parse_simple() {
        let raw = b"From: a@example.com\r\nTo: b@example.com\r\nSubject: Hi\r\n\r\nfoo\r\n\r\n";
        let message = Message::parse(raw);
        assert_eq!(message.headers.len(), 3);
        assert_eq!(message.headers.get("subject"), Some("Hi"));
        assert_eq!(message.body, b"foo\r\n\r\n");
    }

    #[test]
    fn test_parse_bare_lf() {
        let message = Message::parse(b"Subject: x\n\nbody\n");
        assert_eq!(message.headers.get("subject"), Some("x"));
        assert_eq!(message.body, b"body\n");
    }

    #[test]
    fn test_parse_without_body() {
        let message = Message::parse(b"Subject: only headers\r\n");
        assert_eq!(message.headers.len(), 1);
        assert!(message.body.is_empty());
    }

    #[test]
    fn test_parse_without_headers() {
        let message = Message::parse(b"\r\njust a body");
        assert!(message.headers.is_empty());
        assert_eq!(message.body, b"just a body");
    }

    #[test]
    fn test_parse_keeps_native_body_bytes() {
        let raw = b"Content-Type: text/plain; charset=windows-1251\r\n\r\n\xCF\xF0\xE8";
        let message = Message::parse(raw);
        assert_eq!(message.body, vec![0xCF, 0xF0, 0xE8]);
        assert_eq!(message.declared_charset().as_deref(), Some("windows-1251"));
    }

    #[test]
    fn test_content_type_default() {
        let message = Message::parse(b"Subject: x\r\n\r\nbody");
        assert_eq!(message.content_type().unwrap(), ContentType::implicit());
        assert_eq!(message.declared_charset(), None);
    }

    #[test]
    fn test_decoded_body_base64() {
        let raw = b"Content-Transfer-Encoding: base64\r\n\r\nSGVsbG8s\r\nIFdvcmxkIQ==\r\n";
        assert_eq!(Message::parse(raw).decoded_body().unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_decoded_body_quoted_printable() {
        let raw = b"Content-Transfer-Encoding: quoted-printable\r\n\r\ncaf=C3=A9=\r\n!";
        assert_eq!(Message::parse(raw).decoded_body().unwrap(), "café!".as_bytes());
    }

    #[test]
    fn test_decoded_body_malformed_base64() {
        let raw = b"Content-Transfer-Encoding: base64\r\n\r\n!!!not base64";
        assert!(Message::parse(raw).decoded_body().is_err());
    }

    #[test]
    fn test_decoded_body_multipart_is_raw() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=b\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "--b\r\nContent-Type: text/plain\r\n\r\nhi\r\n--b--\r\n"
        );
        let message = Message::parse(raw.as_bytes());
        assert_eq!(message.decoded_body().unwrap(), message.body);
    }

    #[test]
    fn test_addresses_across_repeated_headers() {
        let raw = concat!(
            "To: Alice <alice@example.com>, bob@example.com\r\n",
            "Cc: carol@example.com\r\n",
            "To: dave@example.com\r\n",
            "\r\n",
            "body"
        );
        let message = Message::parse(raw.as_bytes());

        let to: Vec<String> = message
            .addresses("to")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            to,
            vec!["Alice <alice@example.com>", "bob@example.com", "dave@example.com"]
        );
        assert_eq!(message.addresses("cc").unwrap().len(), 1);
        assert!(message.addresses("bcc").unwrap().is_empty());
    }

    #[test]
    fn test_addresses_malformed() {
        let message = Message::parse(b"To: \"broken <a@b.c>\r\n\r\n");
        assert!(message.addresses("To").is_err());
    }
}
