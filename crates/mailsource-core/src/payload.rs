//! Payload decoding.

use mailsource_mime::{Message, charset};
use tracing::warn;

use crate::error::MessageError;

/// Decodes the body of `message` to text.
///
/// The body is transfer-decoded first (single-part messages only), then
/// decoded with `charset` if given, else the charset the message declares,
/// else UTF-8. A declared charset that is not known falls back to UTF-8.
///
/// # Errors
///
/// - [`MessageError::UnsupportedCharset`] if `charset` is not known
/// - [`MessageError::Mime`] if the transfer encoding is malformed
pub fn decode(message: &Message, charset: Option<&str>) -> Result<String, MessageError> {
    let body = message.decoded_body()?;

    if let Some(label) = charset {
        return Ok(charset::decode(&body, label)?);
    }

    let label = match message.declared_charset() {
        Some(declared) if charset::is_supported(&declared) => declared,
        Some(declared) => {
            warn!(charset = %declared, "Unknown declared charset, decoding as UTF-8");
            charset::DEFAULT_CHARSET.to_string()
        }
        None => charset::DEFAULT_CHARSET.to_string(),
    };
    Ok(charset::decode(&body, &label)?)
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

    fn message(headers: &str, body: &[u8]) -> Message {
        let mut raw = headers.as_bytes().to_vec();
        raw.extend_from_slice(b"\r\n");
        raw.extend_from_slice(body);
        Message::parse(&raw)
    }

    #[test]
    fn test_default_utf8() {
        let msg = message("Subject: x\r\n", "foo\r\n\r\n".as_bytes());
        assert_eq!(decode(&msg, None).unwrap(), "foo\r\n\r\n");
    }

    #[test]
    fn test_configured_charset_wins() {
        let bytes = [0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2];
        let msg = message("Content-Type: text/plain; charset=utf-8\r\n", &bytes);
        assert_eq!(decode(&msg, Some("cp1251")).unwrap(), "Привет");
    }

    #[test]
    fn test_declared_charset() {
        let msg = message(
            "Content-Type: text/plain; charset=windows-1251\r\n",
            &[0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2],
        );
        assert_eq!(decode(&msg, None).unwrap(), "Привет");
    }

    #[test]
    fn test_unknown_declared_charset_falls_back() {
        let msg = message("Content-Type: text/plain; charset=x-martian\r\n", b"hello");
        assert_eq!(decode(&msg, None).unwrap(), "hello");
    }

    #[test]
    fn test_unknown_configured_charset() {
        let msg = message("Subject: x\r\n", b"hello");
        let err = decode(&msg, Some("x-martian")).unwrap_err();
        assert!(matches!(err, MessageError::UnsupportedCharset(ref c) if c == "x-martian"));
    }

    #[test]
    fn test_transfer_decoded_before_charset() {
        let msg = message(
            "Content-Type: text/plain; charset=iso-8859-1\r\nContent-Transfer-Encoding: quoted-printable\r\n",
            b"caf=E9",
        );
        assert_eq!(decode(&msg, None).unwrap(), "café");
    }

    #[test]
    fn test_cp1251_differs_from_utf8_reading() {
        let encoded = [0xD2, 0xE5, 0xF1, 0xF2];
        let msg = message("Subject: x\r\n", &encoded);
        let as_cp1251 = decode(&msg, Some("cp1251")).unwrap();
        let as_utf8 = decode(&msg, None).unwrap();
        assert_eq!(as_cp1251, "Тест");
        assert_ne!(as_cp1251, as_utf8);
    }
}
