//! Charset lookup and decoding.
//!
//! Labels are resolved the way browsers and mail clients resolve them
//! (WHATWG encoding labels), so `cp1251`, `windows-1251` and `x-cp1251`
//! all name the same decoder.

use encoding_rs::Encoding;

use crate::error::{Error, Result};

/// Charset used when neither the caller nor the message names one.
pub const DEFAULT_CHARSET: &str = "utf-8";

/// Looks up a charset by label.
///
/// The `replacement` pseudo-encoding is rejected: it would silently turn
/// the whole payload into a single U+FFFD.
///
/// # Errors
///
/// Returns [`Error::UnsupportedCharset`] if the label is unknown.
pub fn lookup(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label_no_replacement(label.trim().as_bytes())
        .ok_or_else(|| Error::UnsupportedCharset(label.to_string()))
}

/// Returns true if `label` names a charset the decoder knows.
#[must_use]
pub fn is_supported(label: &str) -> bool {
    lookup(label).is_ok()
}

/// Decodes `bytes` using the charset named by `label`.
///
/// Malformed sequences are replaced with U+FFFD rather than failing; only
/// an unknown label is an error.
///
/// # Errors
///
/// Returns [`Error::UnsupportedCharset`] if the label is unknown.
pub fn decode(bytes: &[u8], label: &str) -> Result<String> {
    let encoding = lookup(label)?;
    let (text, _had_errors) = encoding.decode_without_bom_handling(bytes);
    Ok(text.into_owned())
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
    fn test_lookup_is_case_insensitive() {
        assert!(lookup("UTF-8").is_ok());
        assert!(lookup("utf-8").is_ok());
        assert!(lookup("Windows-1251").is_ok());
        assert!(lookup("cp1251").is_ok());
    }

    #[test]
    fn test_lookup_unknown() {
        let err = lookup("no-such-charset").unwrap_err();
        assert!(matches!(err, Error::UnsupportedCharset(ref s) if s == "no-such-charset"));
        assert!(!is_supported("no-such-charset"));
    }

    #[test]
    fn test_lookup_rejects_replacement() {
        assert!(lookup("iso-2022-kr").is_err());
    }

    #[test]
    fn test_decode_cp1251() {
        let bytes = [0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2];
        assert_eq!(decode(&bytes, "cp1251").unwrap(), "Привет");
    }

    #[test]
    fn test_decode_latin1() {
        assert_eq!(decode(b"caf\xE9", "iso-8859-1").unwrap(), "café");
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let text = decode(b"ok\xFF", DEFAULT_CHARSET).unwrap();
        assert_eq!(text, "ok\u{FFFD}");
    }
}
