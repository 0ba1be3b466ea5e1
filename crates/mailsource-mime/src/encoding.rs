//! Transfer and header decoding utilities.
//!
//! Supports Base64, Quoted-Printable, and RFC 2047 encoded words. Decoders
//! produce raw bytes; turning them into text is the job of [`crate::charset`].

use crate::charset;
use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Decodes Base64 data, ignoring embedded line breaks and other whitespace.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences.
pub fn decode_quoted_printable(data: &[u8]) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        // Soft line break
        match data.get(i + 1..) {
            Some([b'\r', b'\n', ..]) => {
                i += 3;
                continue;
            }
            Some([b'\n', ..]) => {
                i += 2;
                continue;
            }
            _ => {}
        }

        // Hex encoded byte
        let hex = data
            .get(i + 1..i + 3)
            .ok_or_else(|| Error::InvalidEncoding("Incomplete escape sequence".to_string()))?;
        let hex = std::str::from_utf8(hex)
            .map_err(|_| Error::InvalidEncoding("Invalid hex escape".to_string()))?;
        let decoded = u8::from_str_radix(hex, 16)
            .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
        result.push(decoded);
        i += 3;
    }

    Ok(result)
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Format of a word: `=?charset?encoding?encoded-text?=`. Linear whitespace
/// between two adjacent encoded words is dropped; text that merely looks
/// like the start of a word is kept as-is.
///
/// # Errors
///
/// Returns an error if a word names an unknown charset or its payload is
/// not valid for its encoding.
pub fn decode_rfc2047(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        if let Some((word, consumed)) = split_encoded_word(candidate) {
            if !(after_word && before.trim().is_empty()) {
                out.push_str(before);
            }
            out.push_str(&decode_word(&word)?);
            rest = &candidate[consumed..];
            after_word = true;
        } else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            after_word = false;
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// The three fields of an encoded word.
struct EncodedWord<'a> {
    charset: &'a str,
    encoding: char,
    text: &'a str,
}

/// Splits an encoded word off the front of `s`, which starts with `=?`.
///
/// Returns the word and the number of bytes it spans.
fn split_encoded_word(s: &str) -> Option<(EncodedWord<'_>, usize)> {
    let inner = s.get(2..)?;
    let (charset, rest) = inner.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let text = &rest[..end];

    let mut chars = encoding.chars();
    let encoding = chars.next()?;
    if chars.next().is_some()
        || charset.is_empty()
        || text.contains(|c: char| c == '?' || c.is_whitespace())
    {
        return None;
    }

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split_once('*').map_or(charset, |(c, _)| c);
    let consumed = s.len() - (rest.len() - end - 2);
    Some((
        EncodedWord {
            charset,
            encoding,
            text,
        },
        consumed,
    ))
}

fn decode_word(word: &EncodedWord<'_>) -> Result<String> {
    let bytes = match word.encoding {
        'B' | 'b' => decode_base64(word.text.as_bytes())?,
        'Q' | 'q' => decode_quoted_printable(word.text.replace('_', " ").as_bytes())?,
        other => {
            return Err(Error::InvalidEncoding(format!(
                "Unknown encoding: {other}"
            )));
        }
    };
    charset::decode(&bytes, word.charset)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_decode() {
        let decoded = decode_base64(b"SGVsbG8s\r\nIFdvcmxkIQ==").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_base64_decode_invalid() {
        assert!(decode_base64(b"not base64!").is_err());
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable(b"Hello, World!").unwrap(), b"Hello, World!");
        assert_eq!(decode_quoted_printable(b"H=C3=A9llo").unwrap(), "Héllo".as_bytes());
    }

    #[test]
    fn test_quoted_printable_keeps_non_utf8_bytes() {
        assert_eq!(decode_quoted_printable(b"=CF=F0").unwrap(), vec![0xCF, 0xF0]);
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld").unwrap(), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld").unwrap(), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_incomplete_escape() {
        assert!(decode_quoted_printable(b"broken=A").is_err());
        assert!(decode_quoted_printable(b"broken=ZZ").is_err());
    }

    #[test]
    fn test_rfc2047_plain_text_untouched() {
        assert_eq!(decode_rfc2047("Hello").unwrap(), "Hello");
        assert_eq!(decode_rfc2047("a =? b").unwrap(), "a =? b");
    }

    #[test]
    fn test_rfc2047_base64() {
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?=").unwrap(), "Héllo");
    }

    #[test]
    fn test_rfc2047_quoted_printable() {
        assert_eq!(decode_rfc2047("=?utf-8?Q?H=C3=A9llo_there?=").unwrap(), "Héllo there");
    }

    #[test]
    fn test_rfc2047_other_charset() {
        assert_eq!(
            decode_rfc2047("=?ISO-8859-1?Q?Keld_J=F8rn_Simonsen?=").unwrap(),
            "Keld Jørn Simonsen"
        );
    }

    #[test]
    fn test_rfc2047_adjacent_words_join() {
        assert_eq!(
            decode_rfc2047("=?utf-8?Q?a?= =?utf-8?Q?b?=").unwrap(),
            "ab"
        );
        assert_eq!(
            decode_rfc2047("Re: =?utf-8?Q?caf=C3=A9?= time").unwrap(),
            "Re: café time"
        );
    }

    #[test]
    fn test_rfc2047_language_suffix() {
        assert_eq!(decode_rfc2047("=?US-ASCII*EN?Q?Keith_Moore?=").unwrap(), "Keith Moore");
    }

    #[test]
    fn test_rfc2047_unknown_charset() {
        assert!(decode_rfc2047("=?x-unknown?Q?abc?=").is_err());
    }
}
