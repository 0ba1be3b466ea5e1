//! `Content-Type` header handling.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "mixed").
    pub sub_type: String,
    /// Parameters with lowercased names (e.g., charset, boundary).
    pub parameters: HashMap<String, String>,
}

impl ContentType {
    /// Creates a content type without parameters.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: HashMap::new(),
        }
    }

    /// The implicit type of a message without a `Content-Type` header
    /// (RFC 2045 §5.2), minus its `us-ascii` charset so callers can apply
    /// their own default.
    #[must_use]
    pub fn implicit() -> Self {
        Self::new("text", "plain")
    }

    /// Returns the charset parameter if present and non-empty.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters
            .get("charset")
            .map(String::as_str)
            .filter(|c| !c.is_empty())
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`
    ///
    /// # Errors
    ///
    /// Returns an error if the type or subtype is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');

        let type_str = parts.next().unwrap_or_default().trim();
        let (main_type, sub_type) = type_str
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(format!("Missing subtype in {s:?}")))?;

        let main_type = main_type.trim().to_ascii_lowercase();
        let sub_type = sub_type.trim().to_ascii_lowercase();
        if main_type.is_empty() || sub_type.is_empty() {
            return Err(Error::InvalidContentType(format!("Empty type in {s:?}")));
        }

        let mut content_type = Self::new(main_type, sub_type);
        for param in parts {
            if let Some((key, value)) = param.trim().split_once('=') {
                let key = key.trim().to_ascii_lowercase();
                let value = value.trim().trim_matches('"').to_string();
                content_type.parameters.insert(key, value);
            }
        }

        Ok(content_type)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("text/plain; charset=utf-8").unwrap();
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert_eq!(ct.charset(), Some("utf-8"));
        assert!(!ct.is_multipart());
    }

    #[test]
    fn test_content_type_parse_case_and_quotes() {
        let ct = ContentType::parse("Multipart/Mixed; BOUNDARY=\"----=_Part_123\"").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(
            ct.parameters.get("boundary").map(String::as_str),
            Some("----=_Part_123")
        );
    }

    #[test]
    fn test_content_type_parse_invalid() {
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("/plain").is_err());
    }

    #[test]
    fn test_content_type_empty_charset() {
        let ct = ContentType::parse("text/plain; charset=\"\"").unwrap();
        assert_eq!(ct.charset(), None);
    }

    #[test]
    fn test_implicit() {
        let ct = ContentType::implicit();
        assert_eq!(ct.to_string(), "text/plain");
        assert_eq!(ct.charset(), None);
    }
}
