//! Address-list parsing for `To`, `Cc`, `Bcc` and friends (RFC 5322 §3.4).

use std::fmt;

use crate::encoding::decode_rfc2047;
use crate::error::{Error, Result};

/// Characters that force a display name to be quoted when rendered.
const SPECIALS: &[char] = &['(', ')', '<', '>', '[', ']', ':', ';', '@', '\\', ',', '.', '"'];

/// One mailbox: optional display name plus address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name with encoded words decoded.
    pub name: Option<String>,
    /// The `local@domain` address.
    pub address: String,
}

impl Mailbox {
    /// Creates a mailbox with just an address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    /// Creates a mailbox with a display name.
    #[must_use]
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if name.contains(SPECIALS) => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.address)
            }
            Some(name) => write!(f, "{name} <{}>", self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// Parses an address-list header value into its mailboxes, in order.
///
/// Groups (`team: a@x, b@y;`) are flattened to their members and comments
/// are dropped. An empty value yields an empty list.
///
/// # Errors
///
/// Returns [`Error::MalformedAddress`] (tagged with `header`) on unbalanced
/// quotes, comments or angle brackets, or an address without a non-empty
/// local part and domain.
pub fn parse_address_list(header: &str, value: &str) -> Result<Vec<Mailbox>> {
    let mut mailboxes = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut escaped = false;
    let mut comment_depth = 0usize;
    let mut in_angle = false;
    let mut in_literal = false;
    let mut in_group = false;

    for ch in value.chars() {
        if escaped {
            if comment_depth == 0 {
                current.push(ch);
            }
            escaped = false;
            continue;
        }

        if in_quote {
            current.push(ch);
            match ch {
                '\\' => escaped = true,
                '"' => in_quote = false,
                _ => {}
            }
            continue;
        }

        // Domain literal: `user@[IPv6:2001:db8::1]`
        if in_literal {
            current.push(ch);
            match ch {
                '\\' => escaped = true,
                ']' => in_literal = false,
                '[' => return Err(Error::malformed_address(header, "nested '['")),
                _ => {}
            }
            continue;
        }

        if comment_depth > 0 {
            match ch {
                '\\' => escaped = true,
                '(' => comment_depth += 1,
                ')' => comment_depth -= 1,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => {
                in_quote = true;
                current.push(ch);
            }
            '(' => comment_depth = 1,
            '[' => {
                in_literal = true;
                current.push(ch);
            }
            ']' => return Err(Error::malformed_address(header, "unbalanced ']'")),
            ')' => return Err(Error::malformed_address(header, "unbalanced ')'")),
            '<' if in_angle => return Err(Error::malformed_address(header, "nested '<'")),
            '<' => {
                in_angle = true;
                current.push(ch);
            }
            '>' if !in_angle => return Err(Error::malformed_address(header, "unbalanced '>'")),
            '>' => {
                in_angle = false;
                current.push(ch);
            }
            ',' if !in_angle => flush(header, &mut current, &mut mailboxes)?,
            ':' if !in_angle => {
                if in_group {
                    return Err(Error::malformed_address(header, "nested group"));
                }
                // Group display name is not an address
                in_group = true;
                current.clear();
            }
            ';' if !in_angle => {
                if !in_group {
                    return Err(Error::malformed_address(header, "';' outside a group"));
                }
                flush(header, &mut current, &mut mailboxes)?;
                in_group = false;
            }
            _ => current.push(ch),
        }
    }

    if in_quote || escaped {
        return Err(Error::malformed_address(header, "unterminated quoted string"));
    }
    if comment_depth > 0 {
        return Err(Error::malformed_address(header, "unterminated comment"));
    }
    if in_angle {
        return Err(Error::malformed_address(header, "unterminated '<'"));
    }
    if in_literal {
        return Err(Error::malformed_address(header, "unterminated domain literal"));
    }

    flush(header, &mut current, &mut mailboxes)?;
    Ok(mailboxes)
}

/// Parses the accumulated token (if any) and appends it.
fn flush(header: &str, current: &mut String, out: &mut Vec<Mailbox>) -> Result<()> {
    let token = current.trim();
    if !token.is_empty() {
        out.push(parse_mailbox(header, token)?);
    }
    current.clear();
    Ok(())
}

fn parse_mailbox(header: &str, token: &str) -> Result<Mailbox> {
    let Some(open) = token.rfind('<') else {
        validate_address(header, token)?;
        return Ok(Mailbox::new(token));
    };

    let close = token
        .rfind('>')
        .filter(|&close| close > open)
        .ok_or_else(|| Error::malformed_address(header, format!("unterminated '<' in {token:?}")))?;
    if !token[close + 1..].trim().is_empty() {
        return Err(Error::malformed_address(
            header,
            format!("text after '>' in {token:?}"),
        ));
    }

    let mut address = token[open + 1..close].trim();
    // Obsolete source route: <@relay1,@relay2:user@host>
    if address.starts_with('@') {
        address = address.split_once(':').map_or(address, |(_, a)| a);
    }
    validate_address(header, address)?;

    let raw_name = token[..open].trim();
    let name = if raw_name.is_empty() {
        None
    } else {
        let unquoted = unquote(raw_name);
        Some(decode_rfc2047(&unquoted).unwrap_or(unquoted))
    };

    Ok(Mailbox {
        name,
        address: address.to_string(),
    })
}

/// Checks for `local@domain` with both sides present.
fn validate_address(header: &str, address: &str) -> Result<()> {
    let Some((local, domain)) = address.rsplit_once('@') else {
        return Err(Error::malformed_address(
            header,
            format!("missing '@' in {address:?}"),
        ));
    };

    if local.is_empty() || domain.is_empty() {
        return Err(Error::malformed_address(
            header,
            format!("empty local part or domain in {address:?}"),
        ));
    }

    if domain.contains(char::is_whitespace)
        || (!local.starts_with('"') && local.contains(char::is_whitespace))
    {
        return Err(Error::malformed_address(
            header,
            format!("whitespace in {address:?}"),
        ));
    }

    Ok(())
}

/// Removes quoting from a display name phrase.
fn unquote(phrase: &str) -> String {
    let mut out = String::with_capacity(phrase.len());
    let mut chars = phrase.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => {}
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            _ => out.push(ch),
        }
    }
    out.trim().to_string()
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
    use proptest::prelude::*;

    fn rendered(value: &str) -> Vec<String> {
        parse_address_list("To", value)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_empty_value() {
        assert!(parse_address_list("Cc", "").unwrap().is_empty());
        assert!(parse_address_list("Cc", "  ,  ").unwrap().is_empty());
    }

    #[test]
    fn test_bare_addresses_keep_order() {
        assert_eq!(
            rendered("b@example.com, a@example.com,c@example.com"),
            vec!["b@example.com", "a@example.com", "c@example.com"]
        );
    }

    #[test]
    fn test_display_names() {
        let list = parse_address_list("To", "Alice Smith <alice@example.com>").unwrap();
        assert_eq!(
            list,
            vec![Mailbox::with_name("Alice Smith", "alice@example.com")]
        );
        assert_eq!(list[0].to_string(), "Alice Smith <alice@example.com>");
    }

    #[test]
    fn test_quoted_display_name_with_comma() {
        let list = parse_address_list("To", "\"Doe, John\" <john@example.com>, x@y.org").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name.as_deref(), Some("Doe, John"));
        assert_eq!(list[0].to_string(), "\"Doe, John\" <john@example.com>");
        assert_eq!(list[1].to_string(), "x@y.org");
    }

    #[test]
    fn test_encoded_display_name() {
        let list = parse_address_list("From", "=?utf-8?B?SMOpbGxv?= <h@example.com>").unwrap();
        assert_eq!(list[0].name.as_deref(), Some("Héllo"));
    }

    #[test]
    fn test_comments_dropped() {
        assert_eq!(
            rendered("alice@example.com (Alice (the first)), <bob@example.com>"),
            vec!["alice@example.com", "bob@example.com"]
        );
    }

    #[test]
    fn test_groups_flattened() {
        assert_eq!(
            rendered("Team: a@example.com, b@example.com;, c@example.com"),
            vec!["a@example.com", "b@example.com", "c@example.com"]
        );
        assert!(rendered("undisclosed-recipients:;").is_empty());
    }

    #[test]
    fn test_source_route_stripped() {
        assert_eq!(
            rendered("<@relay.example,@other.example:user@example.com>"),
            vec!["user@example.com"]
        );
    }

    #[test]
    fn test_domain_literals() {
        assert_eq!(
            rendered(
                "user@[IPv6:2001:db8::1], Ops <ops@[192.0.2.7]>, Team: t@[IPv6:::1];, x@example.com"
            ),
            vec![
                "user@[IPv6:2001:db8::1]",
                "Ops <ops@[192.0.2.7]>",
                "t@[IPv6:::1]",
                "x@example.com"
            ]
        );
    }

    #[test]
    fn test_malformed() {
        for value in [
            "\"unterminated <a@b.c>",
            "Name <a@b.c",
            "a@b.c>",
            "no-at-sign",
            "@example.com",
            "user@",
            "(open comment a@b.c",
            "Name <a@b.c> trailing",
            "a@b.c;",
            "user@[IPv6:2001:db8::1",
            "user@example.com]",
        ] {
            let err = parse_address_list("Bcc", value).unwrap_err();
            assert!(
                matches!(err, Error::MalformedAddress { ref header, .. } if header == "Bcc"),
                "{value:?} gave {err:?}"
            );
        }
    }

    proptest! {
        #[test]
        fn simple_lists_round_trip_in_order(
            locals in proptest::collection::vec("[a-z][a-z0-9.]{0,8}", 0..6),
        ) {
            let addresses: Vec<String> = locals
                .iter()
                .map(|l| format!("{l}@example.com"))
                .collect();
            let parsed = rendered(&addresses.join(", "));
            prop_assert_eq!(parsed, addresses);
        }
    }
}
