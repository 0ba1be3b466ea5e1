//! Parsers for the handful of IMAP responses the mail source reads.

use crate::framed::parse_literal_length;

/// Status of a tagged or untagged condition response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// OK
    Ok,
    /// NO
    No,
    /// BAD
    Bad,
    /// BYE
    Bye,
    /// PREAUTH
    PreAuth,
}

impl Status {
    fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            "BAD" => Some(Self::Bad),
            "BYE" => Some(Self::Bye),
            "PREAUTH" => Some(Self::PreAuth),
            _ => None,
        }
    }
}

/// First line of a response as text, CRLF stripped.
fn first_line(response: &[u8]) -> String {
    let end = response
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(response.len());
    String::from_utf8_lossy(&response[..end]).into_owned()
}

/// Splits `<status> <text>` into its parts.
fn status_and_text(rest: &str) -> Option<(Status, String)> {
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    Some((Status::parse(word)?, text.to_string()))
}

/// Parses the completion of the command tagged `tag`.
pub fn parse_tagged(response: &[u8], tag: &str) -> Option<(Status, String)> {
    let line = first_line(response);
    let rest = line.strip_prefix(tag)?.strip_prefix(' ')?;
    status_and_text(rest)
}

/// Parses an untagged condition (`* OK ...`, `* BYE ...`, greeting).
pub fn parse_untagged_status(response: &[u8]) -> Option<(Status, String)> {
    let line = first_line(response);
    status_and_text(line.strip_prefix("* ")?)
}

/// Returns true for a command continuation request (`+ ...`).
pub fn is_continuation(response: &[u8]) -> bool {
    response.starts_with(b"+")
}

/// Collects capabilities from `* CAPABILITY` lines.
pub fn parse_capabilities(responses: &[Vec<u8>]) -> Vec<String> {
    responses
        .iter()
        .map(|r| first_line(r))
        .filter_map(|line| {
            let rest = line.strip_prefix("* ")?;
            let (word, caps) = rest.split_once(' ')?;
            word.eq_ignore_ascii_case("CAPABILITY")
                .then(|| caps.split_whitespace().map(str::to_ascii_uppercase).collect::<Vec<_>>())
        })
        .flatten()
        .collect()
}

/// Parses `* <n> EXISTS`.
pub fn parse_exists(response: &[u8]) -> Option<u32> {
    let line = first_line(response);
    let mut words = line.strip_prefix("* ")?.split_whitespace();
    let count = words.next()?.parse().ok()?;
    words
        .next()
        .filter(|w| w.eq_ignore_ascii_case("EXISTS"))
        .map(|_| count)
}

/// Parses the flag list of `* OK [PERMANENTFLAGS (...)]`.
pub fn parse_permanent_flags(response: &[u8]) -> Option<Vec<String>> {
    let line = first_line(response);
    let upper = line.to_ascii_uppercase();
    let start = upper.find("[PERMANENTFLAGS (")? + "[PERMANENTFLAGS (".len();
    let end = start + line[start..].find(')')?;
    Some(line[start..end].split_whitespace().map(str::to_string).collect())
}

/// Parses the UIDs of a `* SEARCH` response.
pub fn parse_search(response: &[u8]) -> Option<Vec<u32>> {
    let line = first_line(response);
    let mut words = line.strip_prefix("* ")?.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("SEARCH") {
        return None;
    }
    Some(words.filter_map(|w| w.parse().ok()).collect())
}

/// Extracts the `BODY[]` content of a FETCH response.
///
/// Handles literal, quoted and `NIL` values; returns `None` for FETCH
/// responses without a body (e.g. unsolicited flag updates).
pub fn parse_fetch_body(response: &[u8]) -> Option<Vec<u8>> {
    let line = first_line(response);
    let mut words = line.strip_prefix("* ")?.split_whitespace();
    words.next()?.parse::<u32>().ok()?;
    if !words.next()?.eq_ignore_ascii_case("FETCH") {
        return None;
    }

    let marker = b"BODY[] ";
    let at = response
        .windows(marker.len())
        .position(|w| w.eq_ignore_ascii_case(marker))?;
    let value = &response[at + marker.len()..];

    match value.first()? {
        b'{' => {
            let line_end = value.windows(2).position(|w| w == b"\r\n")? + 2;
            let len = parse_literal_length(&value[..line_end])?;
            value.get(line_end..line_end + len).map(<[u8]>::to_vec)
        }
        b'"' => {
            let mut out = Vec::new();
            let mut bytes = value[1..].iter();
            while let Some(&b) = bytes.next() {
                match b {
                    b'"' => return Some(out),
                    b'\\' => out.push(*bytes.next()?),
                    _ => out.push(b),
                }
            }
            None
        }
        _ if value.len() >= 3 && value[..3].eq_ignore_ascii_case(b"NIL") => Some(Vec::new()),
        _ => None,
    }
}

/// Quotes a string for use as an IMAP `astring`.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
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
    fn test_parse_tagged() {
        assert_eq!(
            parse_tagged(b"A0001 OK LOGIN completed\r\n", "A0001"),
            Some((Status::Ok, "LOGIN completed".to_string()))
        );
        assert_eq!(
            parse_tagged(b"A0002 NO [AUTHENTICATIONFAILED] nope\r\n", "A0002"),
            Some((Status::No, "[AUTHENTICATIONFAILED] nope".to_string()))
        );
        assert_eq!(parse_tagged(b"A00010 OK\r\n", "A0001"), None);
        assert_eq!(parse_tagged(b"* OK hi\r\n", "A0001"), None);
    }

    #[test]
    fn test_parse_untagged_status() {
        assert_eq!(
            parse_untagged_status(b"* OK [CAPABILITY IMAP4rev1] ready\r\n"),
            Some((Status::Ok, "[CAPABILITY IMAP4rev1] ready".to_string()))
        );
        assert_eq!(
            parse_untagged_status(b"* BYE shutting down\r\n").map(|s| s.0),
            Some(Status::Bye)
        );
        assert_eq!(parse_untagged_status(b"* 3 EXISTS\r\n"), None);
    }

    #[test]
    fn test_parse_capabilities() {
        let responses = vec![
            b"* CAPABILITY IMAP4rev1 idle LITERAL+\r\n".to_vec(),
            b"* 1 EXISTS\r\n".to_vec(),
        ];
        assert_eq!(
            parse_capabilities(&responses),
            vec!["IMAP4REV1", "IDLE", "LITERAL+"]
        );
    }

    #[test]
    fn test_parse_exists_and_search() {
        assert_eq!(parse_exists(b"* 23 EXISTS\r\n"), Some(23));
        assert_eq!(parse_exists(b"* 23 RECENT\r\n"), None);
        assert_eq!(parse_search(b"* SEARCH 4 9 12\r\n"), Some(vec![4, 9, 12]));
        assert_eq!(parse_search(b"* SEARCH\r\n"), Some(vec![]));
        assert_eq!(parse_search(b"* 1 EXISTS\r\n"), None);
    }

    #[test]
    fn test_parse_permanent_flags() {
        assert_eq!(
            parse_permanent_flags(b"* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited\r\n"),
            Some(vec!["\\Deleted".into(), "\\Seen".into(), "\\*".into()])
        );
        assert_eq!(parse_permanent_flags(b"* OK [UIDVALIDITY 1] ok\r\n"), None);
    }

    #[test]
    fn test_parse_fetch_body_literal() {
        let response = b"* 1 FETCH (UID 7 BODY[] {9}\r\nSubject:\r\n)\r\n";
        assert_eq!(parse_fetch_body(response).unwrap(), b"Subject:\r");
        let response = b"* 1 FETCH (UID 7 BODY[] {10}\r\nSubject:\r\n)\r\n";
        assert_eq!(parse_fetch_body(response).unwrap(), b"Subject:\r\n");
    }

    #[test]
    fn test_parse_fetch_body_quoted_and_nil() {
        assert_eq!(
            parse_fetch_body(b"* 2 FETCH (BODY[] \"a \\\"b\\\"\" UID 3)\r\n").unwrap(),
            b"a \"b\""
        );
        assert_eq!(parse_fetch_body(b"* 2 FETCH (BODY[] NIL)\r\n").unwrap(), b"");
    }

    #[test]
    fn test_parse_fetch_without_body() {
        assert_eq!(parse_fetch_body(b"* 2 FETCH (FLAGS (\\Seen))\r\n"), None);
        assert_eq!(parse_fetch_body(b"* 2 EXISTS\r\n"), None);
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("INBOX"), "\"INBOX\"");
        assert_eq!(quote("pa\"ss\\"), "\"pa\\\"ss\\\\\"");
    }

    #[test]
    fn test_continuation() {
        assert!(is_continuation(b"+ idling\r\n"));
        assert!(!is_continuation(b"* OK\r\n"));
    }
}
