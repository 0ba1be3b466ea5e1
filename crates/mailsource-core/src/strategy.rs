//! Retrieval strategy selection.
//!
//! Every (protocol, options) combination maps to exactly one
//! [`RetrievalStrategy`]; the variants only carry the fields that mean
//! something for them.

use crate::error::{Error, Result};
use crate::options::RetrievalOptions;
use crate::profile::TransportProfile;
use crate::url::StoreUrl;

/// Keyword used to tag processed messages when none is configured.
pub const DEFAULT_USER_FLAG: &str = "mail-source-adapter";

/// Settings for the IMAP strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapRetrieval {
    /// Delete (and expunge) messages after retrieval.
    pub delete: bool,
    /// Set `\Seen` on retrieved messages and skip seen ones.
    pub mark_as_read: bool,
    /// Keyword that marks a message as processed.
    pub user_flag: String,
    /// Extra SEARCH criteria.
    pub selector_expression: Option<String>,
    /// Connection properties.
    pub transport: TransportProfile,
}

/// Settings for the POP3 strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pop3Retrieval {
    /// Delete messages after retrieval.
    pub delete: bool,
    /// Connection properties.
    pub transport: TransportProfile,
}

/// How messages are retrieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalStrategy {
    /// Periodic IMAP search and fetch.
    ImapPoll(ImapRetrieval),
    /// Periodic POP3 retrieval.
    Pop3Poll(Pop3Retrieval),
    /// IMAP IDLE push notifications.
    ImapIdle(ImapRetrieval),
}

impl RetrievalStrategy {
    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ImapPoll(_) => "imap-poll",
            Self::Pop3Poll(_) => "pop3-poll",
            Self::ImapIdle(_) => "imap-idle",
        }
    }

    /// Transport profile of any variant.
    #[must_use]
    pub const fn transport(&self) -> &TransportProfile {
        match self {
            Self::ImapPoll(imap) | Self::ImapIdle(imap) => &imap.transport,
            Self::Pop3Poll(pop3) => &pop3.transport,
        }
    }

    /// Whether messages are deleted after retrieval.
    #[must_use]
    pub const fn deletes(&self) -> bool {
        match self {
            Self::ImapPoll(imap) | Self::ImapIdle(imap) => imap.delete,
            Self::Pop3Poll(pop3) => pop3.delete,
        }
    }
}

/// Chooses the retrieval strategy for `url` and `options`.
///
/// Idle wins over polling; otherwise the protocol decides. IMAP-only
/// options given for POP3 are left out of the result.
///
/// # Errors
///
/// - [`Error::IncompatibleOptions`] if idle is requested for POP3
/// - [`Error::InvalidProperty`] if the user flag is not an IMAP atom or a
///   protocol property has an unusable value
pub fn select(url: &StoreUrl, options: &RetrievalOptions) -> Result<RetrievalStrategy> {
    let protocol = url.protocol;

    if options.idle_imap && !protocol.is_imap() {
        return Err(Error::IncompatibleOptions(format!(
            "idle-imap requires an IMAP store, got {protocol}"
        )));
    }

    let transport = TransportProfile::resolve(protocol, &options.protocol_properties);
    transport.validate()?;

    if !protocol.is_imap() {
        return Ok(RetrievalStrategy::Pop3Poll(Pop3Retrieval {
            delete: options.delete,
            transport,
        }));
    }

    let user_flag = options
        .user_flag
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_FLAG.to_string());
    if !is_atom(&user_flag) {
        return Err(Error::invalid_property(
            "user-flag",
            format!("{user_flag:?} is not an IMAP keyword"),
        ));
    }

    let imap = ImapRetrieval {
        delete: options.delete,
        mark_as_read: options.mark_as_read,
        user_flag,
        selector_expression: options.selector_expression.clone(),
        transport,
    };

    Ok(if options.idle_imap {
        RetrievalStrategy::ImapIdle(imap)
    } else {
        RetrievalStrategy::ImapPoll(imap)
    })
}

/// Returns true if `s` can be sent as an IMAP keyword (RFC 3501 `atom`).
fn is_atom(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('\\')
        && s.bytes().all(|b| {
            b.is_ascii_graphic() && !matches!(b, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\' | b']')
        })
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
    use crate::url::Protocol;

    fn url(s: &str) -> StoreUrl {
        StoreUrl::parse(s).unwrap()
    }

    fn all_options() -> RetrievalOptions {
        RetrievalOptions {
            idle_imap: false,
            mark_as_read: true,
            delete: false,
            user_flag: Some("processed".into()),
            selector_expression: Some("FROM boss".into()),
            charset: None,
            protocol_properties: Vec::new(),
        }
    }

    #[test]
    fn test_imap_poll() {
        let strategy = select(&url("imap://localhost/INBOX"), &all_options()).unwrap();
        let RetrievalStrategy::ImapPoll(imap) = &strategy else {
            panic!("expected ImapPoll, got {strategy:?}");
        };
        assert!(imap.mark_as_read);
        assert!(!imap.delete);
        assert_eq!(imap.user_flag, "processed");
        assert_eq!(imap.selector_expression.as_deref(), Some("FROM boss"));
        assert_eq!(imap.transport.protocol(), Protocol::Imap);
        assert_eq!(strategy.name(), "imap-poll");
        assert!(!strategy.deletes());
    }

    #[test]
    fn test_imap_idle_uses_poll_transport() {
        let mut options = all_options();
        let poll = select(&url("imaps://localhost"), &options).unwrap();
        options.idle_imap = true;
        let idle = select(&url("imaps://localhost"), &options).unwrap();

        assert!(matches!(idle, RetrievalStrategy::ImapIdle(_)));
        assert_eq!(idle.transport(), poll.transport());
    }

    #[test]
    fn test_pop3_poll_drops_imap_options() {
        let strategy = select(&url("pop3s://localhost"), &all_options()).unwrap();
        assert_eq!(
            strategy,
            RetrievalStrategy::Pop3Poll(Pop3Retrieval {
                delete: false,
                transport: TransportProfile::resolve(Protocol::Pop3s, &[]),
            })
        );
    }

    #[test]
    fn test_idle_on_pop3_is_incompatible() {
        let mut options = all_options();
        options.idle_imap = true;
        for s in ["pop3://localhost", "pop3s://localhost"] {
            assert!(matches!(
                select(&url(s), &options).unwrap_err(),
                Error::IncompatibleOptions(_)
            ));
        }
    }

    #[test]
    fn test_default_user_flag() {
        let options = RetrievalOptions {
            delete: true,
            ..RetrievalOptions::default()
        };
        let RetrievalStrategy::ImapPoll(imap) = select(&url("imap://h"), &options).unwrap() else {
            panic!("expected ImapPoll");
        };
        assert_eq!(imap.user_flag, DEFAULT_USER_FLAG);
    }

    #[test]
    fn test_user_flag_must_be_atom() {
        for flag in ["two words", "\\Seen", "quo\"te", "paren(", "star*"] {
            let options = RetrievalOptions {
                user_flag: Some(flag.into()),
                ..RetrievalOptions::default()
            };
            assert!(matches!(
                select(&url("imap://h"), &options).unwrap_err(),
                Error::InvalidProperty { ref key, .. } if key == "user-flag"
            ));
        }
    }

    #[test]
    fn test_bad_protocol_property_fails_startup() {
        let options = RetrievalOptions {
            protocol_properties: vec![("mail.pop3.timeout".into(), "never".into())],
            ..RetrievalOptions::default()
        };
        assert!(matches!(
            select(&url("pop3://h"), &options).unwrap_err(),
            Error::InvalidProperty { .. }
        ));
    }

    #[test]
    fn test_is_atom() {
        assert!(is_atom("mail-source-adapter"));
        assert!(is_atom("$Forwarded"));
        assert!(!is_atom(""));
        assert!(!is_atom("a]b"));
    }
}
