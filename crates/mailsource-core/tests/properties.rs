//! Property tests for URL parsing, profile resolution and strategy selection.

#![allow(clippy::unwrap_used)]

use mailsource_core::{
    Error, Protocol, RetrievalOptions, RetrievalStrategy, StoreUrl, TransportProfile, select,
};
use proptest::prelude::*;

/// Randomizes the letter case of `s`.
fn any_case(s: &'static str) -> impl Strategy<Value = String> {
    proptest::collection::vec(any::<bool>(), s.len()).prop_map(move |upper| {
        s.chars()
            .zip(upper)
            .map(|(c, up)| if up { c.to_ascii_uppercase() } else { c })
            .collect()
    })
}

fn protocol() -> impl Strategy<Value = Protocol> {
    prop::sample::select(Protocol::ALL.to_vec())
}

fn property_key() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("mail.imap.socketFactory.fallback".to_string()),
        Just("mail.pop3.socketFactory.fallback".to_string()),
        Just("mail.debug".to_string()),
        "mail\\.[a-z]{1,6}\\.[a-z]{1,8}",
    ]
}

fn overrides() -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::vec((property_key(), "[a-z0-9]{0,6}"), 0..6)
}

fn options() -> impl Strategy<Value = RetrievalOptions> {
    (
        any::<bool>(),
        any::<bool>(),
        proptest::option::of("[a-z][a-z-]{0,10}"),
        proptest::option::of("(ALL|FROM x|SUBJECT y)"),
    )
        .prop_map(|(mark_as_read, delete, user_flag, selector_expression)| RetrievalOptions {
            idle_imap: false,
            mark_as_read,
            delete,
            user_flag,
            selector_expression,
            charset: None,
            protocol_properties: Vec::new(),
        })
}

proptest! {
    #[test]
    fn scheme_case_is_ignored(
        (scheme, expected) in prop_oneof![
            any_case("imap").prop_map(|s| (s, Protocol::Imap)),
            any_case("imaps").prop_map(|s| (s, Protocol::Imaps)),
            any_case("pop3").prop_map(|s| (s, Protocol::Pop3)),
            any_case("pop3s").prop_map(|s| (s, Protocol::Pop3s)),
        ],
    ) {
        let url = StoreUrl::parse(&format!("{scheme}://user:pw@localhost/INBOX")).unwrap();
        prop_assert_eq!(url.protocol, expected);
        prop_assert_eq!(url.port, expected.default_port());
    }

    #[test]
    fn other_schemes_are_unsupported(scheme in "[a-z][a-z0-9]{0,7}") {
        prop_assume!(Protocol::from_scheme(&scheme).is_err());
        let err = StoreUrl::parse(&format!("{scheme}://localhost")).unwrap_err();
        prop_assert_eq!(err, Error::UnsupportedProtocol(scheme));
    }

    #[test]
    fn resolve_is_pure(protocol in protocol(), overrides in overrides()) {
        prop_assert_eq!(
            TransportProfile::resolve(protocol, &overrides),
            TransportProfile::resolve(protocol, &overrides)
        );
    }

    #[test]
    fn override_wins(protocol in protocol(), overrides in overrides()) {
        let profile = TransportProfile::resolve(protocol, &overrides);
        for (key, _) in &overrides {
            let last = overrides
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str());
            prop_assert_eq!(profile.get(key), last);
        }
    }

    #[test]
    fn pop3_never_carries_imap_options(
        secure in any::<bool>(),
        options in options(),
    ) {
        let scheme = if secure { "pop3s" } else { "pop3" };
        let url = StoreUrl::parse(&format!("{scheme}://localhost")).unwrap();
        let strategy = select(&url, &options).unwrap();
        let RetrievalStrategy::Pop3Poll(pop3) = strategy else {
            return Err(TestCaseError::fail("expected Pop3Poll"));
        };
        prop_assert_eq!(pop3.delete, options.delete);
    }

    #[test]
    fn idle_on_pop3_always_fails(secure in any::<bool>(), options in options()) {
        let scheme = if secure { "pop3s" } else { "pop3" };
        let url = StoreUrl::parse(&format!("{scheme}://localhost")).unwrap();
        let options = RetrievalOptions { idle_imap: true, ..options };
        prop_assert!(matches!(select(&url, &options), Err(Error::IncompatibleOptions(_))));
    }
}
