//! Transport profile resolution.
//!
//! A [`TransportProfile`] is the ordered set of low-level connection
//! properties for one protocol: which socket factory to use, whether to
//! fall back to plaintext, and the store protocol name. Operators can
//! override or extend any of them through protocol properties.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::url::Protocol;

/// Property that turns on wire-level logging.
pub const DEBUG_KEY: &str = "mail.debug";
/// Property naming the store protocol.
pub const STORE_PROTOCOL_KEY: &str = "mail.store.protocol";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// How the socket to the store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketFactory {
    /// Plain TCP.
    Plain,
    /// TLS from the first byte.
    Tls,
}

impl SocketFactory {
    /// Property value for this factory.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Tls => "tls",
        }
    }

    /// Parses a property value, ignoring case. `ssl` is accepted for `tls`,
    /// and the JavaMail factory class names map to their counterparts.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "javax.net.socketfactory" => Some(Self::Plain),
            "tls" | "ssl" | "javax.net.ssl.sslsocketfactory" => Some(Self::Tls),
            _ => None,
        }
    }
}

impl fmt::Display for SocketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered transport properties for one protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportProfile {
    protocol: Protocol,
    properties: Vec<(String, String)>,
}

impl TransportProfile {
    /// Builds the canonical defaults for `protocol` and applies `overrides`
    /// on top. An override replaces a default with the same key in place;
    /// new keys are appended in override order.
    #[must_use]
    pub fn resolve(protocol: Protocol, overrides: &[(String, String)]) -> Self {
        let factory = if protocol.is_secure() {
            SocketFactory::Tls
        } else {
            SocketFactory::Plain
        };

        let mut profile = Self {
            protocol,
            properties: vec![
                (
                    socket_factory_key(protocol),
                    factory.as_str().to_string(),
                ),
                (fallback_key(protocol), "false".to_string()),
                (
                    STORE_PROTOCOL_KEY.to_string(),
                    protocol.scheme().to_string(),
                ),
            ],
        };

        for (key, value) in overrides {
            profile.set(key, value);
        }
        profile
    }

    fn set(&mut self, key: &str, value: &str) {
        if let Some(slot) = self.properties.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value.to_string();
        } else {
            self.properties.push((key.to_string(), value.to_string()));
        }
    }

    /// Protocol the profile was resolved for.
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Gets a property value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over all properties in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns true if the profile holds no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Socket factory to open connections with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProperty`] for an unknown factory name.
    pub fn socket_factory(&self) -> Result<SocketFactory> {
        let key = socket_factory_key(self.protocol);
        let value = self.get(&key).unwrap_or(SocketFactory::Plain.as_str());
        SocketFactory::parse(value)
            .ok_or_else(|| Error::invalid_property(key, format!("unknown socket factory {value:?}")))
    }

    /// Whether a failed TLS handshake may be retried in plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProperty`] if the value is not a boolean.
    pub fn fallback(&self) -> Result<bool> {
        self.flag(&fallback_key(self.protocol))
    }

    /// Store protocol named by the profile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProperty`] if it is not a mail store protocol
    /// of the same family as the URL.
    pub fn store_protocol(&self) -> Result<Protocol> {
        let value = self.get(STORE_PROTOCOL_KEY).unwrap_or(self.protocol.scheme());
        let store = Protocol::from_scheme(value.trim())
            .map_err(|_| Error::invalid_property(STORE_PROTOCOL_KEY, format!("unknown protocol {value:?}")))?;
        if store.family() != self.protocol.family() {
            return Err(Error::invalid_property(
                STORE_PROTOCOL_KEY,
                format!("{store} cannot serve a {} URL", self.protocol),
            ));
        }
        Ok(store)
    }

    /// Timeout for establishing the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProperty`] if the value is not a number of
    /// milliseconds.
    pub fn connect_timeout(&self) -> Result<Duration> {
        let key = format!("mail.{}.connectiontimeout", self.protocol.family());
        self.millis(&key, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Timeout for each read from the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProperty`] if the value is not a number of
    /// milliseconds.
    pub fn read_timeout(&self) -> Result<Duration> {
        let key = format!("mail.{}.timeout", self.protocol.family());
        self.millis(&key, DEFAULT_READ_TIMEOUT)
    }

    /// Whether wire-level logging is on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProperty`] if the value is not a boolean.
    pub fn debug(&self) -> Result<bool> {
        self.flag(DEBUG_KEY)
    }

    /// Checks every typed property, so a bad value fails at startup rather
    /// than on the first connection.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::InvalidProperty`] found.
    pub fn validate(&self) -> Result<()> {
        self.socket_factory()?;
        self.fallback()?;
        self.store_protocol()?;
        self.connect_timeout()?;
        self.read_timeout()?;
        self.debug()?;
        Ok(())
    }

    fn flag(&self, key: &str) -> Result<bool> {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) if v == "true" => Ok(true),
            Some(v) if v == "false" => Ok(false),
            Some(v) => Err(Error::invalid_property(
                key,
                format!("expected true or false, got {v:?}"),
            )),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration> {
        self.get(key).map_or(Ok(default), |v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| Error::invalid_property(key, format!("expected milliseconds, got {v:?}")))
        })
    }
}

fn socket_factory_key(protocol: Protocol) -> String {
    format!("mail.{}.socketFactory.class", protocol.family())
}

fn fallback_key(protocol: Protocol) -> String {
    format!("mail.{}.socketFactory.fallback", protocol.family())
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

    fn props(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_default_table() {
        let cases = [
            (Protocol::Imap, "mail.imap.socketFactory.class", "plain", "imap"),
            (Protocol::Imaps, "mail.imap.socketFactory.class", "tls", "imaps"),
            (Protocol::Pop3, "mail.pop3.socketFactory.class", "plain", "pop3"),
            (Protocol::Pop3s, "mail.pop3.socketFactory.class", "tls", "pop3s"),
        ];

        for (protocol, factory_key, factory, store) in cases {
            let profile = TransportProfile::resolve(protocol, &[]);
            assert_eq!(profile.len(), 3);
            assert_eq!(profile.get(factory_key), Some(factory));
            assert_eq!(
                profile.get(&format!("mail.{}.socketFactory.fallback", protocol.family())),
                Some("false")
            );
            assert_eq!(profile.get(STORE_PROTOCOL_KEY), Some(store));
            profile.validate().unwrap();
        }
    }

    #[test]
    fn test_overrides_replace_in_place_and_append() {
        let overrides = props(&[
            ("mail.imap.socketFactory.fallback", "true"),
            ("mail.store.protocol", "imap"),
            ("mail.debug", "true"),
        ]);
        let profile = TransportProfile::resolve(Protocol::Imaps, &overrides);

        let keys: Vec<_> = profile.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                "mail.imap.socketFactory.class",
                "mail.imap.socketFactory.fallback",
                "mail.store.protocol",
                "mail.debug",
            ]
        );
        assert!(profile.fallback().unwrap());
        assert!(profile.debug().unwrap());
        assert_eq!(profile.store_protocol().unwrap(), Protocol::Imap);
        assert_eq!(profile.socket_factory().unwrap(), SocketFactory::Tls);
    }

    #[test]
    fn test_typed_defaults() {
        let profile = TransportProfile::resolve(Protocol::Pop3, &[]);
        assert_eq!(profile.socket_factory().unwrap(), SocketFactory::Plain);
        assert!(!profile.fallback().unwrap());
        assert!(!profile.debug().unwrap());
        assert_eq!(profile.connect_timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(profile.read_timeout().unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn test_timeouts_from_properties() {
        let overrides = props(&[
            ("mail.pop3.connectiontimeout", "1500"),
            ("mail.pop3.timeout", "250"),
        ]);
        let profile = TransportProfile::resolve(Protocol::Pop3s, &overrides);
        assert_eq!(profile.connect_timeout().unwrap(), Duration::from_millis(1500));
        assert_eq!(profile.read_timeout().unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values() {
        let bad = [
            ("mail.imap.socketFactory.class", "javax.net.ssl.Whatever"),
            ("mail.imap.socketFactory.fallback", "maybe"),
            ("mail.store.protocol", "pop3"),
            ("mail.store.protocol", "nntp"),
            ("mail.imap.timeout", "soon"),
            ("mail.debug", "1"),
        ];
        for (key, value) in bad {
            let profile = TransportProfile::resolve(Protocol::Imap, &props(&[(key, value)]));
            let err = profile.validate().unwrap_err();
            assert!(
                matches!(err, Error::InvalidProperty { key: ref k, .. } if k == key),
                "{key}={value} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_socket_factory_parse() {
        assert_eq!(SocketFactory::parse("TLS"), Some(SocketFactory::Tls));
        assert_eq!(SocketFactory::parse("ssl"), Some(SocketFactory::Tls));
        assert_eq!(SocketFactory::parse(" plain "), Some(SocketFactory::Plain));
        assert_eq!(SocketFactory::parse("other"), None);
        assert_eq!(
            SocketFactory::parse("javax.net.SocketFactory"),
            Some(SocketFactory::Plain)
        );
        assert_eq!(
            SocketFactory::parse("javax.net.ssl.SSLSocketFactory"),
            Some(SocketFactory::Tls)
        );
        assert_eq!(SocketFactory::parse("javax.net.ssl.Other"), None);
    }

    #[test]
    fn test_java_factory_class_override() {
        let overrides = props(&[(
            "mail.imap.socketFactory.class",
            "javax.net.ssl.SSLSocketFactory",
        )]);
        let profile = TransportProfile::resolve(Protocol::Imap, &overrides);
        profile.validate().unwrap();
        assert_eq!(profile.socket_factory().unwrap(), SocketFactory::Tls);

        let overrides = props(&[("mail.pop3.socketFactory.class", "javax.net.SocketFactory")]);
        let profile = TransportProfile::resolve(Protocol::Pop3s, &overrides);
        assert_eq!(profile.socket_factory().unwrap(), SocketFactory::Plain);
    }
}
