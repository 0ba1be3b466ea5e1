//! Service configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use mailsource_core::MailSourceProperties;
use mailsource_store::IdleSettings;
use serde::{Deserialize, Serialize};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MAIL_SOURCE_CONFIG";

/// Everything the service reads at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    /// Mail source properties.
    pub mail: MailSourceProperties,
    /// Polling schedule.
    #[serde(default)]
    pub trigger: TriggerProperties,
    /// IDLE timing.
    #[serde(default)]
    pub idle: IdleProperties,
}

/// When and how much to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TriggerProperties {
    /// Pause between the end of one poll and the start of the next.
    pub fixed_delay_secs: u64,
    /// Pause before the first poll.
    pub initial_delay_secs: u64,
    /// Messages fetched per poll; 0 means no limit.
    pub max_messages: usize,
}

impl Default for TriggerProperties {
    fn default() -> Self {
        Self {
            fixed_delay_secs: 1,
            initial_delay_secs: 0,
            max_messages: 1,
        }
    }
}

impl TriggerProperties {
    /// Pause between polls.
    #[must_use]
    pub const fn fixed_delay(&self) -> Duration {
        Duration::from_secs(self.fixed_delay_secs)
    }

    /// Pause before the first poll.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    /// Per-poll message limit, `None` when unlimited.
    #[must_use]
    pub const fn limit(&self) -> Option<usize> {
        match self.max_messages {
            0 => None,
            n => Some(n),
        }
    }
}

/// IDLE timing, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct IdleProperties {
    /// Re-issue IDLE after this long.
    pub timeout_secs: u64,
    /// Wait before reconnecting after a failure.
    pub reconnect_delay_secs: u64,
}

impl Default for IdleProperties {
    fn default() -> Self {
        let settings = IdleSettings::default();
        Self {
            timeout_secs: settings.timeout.as_secs(),
            reconnect_delay_secs: settings.reconnect_delay.as_secs(),
        }
    }
}

impl IdleProperties {
    /// Converts to the receiver's settings.
    #[must_use]
    pub const fn settings(&self) -> IdleSettings {
        IdleSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
        }
    }
}

/// Picks the configuration file: the command-line argument, then the
/// environment variable, then `<config dir>/mail-source/config.json`.
#[must_use]
pub fn config_path(arg: Option<String>, env: Option<String>) -> Option<PathBuf> {
    arg.or(env)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|dir| dir.join("mail-source").join("config.json")))
}

/// Reads and parses the configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid
/// configuration JSON.
pub fn load(path: &Path) -> anyhow::Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Invalid configuration in {}", path.display()))
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
    fn test_minimal_config() {
        let config: AppConfig =
            serde_json::from_str(r#"{"mail": {"url": "imaps://u:p@mail.example.com"}}"#).unwrap();
        assert_eq!(config.mail.url, "imaps://u:p@mail.example.com");
        assert!(config.mail.delete);
        assert_eq!(config.trigger, TriggerProperties::default());
        assert_eq!(config.trigger.limit(), Some(1));
        assert_eq!(config.idle.settings(), IdleSettings::default());
    }

    #[test]
    fn test_full_config() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "mail": {
                    "url": "imap://u:p@localhost",
                    "idle-imap": true,
                    "mark-as-read": true,
                    "protocol-properties": "mail.debug=true"
                },
                "trigger": {"fixed-delay-secs": 30, "max-messages": 0},
                "idle": {"timeout-secs": 120}
            }"#,
        )
        .unwrap();
        assert!(config.mail.idle_imap);
        assert_eq!(config.trigger.fixed_delay(), Duration::from_secs(30));
        assert_eq!(config.trigger.initial_delay(), Duration::ZERO);
        assert_eq!(config.trigger.limit(), None);
        assert_eq!(config.idle.settings().timeout, Duration::from_secs(120));
        assert_eq!(config.idle.reconnect_delay_secs, 10);
    }

    #[test]
    fn test_url_is_required() {
        assert!(serde_json::from_str::<AppConfig>(r#"{"mail": {}}"#).is_err());
    }

    #[test]
    fn test_config_path_precedence() {
        assert_eq!(
            config_path(Some("a.json".into()), Some("b.json".into())),
            Some(PathBuf::from("a.json"))
        );
        assert_eq!(
            config_path(None, Some("b.json".into())),
            Some(PathBuf::from("b.json"))
        );
        if let Some(path) = config_path(None, None) {
            assert!(path.ends_with("mail-source/config.json"));
        }
    }

    #[test]
    fn test_load() {
        let path = std::env::temp_dir().join(format!("mail-source-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"mail": {"url": "pop3://u:p@localhost"}}"#).unwrap();
        let config = load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.mail.url, "pop3://u:p@localhost");

        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to read configuration"));
    }
}
