//! Minimal IMAP client: just the commands a mail source needs.

pub mod response;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use self::response::{Status, quote};
use crate::framed::FramedStream;
use crate::{Error, Result};

/// Generates sequential command tags: `A0000`, `A0001`, ...
#[derive(Debug, Default)]
struct TagGenerator {
    counter: u32,
}

impl TagGenerator {
    fn next(&mut self) -> String {
        let tag = format!("A{:04}", self.counter);
        self.counter = self.counter.wrapping_add(1);
        tag
    }
}

/// State of the selected mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages.
    pub exists: u32,
    /// Flags that can be stored permanently, if the server said.
    pub permanent_flags: Option<Vec<String>>,
}

impl MailboxStatus {
    /// Whether new keywords can be stored. Without a PERMANENTFLAGS
    /// response every flag is assumed storable (RFC 3501 §7.1).
    #[must_use]
    pub fn accepts_keywords(&self) -> bool {
        self.permanent_flags
            .as_ref()
            .is_none_or(|flags| flags.iter().any(|f| f == "\\*"))
    }
}

/// What ended an IDLE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    /// The mailbox now holds this many messages.
    Exists(u32),
    /// Nothing arrived before the timeout.
    Timeout,
}

/// An IMAP connection past the greeting.
pub struct ImapSession<S> {
    stream: FramedStream<S>,
    tags: TagGenerator,
    capabilities: Vec<String>,
}

impl<S> ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bye`] if the server refuses the connection, or an
    /// I/O or protocol error.
    pub async fn from_stream(mut stream: FramedStream<S>) -> Result<Self> {
        let greeting = stream.read_response().await?;
        match response::parse_untagged_status(&greeting) {
            Some((Status::Ok | Status::PreAuth, _)) => Ok(Self {
                stream,
                tags: TagGenerator::default(),
                capabilities: Vec::new(),
            }),
            Some((Status::Bye, text)) => Err(Error::Bye(text)),
            _ => Err(Error::Protocol(format!(
                "unexpected greeting: {}",
                String::from_utf8_lossy(&greeting).trim_end()
            ))),
        }
    }

    /// Runs a command and returns its untagged responses.
    async fn execute(&mut self, command: &str) -> Result<Vec<Vec<u8>>> {
        let tag = self.tags.next();
        self.stream.write_line(&format!("{tag} {command}")).await?;
        self.read_until_tagged(&tag).await
    }

    async fn read_until_tagged(&mut self, tag: &str) -> Result<Vec<Vec<u8>>> {
        let mut untagged = Vec::new();
        let mut bye = None;

        loop {
            let response = match self.stream.read_response().await {
                Ok(response) => response,
                Err(e) => return Err(bye.map_or(e, Error::Bye)),
            };

            if let Some((status, text)) = response::parse_tagged(&response, tag) {
                return match status {
                    Status::Ok => Ok(untagged),
                    Status::No => Err(Error::No(text)),
                    Status::Bad => Err(Error::Bad(text)),
                    Status::Bye | Status::PreAuth => Err(Error::Protocol(format!(
                        "unexpected tagged {status:?}: {text}"
                    ))),
                };
            }

            if let Some((Status::Bye, text)) = response::parse_untagged_status(&response) {
                bye = Some(text);
            }
            untagged.push(response);
        }
    }

    /// Logs in with a plaintext password.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] if the credentials are rejected.
    pub async fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let tag = self.tags.next();
        let command = format!("{tag} LOGIN {} {}", quote(user), quote(password));
        let shown = format!("{tag} LOGIN {} ***", quote(user));
        self.stream.write_secret(&command, &shown).await?;
        self.read_until_tagged(&tag).await?;
        debug!(user, "Logged in");
        Ok(())
    }

    /// Asks for the server capabilities and remembers them.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn capability(&mut self) -> Result<&[String]> {
        let responses = self.execute("CAPABILITY").await?;
        self.capabilities = response::parse_capabilities(&responses);
        Ok(&self.capabilities)
    }

    /// Checks a capability from the last [`ImapSession::capability`] call.
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Selects a mailbox read-write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] if the mailbox does not exist.
    pub async fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        let responses = self.execute(&format!("SELECT {}", quote(mailbox))).await?;

        let mut status = MailboxStatus::default();
        for response in &responses {
            if let Some(exists) = response::parse_exists(response) {
                status.exists = exists;
            } else if let Some(flags) = response::parse_permanent_flags(response) {
                status.permanent_flags = Some(flags);
            }
        }
        debug!(mailbox, exists = status.exists, "Mailbox selected");
        Ok(status)
    }

    /// Runs `UID SEARCH` with raw criteria.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bad`] if the server cannot parse the criteria.
    pub async fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>> {
        let responses = self.execute(&format!("UID SEARCH {criteria}")).await?;
        Ok(responses
            .iter()
            .filter_map(|r| response::parse_search(r))
            .flatten()
            .collect())
    }

    /// Fetches the full message with `uid` without setting `\Seen`.
    ///
    /// Returns `None` if the message vanished before it could be fetched.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn uid_fetch_body(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        let responses = self
            .execute(&format!("UID FETCH {uid} (BODY.PEEK[])"))
            .await?;
        Ok(responses.iter().find_map(|r| response::parse_fetch_body(r)))
    }

    /// Adds `flags` to every message in `uids`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn uid_store_add_flags(&mut self, uids: &[u32], flags: &[&str]) -> Result<()> {
        if uids.is_empty() || flags.is_empty() {
            return Ok(());
        }
        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.execute(&format!("UID STORE {set} +FLAGS.SILENT ({})", flags.join(" ")))
            .await?;
        Ok(())
    }

    /// Permanently removes messages flagged `\Deleted`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn expunge(&mut self) -> Result<()> {
        self.execute("EXPUNGE").await?;
        Ok(())
    }

    /// Idles until the mailbox grows or `limit` passes, then ends the IDLE.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects IDLE or the connection fails.
    pub async fn idle(&mut self, limit: Duration) -> Result<IdleEvent> {
        let tag = self.tags.next();
        self.stream.write_line(&format!("{tag} IDLE")).await?;

        loop {
            let response = self.stream.read_response().await?;
            if response::is_continuation(&response) {
                break;
            }
            if let Some((status, text)) = response::parse_tagged(&response, &tag) {
                return Err(match status {
                    Status::No => Error::No(text),
                    Status::Bad => Error::Bad(text),
                    _ => Error::Protocol(format!("IDLE ended before it started: {text}")),
                });
            }
        }

        let deadline = Instant::now() + limit;
        let event = loop {
            let Ok(response) = timeout_at(deadline, self.stream.wait_response()).await else {
                break IdleEvent::Timeout;
            };
            let response = response?;

            if let Some(exists) = response::parse_exists(&response) {
                break IdleEvent::Exists(exists);
            }
            if let Some((Status::Bye, text)) = response::parse_untagged_status(&response) {
                return Err(Error::Bye(text));
            }
            if response::parse_tagged(&response, &tag).is_some() {
                // Server ended the IDLE itself; no DONE needed
                return Ok(IdleEvent::Timeout);
            }
        };

        self.stream.write_line("DONE").await?;
        self.read_until_tagged(&tag).await?;
        Ok(event)
    }

    /// Logs out. A BYE or a closed connection afterwards is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if LOGOUT cannot be sent.
    pub async fn logout(mut self) -> Result<()> {
        match self.execute("LOGOUT").await {
            Ok(_) | Err(Error::Bye(_) | Error::Io(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
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
    use tokio_test::io::Builder;

    async fn session(mock: tokio_test::io::Mock) -> ImapSession<tokio_test::io::Mock> {
        ImapSession::from_stream(FramedStream::new(mock)).await.unwrap()
    }

    #[test]
    fn test_tag_generator() {
        let mut tags = TagGenerator::default();
        assert_eq!(tags.next(), "A0000");
        assert_eq!(tags.next(), "A0001");
    }

    #[test]
    fn test_accepts_keywords() {
        let mut status = MailboxStatus::default();
        assert!(status.accepts_keywords());
        status.permanent_flags = Some(vec!["\\Seen".into(), "\\Deleted".into()]);
        assert!(!status.accepts_keywords());
        status.permanent_flags = Some(vec!["\\Seen".into(), "\\*".into()]);
        assert!(status.accepts_keywords());
    }

    #[tokio::test]
    async fn test_greeting_bye() {
        let mock = Builder::new().read(b"* BYE too busy\r\n").build();
        let result = ImapSession::from_stream(FramedStream::new(mock)).await;
        assert!(matches!(result, Err(Error::Bye(ref t)) if t == "too busy"));
    }

    #[tokio::test]
    async fn test_login_and_select() {
        let mock = Builder::new()
            .read(b"* OK IMAP ready\r\n")
            .write(b"A0000 LOGIN \"user\" \"p\\\"w\"\r\n")
            .read(b"A0000 OK LOGIN completed\r\n")
            .write(b"A0001 SELECT \"INBOX\"\r\n")
            .read(b"* 3 EXISTS\r\n")
            .read(b"* 0 RECENT\r\n")
            .read(b"* OK [PERMANENTFLAGS (\\Seen \\Deleted)] Limited\r\n")
            .read(b"A0001 OK [READ-WRITE] SELECT completed\r\n")
            .build();

        let mut session = session(mock).await;
        session.login("user", "p\"w").await.unwrap();
        let status = session.select("INBOX").await.unwrap();
        assert_eq!(status.exists, 3);
        assert!(!status.accepts_keywords());
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGIN \"user\" \"bad\"\r\n")
            .read(b"A0000 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            .build();

        let mut session = session(mock).await;
        let err = session.login("user", "bad").await.unwrap_err();
        assert!(matches!(err, Error::No(ref t) if t.contains("Invalid credentials")));
    }

    #[tokio::test]
    async fn test_search_fetch_store_expunge() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 UID SEARCH NOT DELETED\r\n")
            .read(b"* SEARCH 4 9\r\n")
            .read(b"A0000 OK SEARCH completed\r\n")
            .write(b"A0001 UID FETCH 4 (BODY.PEEK[])\r\n")
            .read(b"* 1 FETCH (UID 4 BODY[] {5}\r\n")
            .read(b"hello)\r\n")
            .read(b"A0001 OK FETCH completed\r\n")
            .write(b"A0002 UID STORE 4,9 +FLAGS.SILENT (processed \\Deleted)\r\n")
            .read(b"A0002 OK STORE completed\r\n")
            .write(b"A0003 EXPUNGE\r\n")
            .read(b"* 1 EXPUNGE\r\n")
            .read(b"A0003 OK EXPUNGE completed\r\n")
            .build();

        let mut session = session(mock).await;
        assert_eq!(session.uid_search("NOT DELETED").await.unwrap(), vec![4, 9]);
        assert_eq!(session.uid_fetch_body(4).await.unwrap().unwrap(), b"hello");
        session
            .uid_store_add_flags(&[4, 9], &["processed", "\\Deleted"])
            .await
            .unwrap();
        session.expunge().await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_vanished_message() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 UID FETCH 8 (BODY.PEEK[])\r\n")
            .read(b"A0000 OK FETCH completed\r\n")
            .build();

        let mut session = session(mock).await;
        assert_eq!(session.uid_fetch_body(8).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_capability() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 IDLE\r\n")
            .read(b"A0000 OK done\r\n")
            .build();

        let mut session = session(mock).await;
        session.capability().await.unwrap();
        assert!(session.has_capability("idle"));
        assert!(!session.has_capability("CONDSTORE"));
    }

    #[tokio::test]
    async fn test_idle_exists() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* 1 RECENT\r\n")
            .read(b"* 4 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0000 OK IDLE terminated\r\n")
            .build();

        let mut session = session(mock).await;
        let event = session.idle(Duration::from_secs(60)).await.unwrap();
        assert_eq!(event, IdleEvent::Exists(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .wait(Duration::from_secs(120))
            .write(b"DONE\r\n")
            .read(b"A0000 OK IDLE terminated\r\n")
            .build();

        let mut session = session(mock).await;
        let event = session.idle(Duration::from_secs(30)).await.unwrap();
        assert_eq!(event, IdleEvent::Timeout);
    }

    #[tokio::test]
    async fn test_idle_rejected() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 IDLE\r\n")
            .read(b"A0000 BAD unknown command\r\n")
            .build();

        let mut session = session(mock).await;
        assert!(matches!(
            session.idle(Duration::from_secs(1)).await.unwrap_err(),
            Error::Bad(_)
        ));
    }

    #[tokio::test]
    async fn test_logout_tolerates_bye_and_close() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGOUT\r\n")
            .read(b"* BYE logging out\r\n")
            .build();

        session(mock).await.logout().await.unwrap();
    }
}
