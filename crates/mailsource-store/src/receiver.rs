//! One receiver per retrieval strategy.
//!
//! Polling receivers open a fresh connection per call and return the raw
//! messages they retrieved. The idle receiver keeps a connection open and
//! pushes messages into a channel until the channel closes.

use std::time::Duration;

use mailsource_core::{ImapRetrieval, Pop3Retrieval, RetrievalStrategy, StoreUrl};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::framed::FramedStream;
use crate::imap::{IdleEvent, ImapSession};
use crate::pop3::Pop3Session;
use crate::stream::{self, MailStream, Transport};
use crate::{Error, Result};

/// Flag stored when the mailbox refuses custom keywords.
const FALLBACK_FLAG: &str = "\\Flagged";

/// Timing of the idle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleSettings {
    /// Re-issue IDLE after this long without news.
    pub timeout: Duration,
    /// Wait this long before reconnecting after a failure.
    pub reconnect_delay: Duration,
}

impl Default for IdleSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            reconnect_delay: Duration::from_secs(10),
        }
    }
}

/// Builds the `UID SEARCH` criteria for unprocessed messages.
#[must_use]
pub fn search_criteria(imap: &ImapRetrieval, accepts_keywords: bool) -> String {
    let mut criteria = String::from("NOT DELETED");
    if imap.mark_as_read {
        criteria.push_str(" NOT SEEN");
    }
    if accepts_keywords {
        criteria.push_str(" NOT KEYWORD ");
        criteria.push_str(&imap.user_flag);
    } else {
        criteria.push_str(" NOT FLAGGED");
    }
    if let Some(expression) = &imap.selector_expression {
        criteria.push_str(" (");
        criteria.push_str(expression);
        criteria.push(')');
    }
    criteria
}

/// Flags stored on every retrieved message.
#[must_use]
pub fn processed_flags(imap: &ImapRetrieval, accepts_keywords: bool) -> Vec<&str> {
    let mut flags = vec![if accepts_keywords {
        imap.user_flag.as_str()
    } else {
        FALLBACK_FLAG
    }];
    if imap.mark_as_read {
        flags.push("\\Seen");
    }
    if imap.delete {
        flags.push("\\Deleted");
    }
    flags
}

async fn open(url: &StoreUrl, transport: &Transport) -> Result<FramedStream<MailStream>> {
    let stream = stream::connect(&url.host, url.port, transport).await?;
    Ok(FramedStream::new(stream)
        .with_read_timeout(transport.read_timeout)
        .with_wire_log(transport.wire_log))
}

async fn open_imap(
    url: &StoreUrl,
    transport: &Transport,
) -> Result<ImapSession<MailStream>> {
    let mut session = ImapSession::from_stream(open(url, transport).await?).await?;
    session.login(url.user(), url.password()).await?;
    Ok(session)
}

/// UIDs of unprocessed messages in the selected mailbox, oldest first.
async fn unprocessed_uids<S>(
    session: &mut ImapSession<S>,
    imap: &ImapRetrieval,
    accepts_keywords: bool,
    limit: Option<usize>,
) -> Result<Vec<u32>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut uids = session
        .uid_search(&search_criteria(imap, accepts_keywords))
        .await?;
    if let Some(limit) = limit {
        uids.truncate(limit);
    }
    Ok(uids)
}

/// Fetches up to `limit` unprocessed messages from the selected mailbox
/// and flags them as processed.
async fn retrieve_imap<S>(
    session: &mut ImapSession<S>,
    imap: &ImapRetrieval,
    accepts_keywords: bool,
    limit: Option<usize>,
) -> Result<Vec<Vec<u8>>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let uids = unprocessed_uids(session, imap, accepts_keywords, limit).await?;
    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let mut messages = Vec::with_capacity(uids.len());
    let mut fetched = Vec::with_capacity(uids.len());
    for uid in uids {
        match session.uid_fetch_body(uid).await? {
            Some(body) => {
                messages.push(body);
                fetched.push(uid);
            }
            None => debug!(uid, "Message vanished before fetch"),
        }
    }

    session
        .uid_store_add_flags(&fetched, &processed_flags(imap, accepts_keywords))
        .await?;
    if imap.delete {
        session.expunge().await?;
    }

    debug!(count = messages.len(), "Retrieved IMAP messages");
    Ok(messages)
}

/// Sends each unprocessed message to `tx` and flags it only once the
/// channel has taken it. Returns `false` if the channel closed.
async fn forward_imap<S>(
    session: &mut ImapSession<S>,
    imap: &ImapRetrieval,
    accepts_keywords: bool,
    tx: &mpsc::Sender<Vec<u8>>,
) -> Result<bool>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let flags = processed_flags(imap, accepts_keywords);
    let mut channel_open = true;
    let mut forwarded = 0usize;

    for uid in unprocessed_uids(session, imap, accepts_keywords, None).await? {
        let Some(body) = session.uid_fetch_body(uid).await? else {
            debug!(uid, "Message vanished before fetch");
            continue;
        };
        if tx.send(body).await.is_err() {
            debug!(uid, "Channel closed, leaving message unflagged");
            channel_open = false;
            break;
        }
        session.uid_store_add_flags(&[uid], &flags).await?;
        forwarded += 1;
    }

    if imap.delete && forwarded > 0 {
        session.expunge().await?;
    }
    if forwarded > 0 {
        debug!(count = forwarded, "Forwarded IMAP messages");
    }
    Ok(channel_open)
}

/// Polls an IMAP mailbox.
#[derive(Debug, Clone)]
pub struct ImapPollReceiver {
    url: StoreUrl,
    imap: ImapRetrieval,
    transport: Transport,
}

impl ImapPollReceiver {
    /// Creates a receiver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the transport profile is unusable.
    pub fn new(url: StoreUrl, imap: ImapRetrieval) -> Result<Self> {
        let transport = Transport::from_profile(&imap.transport)?;
        Ok(Self {
            url,
            imap,
            transport,
        })
    }

    /// Runs one poll: connect, fetch at most `limit` messages, flag them,
    /// disconnect.
    ///
    /// # Errors
    ///
    /// Returns any connection or protocol error.
    pub async fn receive(&self, limit: Option<usize>) -> Result<Vec<Vec<u8>>> {
        let mut session = open_imap(&self.url, &self.transport).await?;
        let status = session.select(&self.url.mailbox).await?;
        let messages =
            retrieve_imap(&mut session, &self.imap, status.accepts_keywords(), limit).await?;
        session.logout().await?;
        Ok(messages)
    }
}

/// Polls a POP3 maildrop.
#[derive(Debug, Clone)]
pub struct Pop3PollReceiver {
    url: StoreUrl,
    pop3: Pop3Retrieval,
    transport: Transport,
}

impl Pop3PollReceiver {
    /// Creates a receiver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the transport profile is unusable.
    pub fn new(url: StoreUrl, pop3: Pop3Retrieval) -> Result<Self> {
        let transport = Transport::from_profile(&pop3.transport)?;
        Ok(Self {
            url,
            pop3,
            transport,
        })
    }

    /// Runs one poll: connect, retrieve at most `limit` messages, delete
    /// them if configured, quit.
    ///
    /// # Errors
    ///
    /// Returns any connection or protocol error.
    pub async fn receive(&self, limit: Option<usize>) -> Result<Vec<Vec<u8>>> {
        let mut session = Pop3Session::from_stream(open(&self.url, &self.transport).await?).await?;
        session.login(self.url.user(), self.url.password()).await?;

        let stat = session.stat().await?;
        let count = limit.map_or(stat.count, |limit| stat.count.min(limit));

        let mut messages = Vec::with_capacity(count);
        for n in 1..=count {
            messages.push(session.retr(n).await?);
            if self.pop3.delete {
                session.dele(n).await?;
            }
        }

        session.quit().await?;
        debug!(count = messages.len(), "Retrieved POP3 messages");
        Ok(messages)
    }
}

/// Watches an IMAP mailbox with IDLE.
#[derive(Debug, Clone)]
pub struct ImapIdleReceiver {
    url: StoreUrl,
    imap: ImapRetrieval,
    transport: Transport,
    settings: IdleSettings,
}

impl ImapIdleReceiver {
    /// Creates a receiver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the transport profile is unusable.
    pub fn new(url: StoreUrl, imap: ImapRetrieval, settings: IdleSettings) -> Result<Self> {
        let transport = Transport::from_profile(&imap.transport)?;
        Ok(Self {
            url,
            imap,
            transport,
            settings,
        })
    }

    /// Sends every matching message to `tx`, reconnecting after failures,
    /// until `tx` is closed. A message is flagged (and expunged when
    /// deleting) only after `tx` accepted it.
    pub async fn run(&self, tx: mpsc::Sender<Vec<u8>>) {
        loop {
            match self.session(&tx).await {
                Ok(()) => {
                    info!("Idle receiver stopped");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Idle session failed");
                    tokio::select! {
                        () = tokio::time::sleep(self.settings.reconnect_delay) => {}
                        () = tx.closed() => return,
                    }
                    info!(url = %self.url, "Reconnecting");
                }
            }
        }
    }

    /// One connection's worth of idling. `Ok` means the channel closed.
    async fn session(&self, tx: &mpsc::Sender<Vec<u8>>) -> Result<()> {
        let mut session = open_imap(&self.url, &self.transport).await?;
        session.capability().await?;
        if !session.has_capability("IDLE") {
            return Err(Error::NotSupported("IDLE".to_string()));
        }
        let status = session.select(&self.url.mailbox).await?;
        let accepts_keywords = status.accepts_keywords();
        info!(url = %self.url, "Idling");

        loop {
            if !forward_imap(&mut session, &self.imap, accepts_keywords, tx).await? {
                return Ok(());
            }

            let event = tokio::select! {
                event = session.idle(self.settings.timeout) => event?,
                () = tx.closed() => return Ok(()),
            };
            match event {
                IdleEvent::Exists(count) => debug!(count, "Mailbox changed"),
                IdleEvent::Timeout => debug!("IDLE timed out, re-issuing"),
            }
        }
    }
}

/// The receiver for whichever strategy was selected.
#[derive(Debug, Clone)]
pub enum Receiver {
    /// Polls IMAP.
    ImapPoll(ImapPollReceiver),
    /// Polls POP3.
    Pop3Poll(Pop3PollReceiver),
    /// Idles on IMAP.
    ImapIdle(ImapIdleReceiver),
}

impl Receiver {
    /// Builds the receiver for `strategy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the transport profile is unusable.
    pub fn for_strategy(
        url: &StoreUrl,
        strategy: &RetrievalStrategy,
        idle: IdleSettings,
    ) -> Result<Self> {
        if url.protocol.is_imap() && url.user.is_none() {
            warn!(url = %url, "No user in store URL, logging in with an empty name");
        }

        Ok(match strategy {
            RetrievalStrategy::ImapPoll(imap) => {
                Self::ImapPoll(ImapPollReceiver::new(url.clone(), imap.clone())?)
            }
            RetrievalStrategy::Pop3Poll(pop3) => {
                Self::Pop3Poll(Pop3PollReceiver::new(url.clone(), pop3.clone())?)
            }
            RetrievalStrategy::ImapIdle(imap) => {
                Self::ImapIdle(ImapIdleReceiver::new(url.clone(), imap.clone(), idle)?)
            }
        })
    }

    /// Runs one poll for the polling strategies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] for the idle strategy, or any
    /// connection or protocol error.
    pub async fn poll(&self, limit: Option<usize>) -> Result<Vec<Vec<u8>>> {
        match self {
            Self::ImapPoll(receiver) => receiver.receive(limit).await,
            Self::Pop3Poll(receiver) => receiver.receive(limit).await,
            Self::ImapIdle(_) => Err(Error::NotSupported("polling an idle receiver".to_string())),
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
    use mailsource_core::{Protocol, TransportProfile};
    use tokio_test::io::Builder;

    fn imap(mark_as_read: bool, delete: bool, selector: Option<&str>) -> ImapRetrieval {
        ImapRetrieval {
            delete,
            mark_as_read,
            user_flag: "done".into(),
            selector_expression: selector.map(str::to_string),
            transport: TransportProfile::resolve(Protocol::Imap, &[]),
        }
    }

    #[test]
    fn test_search_criteria() {
        assert_eq!(
            search_criteria(&imap(false, true, None), true),
            "NOT DELETED NOT KEYWORD done"
        );
        assert_eq!(
            search_criteria(&imap(true, false, Some("FROM boss")), true),
            "NOT DELETED NOT SEEN NOT KEYWORD done (FROM boss)"
        );
        assert_eq!(
            search_criteria(&imap(false, false, None), false),
            "NOT DELETED NOT FLAGGED"
        );
    }

    #[test]
    fn test_processed_flags() {
        assert_eq!(processed_flags(&imap(false, false, None), true), vec!["done"]);
        assert_eq!(
            processed_flags(&imap(true, true, None), false),
            vec!["\\Flagged", "\\Seen", "\\Deleted"]
        );
    }

    #[tokio::test]
    async fn test_retrieve_imap_respects_limit() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 UID SEARCH NOT DELETED NOT SEEN NOT KEYWORD done\r\n")
            .read(b"* SEARCH 3 5 8\r\n")
            .read(b"A0000 OK done\r\n")
            .write(b"A0001 UID FETCH 3 (BODY.PEEK[])\r\n")
            .read(b"* 1 FETCH (UID 3 BODY[] {3}\r\none)\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 UID FETCH 5 (BODY.PEEK[])\r\n")
            .read(b"A0002 OK done\r\n")
            .write(b"A0003 UID STORE 3 +FLAGS.SILENT (done \\Seen)\r\n")
            .read(b"A0003 OK done\r\n")
            .build();

        let mut session = ImapSession::from_stream(FramedStream::new(mock)).await.unwrap();
        let messages = retrieve_imap(&mut session, &imap(true, false, None), true, Some(2))
            .await
            .unwrap();
        assert_eq!(messages, vec![b"one".to_vec()]);
    }

    #[tokio::test]
    async fn test_retrieve_imap_nothing_new() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 UID SEARCH NOT DELETED NOT FLAGGED\r\n")
            .read(b"* SEARCH\r\n")
            .read(b"A0000 OK done\r\n")
            .build();

        let mut session = ImapSession::from_stream(FramedStream::new(mock)).await.unwrap();
        let messages = retrieve_imap(&mut session, &imap(false, true, None), false, None)
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_forward_imap_flags_each_message_after_send() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 UID SEARCH NOT DELETED NOT KEYWORD done\r\n")
            .read(b"* SEARCH 4 7\r\n")
            .read(b"A0000 OK done\r\n")
            .write(b"A0001 UID FETCH 4 (BODY.PEEK[])\r\n")
            .read(b"* 1 FETCH (UID 4 BODY[] {4}\r\nfour)\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 UID STORE 4 +FLAGS.SILENT (done \\Deleted)\r\n")
            .read(b"A0002 OK done\r\n")
            .write(b"A0003 UID FETCH 7 (BODY.PEEK[])\r\n")
            .read(b"* 2 FETCH (UID 7 BODY[] {5}\r\nseven)\r\n")
            .read(b"A0003 OK done\r\n")
            .write(b"A0004 UID STORE 7 +FLAGS.SILENT (done \\Deleted)\r\n")
            .read(b"A0004 OK done\r\n")
            .write(b"A0005 EXPUNGE\r\n")
            .read(b"A0005 OK done\r\n")
            .build();

        let (tx, mut rx) = mpsc::channel(2);
        let mut session = ImapSession::from_stream(FramedStream::new(mock)).await.unwrap();
        assert!(forward_imap(&mut session, &imap(false, true, None), true, &tx)
            .await
            .unwrap());
        assert_eq!(rx.recv().await.unwrap(), b"four");
        assert_eq!(rx.recv().await.unwrap(), b"seven");
    }

    #[tokio::test]
    async fn test_forward_imap_closed_channel_leaves_message_unflagged() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 UID SEARCH NOT DELETED NOT KEYWORD done\r\n")
            .read(b"* SEARCH 4\r\n")
            .read(b"A0000 OK done\r\n")
            .write(b"A0001 UID FETCH 4 (BODY.PEEK[])\r\n")
            .read(b"* 1 FETCH (UID 4 BODY[] {4}\r\nfour)\r\n")
            .read(b"A0001 OK done\r\n")
            .build();

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut session = ImapSession::from_stream(FramedStream::new(mock)).await.unwrap();
        assert!(!forward_imap(&mut session, &imap(false, true, None), true, &tx)
            .await
            .unwrap());
    }

    #[test]
    fn test_for_strategy() {
        let url = StoreUrl::parse("imap://u:p@localhost/INBOX").unwrap();
        let receiver = Receiver::for_strategy(
            &url,
            &RetrievalStrategy::ImapIdle(imap(false, true, None)),
            IdleSettings::default(),
        )
        .unwrap();
        assert!(matches!(receiver, Receiver::ImapIdle(_)));
    }

    #[tokio::test]
    async fn test_poll_on_idle_receiver() {
        let url = StoreUrl::parse("imap://u:p@localhost/INBOX").unwrap();
        let receiver = Receiver::for_strategy(
            &url,
            &RetrievalStrategy::ImapIdle(imap(false, true, None)),
            IdleSettings::default(),
        )
        .unwrap();
        assert!(matches!(receiver.poll(Some(1)).await, Err(Error::NotSupported(_))));
    }
}
