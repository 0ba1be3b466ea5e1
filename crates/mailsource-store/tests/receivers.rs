//! End-to-end retrieval against scripted in-process IMAP and POP3 servers.

#![allow(clippy::unwrap_used, clippy::similar_names)]

use std::time::Duration;

use mailsource_core::{MailSourceFlow, MailSourceProperties, OutputRecord};
use mailsource_store::{IdleSettings, Receiver};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

const MESSAGE: &str = "From: Sender <sender@example.com>\r\n\
To: Foo <foo@example.com>, bar@example.com\r\n\
Cc: cc@example.com\r\n\
Bcc: bcc@example.com\r\n\
Subject: Test\r\n\
\r\n\
foo\r\n\
\r\n";

struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    fn new(socket: TcpStream) -> Self {
        let (reader, writer) = socket.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
    }

    async fn expect(&mut self, line: &str) {
        let mut received = String::new();
        self.reader.read_line(&mut received).await.unwrap();
        assert_eq!(received, format!("{line}\r\n"));
    }

    async fn exchange(&mut self, line: &str, reply: &str) {
        self.expect(line).await;
        self.send(reply).await;
    }

    /// Everything the client sends until it hangs up.
    async fn until_closed(&mut self) -> String {
        let mut rest = String::new();
        while self.reader.read_line(&mut rest).await.unwrap() > 0 {}
        rest
    }
}

async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn fetch_reply(tag: &str, uid: u32) -> String {
    format!(
        "* {uid} FETCH (UID {uid} BODY[] {{{}}}\r\n{MESSAGE})\r\n{tag} OK FETCH completed\r\n",
        MESSAGE.len()
    )
}

async fn imap_greet_login(peer: &mut Peer) {
    peer.send("* OK IMAP ready\r\n").await;
    peer.exchange("A0000 LOGIN \"user\" \"pw\"", "A0000 OK LOGIN completed\r\n")
        .await;
}

async fn imap_select(peer: &mut Peer, tag: &str) {
    peer.exchange(
        &format!("{tag} SELECT \"INBOX\""),
        &format!(
            "* 1 EXISTS\r\n* OK [PERMANENTFLAGS (\\Seen \\Deleted \\*)] Flags\r\n{tag} OK [READ-WRITE] SELECT completed\r\n"
        ),
    )
    .await;
}

fn assert_record(record: &OutputRecord) {
    assert!(record.payload.ends_with("foo\r\n\r\n"));
    assert_eq!(
        record.headers.envelope.to,
        vec!["Foo <foo@example.com>", "bar@example.com"]
    );
    assert_eq!(record.headers.envelope.cc, vec!["cc@example.com"]);
    assert_eq!(record.headers.envelope.bcc, vec!["bcc@example.com"]);
    assert_eq!(record.headers.subject.as_deref(), Some("Test"));
}

#[tokio::test]
async fn imap_poll_marks_read_and_keeps_message() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut peer = Peer::new(socket);
        imap_greet_login(&mut peer).await;
        imap_select(&mut peer, "A0001").await;
        peer.exchange(
            "A0002 UID SEARCH NOT DELETED NOT SEEN NOT KEYWORD mail-source-adapter",
            "* SEARCH 1\r\nA0002 OK SEARCH completed\r\n",
        )
        .await;
        peer.exchange("A0003 UID FETCH 1 (BODY.PEEK[])", &fetch_reply("A0003", 1))
            .await;
        peer.exchange(
            "A0004 UID STORE 1 +FLAGS.SILENT (mail-source-adapter \\Seen)",
            "A0004 OK STORE completed\r\n",
        )
        .await;
        peer.exchange("A0005 LOGOUT", "* BYE bye\r\nA0005 OK LOGOUT completed\r\n")
            .await;
    });

    let mut properties = MailSourceProperties::new(format!("imap://user:pw@127.0.0.1:{port}/INBOX"));
    properties.mark_as_read = true;
    properties.delete = false;
    let flow = MailSourceFlow::configure(&properties).unwrap();
    assert_eq!(flow.strategy().name(), "imap-poll");

    let receiver =
        Receiver::for_strategy(flow.url(), flow.strategy(), IdleSettings::default()).unwrap();
    let messages = receiver.poll(Some(1)).await.unwrap();
    server.await.unwrap();

    let mut sink: Vec<OutputRecord> = Vec::new();
    for raw in &messages {
        assert!(flow.dispatch(raw, &mut sink).unwrap());
    }
    assert_eq!(sink.len(), 1);
    assert_record(&sink[0]);
}

#[tokio::test]
async fn pop3_poll_deletes_by_default() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut peer = Peer::new(socket);
        peer.send("+OK POP3 ready\r\n").await;
        peer.exchange("USER user", "+OK\r\n").await;
        peer.exchange("PASS pw", "+OK logged in\r\n").await;
        peer.exchange("STAT", &format!("+OK 1 {}\r\n", MESSAGE.len())).await;
        peer.exchange("RETR 1", &format!("+OK message follows\r\n{MESSAGE}.\r\n"))
            .await;
        peer.exchange("DELE 1", "+OK deleted\r\n").await;
        peer.exchange("QUIT", "+OK bye\r\n").await;
    });

    let properties = MailSourceProperties::new(format!("pop3://user:pw@127.0.0.1:{port}"));
    let flow = MailSourceFlow::configure(&properties).unwrap();
    assert_eq!(flow.strategy().name(), "pop3-poll");

    let receiver =
        Receiver::for_strategy(flow.url(), flow.strategy(), IdleSettings::default()).unwrap();
    let messages = receiver.poll(None).await.unwrap();
    server.await.unwrap();

    let mut sink: Vec<OutputRecord> = Vec::new();
    for raw in &messages {
        flow.dispatch(raw, &mut sink).unwrap();
    }
    assert_eq!(sink.len(), 1);
    assert_record(&sink[0]);
}

#[tokio::test]
async fn imap_idle_delivers_and_stops_when_channel_closes() {
    let (listener, port) = listen().await;
    let (idling_tx, idling_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut peer = Peer::new(socket);
        imap_greet_login(&mut peer).await;
        peer.exchange(
            "A0001 CAPABILITY",
            "* CAPABILITY IMAP4rev1 IDLE\r\nA0001 OK done\r\n",
        )
        .await;
        imap_select(&mut peer, "A0002").await;
        peer.exchange(
            "A0003 UID SEARCH NOT DELETED NOT KEYWORD mail-source-adapter",
            "* SEARCH 1\r\nA0003 OK SEARCH completed\r\n",
        )
        .await;
        peer.exchange("A0004 UID FETCH 1 (BODY.PEEK[])", &fetch_reply("A0004", 1))
            .await;
        peer.exchange(
            "A0005 UID STORE 1 +FLAGS.SILENT (mail-source-adapter \\Deleted)",
            "A0005 OK STORE completed\r\n",
        )
        .await;
        peer.exchange("A0006 EXPUNGE", "* 1 EXPUNGE\r\nA0006 OK done\r\n")
            .await;
        peer.exchange("A0007 IDLE", "+ idling\r\n").await;
        idling_tx.send(()).unwrap();
        peer.until_closed().await;
    });

    let mut properties = MailSourceProperties::new(format!("imap://user:pw@127.0.0.1:{port}/INBOX"));
    properties.idle_imap = true;
    let flow = MailSourceFlow::configure(&properties).unwrap();
    assert_eq!(flow.strategy().name(), "imap-idle");

    let Receiver::ImapIdle(receiver) =
        Receiver::for_strategy(flow.url(), flow.strategy(), IdleSettings::default()).unwrap()
    else {
        panic!("expected an idle receiver");
    };

    let (tx, mut rx) = mpsc::channel(4);
    let running = tokio::spawn(async move { receiver.run(tx).await });

    let raw = rx.recv().await.unwrap();
    let mut sink: Vec<OutputRecord> = Vec::new();
    flow.dispatch(&raw, &mut sink).unwrap();
    assert_record(&sink[0]);

    idling_rx.await.unwrap();
    drop(rx);
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn imap_idle_flags_only_messages_the_channel_took() {
    let (listener, port) = listen().await;
    let (fetched_tx, fetched_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut peer = Peer::new(socket);
        imap_greet_login(&mut peer).await;
        peer.exchange(
            "A0001 CAPABILITY",
            "* CAPABILITY IMAP4rev1 IDLE\r\nA0001 OK done\r\n",
        )
        .await;
        imap_select(&mut peer, "A0002").await;
        peer.exchange(
            "A0003 UID SEARCH NOT DELETED NOT KEYWORD mail-source-adapter",
            "* SEARCH 1 2\r\nA0003 OK SEARCH completed\r\n",
        )
        .await;
        peer.exchange("A0004 UID FETCH 1 (BODY.PEEK[])", &fetch_reply("A0004", 1))
            .await;
        peer.exchange(
            "A0005 UID STORE 1 +FLAGS.SILENT (mail-source-adapter \\Deleted)",
            "A0005 OK STORE completed\r\n",
        )
        .await;
        peer.exchange("A0006 UID FETCH 2 (BODY.PEEK[])", &fetch_reply("A0006", 2))
            .await;
        fetched_tx.send(()).unwrap();
        // UID 1 was flagged, so it is still expunged
        peer.exchange("A0007 EXPUNGE", "* 1 EXPUNGE\r\nA0007 OK done\r\n")
            .await;
        peer.until_closed().await
    });

    let mut properties = MailSourceProperties::new(format!("imap://user:pw@127.0.0.1:{port}/INBOX"));
    properties.idle_imap = true;
    let flow = MailSourceFlow::configure(&properties).unwrap();

    let Receiver::ImapIdle(receiver) =
        Receiver::for_strategy(flow.url(), flow.strategy(), IdleSettings::default()).unwrap()
    else {
        panic!("expected an idle receiver");
    };

    // Room for one message: the second send waits until the consumer leaves.
    let (tx, mut rx) = mpsc::channel(1);
    let running = tokio::spawn(async move { receiver.run(tx).await });

    fetched_rx.await.unwrap();
    rx.close();

    let raw = rx.recv().await.unwrap();
    let mut sink: Vec<OutputRecord> = Vec::new();
    flow.dispatch(&raw, &mut sink).unwrap();
    assert_record(&sink[0]);

    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(rx.recv().await.is_none());

    let after_expunge = server.await.unwrap();
    assert!(
        !after_expunge.contains("STORE"),
        "UID 2 was flagged: {after_expunge:?}"
    );
    assert!(after_expunge.is_empty());
}
