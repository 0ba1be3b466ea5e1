//! Minimal POP3 client (RFC 1939).

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::framed::FramedStream;
use crate::{Error, Result};

/// Mailbox size as reported by STAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaildropStat {
    /// Number of messages.
    pub count: usize,
    /// Total size in octets.
    pub size: u64,
}

/// A POP3 connection past the greeting.
pub struct Pop3Session<S> {
    stream: FramedStream<S>,
}

impl<S> Pop3Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pop3`] if the server greets with `-ERR`.
    pub async fn from_stream(stream: FramedStream<S>) -> Result<Self> {
        let mut session = Self { stream };
        session.read_status().await?;
        Ok(session)
    }

    /// Reads a status line and returns the text after `+OK`.
    async fn read_status(&mut self) -> Result<String> {
        let line = self.stream.read_line().await?;
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end();

        if let Some(text) = line.strip_prefix("+OK") {
            Ok(text.trim_start().to_string())
        } else if let Some(text) = line.strip_prefix("-ERR") {
            Err(Error::Pop3(text.trim_start().to_string()))
        } else {
            Err(Error::Protocol(format!("unexpected POP3 reply: {line}")))
        }
    }

    async fn command(&mut self, line: &str) -> Result<String> {
        self.stream.write_line(line).await?;
        self.read_status().await
    }

    /// Authenticates with USER and PASS.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pop3`] if either is rejected.
    pub async fn login(&mut self, user: &str, password: &str) -> Result<()> {
        self.command(&format!("USER {user}")).await?;
        self.stream
            .write_secret(&format!("PASS {password}"), "PASS ***")
            .await?;
        self.read_status().await?;
        debug!(user, "Logged in");
        Ok(())
    }

    /// Reports the number and total size of messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply cannot be parsed.
    pub async fn stat(&mut self) -> Result<MaildropStat> {
        let text = self.command("STAT").await?;
        let mut words = text.split_whitespace();
        let count = words.next().and_then(|w| w.parse().ok());
        let size = words.next().and_then(|w| w.parse().ok());
        match (count, size) {
            (Some(count), Some(size)) => Ok(MaildropStat { count, size }),
            _ => Err(Error::Protocol(format!("malformed STAT reply: {text}"))),
        }
    }

    /// Retrieves message `n` (1-based), dot-unstuffed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pop3`] if there is no such message.
    pub async fn retr(&mut self, n: usize) -> Result<Vec<u8>> {
        self.command(&format!("RETR {n}")).await?;

        let mut message = Vec::new();
        loop {
            let line = self.stream.read_line().await?;
            if line == b".\r\n" {
                break;
            }
            message.extend_from_slice(unstuff(&line));
        }
        Ok(message)
    }

    /// Marks message `n` for deletion at QUIT.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pop3`] if there is no such message.
    pub async fn dele(&mut self, n: usize) -> Result<()> {
        self.command(&format!("DELE {n}")).await?;
        Ok(())
    }

    /// Ends the session, committing deletions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pop3`] if the server could not remove the messages.
    pub async fn quit(mut self) -> Result<()> {
        self.command("QUIT").await?;
        Ok(())
    }
}

/// Removes the byte-stuffed leading dot of a multi-line response line.
fn unstuff(line: &[u8]) -> &[u8] {
    if line.starts_with(b"..") {
        &line[1..]
    } else {
        line
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
    use proptest::prelude::*;
    use tokio_test::io::Builder;

    /// Byte-stuffs a CRLF-terminated message for transmission.
    fn stuff(message: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for line in message.split_inclusive(|&b| b == b'\n') {
            if line.starts_with(b".") {
                out.push(b'.');
            }
            out.extend_from_slice(line);
        }
        out.extend_from_slice(b".\r\n");
        out
    }

    #[test]
    fn test_unstuff() {
        assert_eq!(unstuff(b"..hidden\r\n"), b".hidden\r\n");
        assert_eq!(unstuff(b"plain\r\n"), b"plain\r\n");
        assert_eq!(unstuff(b".\r\n"), b".\r\n");
    }

    #[tokio::test]
    async fn test_session() {
        let mock = Builder::new()
            .read(b"+OK POP3 ready\r\n")
            .write(b"USER bob\r\n")
            .read(b"+OK\r\n")
            .write(b"PASS secret\r\n")
            .read(b"+OK logged in\r\n")
            .write(b"STAT\r\n")
            .read(b"+OK 2 320\r\n")
            .write(b"RETR 1\r\n")
            .read(b"+OK 120 octets\r\n")
            .read(b"Subject: hi\r\n\r\n..dot\r\nfoo\r\n.\r\n")
            .write(b"DELE 1\r\n")
            .read(b"+OK deleted\r\n")
            .write(b"QUIT\r\n")
            .read(b"+OK bye\r\n")
            .build();

        let mut session = Pop3Session::from_stream(FramedStream::new(mock)).await.unwrap();
        session.login("bob", "secret").await.unwrap();
        assert_eq!(session.stat().await.unwrap(), MaildropStat { count: 2, size: 320 });
        assert_eq!(
            session.retr(1).await.unwrap(),
            b"Subject: hi\r\n\r\n.dot\r\nfoo\r\n"
        );
        session.dele(1).await.unwrap();
        session.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_password() {
        let mock = Builder::new()
            .read(b"+OK ready\r\n")
            .write(b"USER bob\r\n")
            .read(b"+OK\r\n")
            .write(b"PASS nope\r\n")
            .read(b"-ERR [AUTH] invalid password\r\n")
            .build();

        let mut session = Pop3Session::from_stream(FramedStream::new(mock)).await.unwrap();
        let err = session.login("bob", "nope").await.unwrap_err();
        assert!(matches!(err, Error::Pop3(ref t) if t == "[AUTH] invalid password"));
    }

    #[tokio::test]
    async fn test_greeting_err() {
        let mock = Builder::new().read(b"-ERR go away\r\n").build();
        assert!(matches!(
            Pop3Session::from_stream(FramedStream::new(mock)).await,
            Err(Error::Pop3(_))
        ));
    }

    proptest! {
        #[test]
        fn retr_undoes_dot_stuffing(
            lines in proptest::collection::vec("[.a-z ]{0,12}", 0..8),
        ) {
            let message: Vec<u8> = lines
                .iter()
                .flat_map(|l| format!("{l}\r\n").into_bytes())
                .collect();
            let stuffed = stuff(&message);

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let received = runtime.block_on(async {
                let mock = Builder::new()
                    .read(b"+OK\r\n")
                    .write(b"RETR 1\r\n")
                    .read(b"+OK\r\n")
                    .read(&stuffed)
                    .build();
                let mut session = Pop3Session::from_stream(FramedStream::new(mock)).await.unwrap();
                session.retr(1).await.unwrap()
            });
            prop_assert_eq!(received, message);
        }
    }
}
