//! Line-framed I/O shared by the IMAP and POP3 clients.
//!
//! Both protocols speak CRLF-terminated lines. IMAP responses may also
//! carry literals (`{n}\r\n` followed by n raw bytes).

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::info;

use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size to prevent memory exhaustion.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Longest line echoed by the wire log.
const MAX_LOGGED_LINE: usize = 200;

/// Buffered, line-oriented connection.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
    read_timeout: Option<Duration>,
    wire_log: bool,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream without a read timeout.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            read_timeout: None,
            wire_log: false,
        }
    }

    /// Fails reads that take longer than `limit`.
    #[must_use]
    pub const fn with_read_timeout(mut self, limit: Duration) -> Self {
        self.read_timeout = Some(limit);
        self
    }

    /// Logs every line sent and received.
    #[must_use]
    pub const fn with_wire_log(mut self, enabled: bool) -> Self {
        self.wire_log = enabled;
        self
    }

    /// Reads one CRLF-terminated line, CRLF included.
    ///
    /// # Errors
    ///
    /// Returns an error on EOF, an over-long line or a read timeout.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        let line = match self.read_timeout {
            Some(limit) => timeout(limit, self.read_line_raw())
                .await
                .map_err(|_| Error::Timeout(limit))??,
            None => self.read_line_raw().await?,
        };
        self.log_received(&line);
        Ok(line)
    }

    /// Reads a complete IMAP response, including any literals.
    ///
    /// # Errors
    ///
    /// Returns an error on EOF, an over-long line or literal, or a read
    /// timeout.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        match self.read_timeout {
            Some(limit) => timeout(limit, self.read_response_raw())
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => self.read_response_raw().await,
        }
    }

    /// Like [`FramedStream::read_response`] but ignores the read timeout;
    /// used while the server is expected to stay quiet (IDLE).
    ///
    /// # Errors
    ///
    /// Returns an error on EOF or an over-long line or literal.
    pub async fn wait_response(&mut self) -> Result<Vec<u8>> {
        self.read_response_raw().await
    }

    async fn read_response_raw(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();

        loop {
            let line = self.read_line_raw().await?;
            self.log_received(&line);
            response.extend_from_slice(&line);

            let Some(literal_len) = parse_literal_length(&line) else {
                break;
            };
            if literal_len > MAX_LITERAL_SIZE {
                return Err(Error::Protocol(format!(
                    "literal too large: {literal_len} bytes (max {MAX_LITERAL_SIZE})"
                )));
            }

            let mut literal = vec![0u8; literal_len];
            self.reader.read_exact(&mut literal).await?;
            if self.wire_log {
                info!(target: "mailsource_store::wire", "S: <{literal_len} bytes>");
            }
            response.extend_from_slice(&literal);
        }

        Ok(response)
    }

    async fn read_line_raw(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            // A CR may have ended the previous chunk
            if line.last() == Some(&b'\r') && buf[0] == b'\n' {
                line.push(b'\n');
                self.reader.consume(1);
                break;
            }

            if let Some(pos) = find_crlf(buf) {
                line.extend_from_slice(&buf[..pos + 2]);
                self.reader.consume(pos + 2);
                break;
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
        }

        Ok(line)
    }

    /// Writes one command line (CRLF appended).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.log_sent(line);
        self.send(line).await
    }

    /// Writes a command line that carries a secret; the wire log shows
    /// `shown` instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_secret(&mut self, line: &str, shown: &str) -> Result<()> {
        self.log_sent(shown);
        self.send(line).await
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(line.as_bytes());
        self.write_buffer.extend_from_slice(b"\r\n");

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;
        Ok(())
    }

    fn log_sent(&self, line: &str) {
        if self.wire_log {
            info!(target: "mailsource_store::wire", "C: {line}");
        }
    }

    fn log_received(&self, line: &[u8]) {
        if self.wire_log {
            let text = String::from_utf8_lossy(line);
            let text = text.trim_end();
            let shown: String = text.chars().take(MAX_LOGGED_LINE).collect();
            info!(target: "mailsource_store::wire", "S: {shown}");
        }
    }
}

/// Finds the position of CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parses a literal length from the end of a line.
///
/// Matches `{123}\r\n` and the non-synchronizing `{123+}\r\n`.
pub(crate) fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);
    let open = line.iter().rposition(|&b| b == b'{')?;

    let digits = &line[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
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

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"hello\r\n"), Some(5));
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"just\n"), None);
    }

    #[test]
    fn test_parse_literal_length() {
        assert_eq!(parse_literal_length(b"BODY[] {123}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"BODY[] {123+}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(parse_literal_length(b"no literal\r\n"), None);
        assert_eq!(parse_literal_length(b"incomplete {123"), None);
        assert_eq!(parse_literal_length(b"wrong {abc}\r\n"), None);
        assert_eq!(parse_literal_length(b"empty {}\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_line_split_crlf() {
        let mock = Builder::new().read(b"+OK hello\r").read(b"\nnext\r\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_line().await.unwrap(), b"+OK hello\r\n");
        assert_eq!(framed.read_line().await.unwrap(), b"next\r\n");
    }

    #[tokio::test]
    async fn test_read_response_with_literal() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (UID 7 BODY[] {5}\r\n")
            .read(b"hello)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, b"* 1 FETCH (UID 7 BODY[] {5}\r\nhello)\r\n");
    }

    #[tokio::test]
    async fn test_literal_may_contain_crlf() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY[] {7}\r\nab\r\n\r\n.)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);
        let response = framed.read_response().await.unwrap();
        assert!(response.ends_with(b"ab\r\n\r\n.)\r\n"));
    }

    #[tokio::test]
    async fn test_literal_size_validation() {
        let header = format!("* 1 FETCH (BODY[] {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_response().await.unwrap_err();
        assert!(err.to_string().contains("literal too large"));
    }

    #[tokio::test]
    async fn test_line_length_limit() {
        let long_line = "A".repeat(MAX_LINE_LENGTH + 100);
        let mock = Builder::new().read(long_line.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_line().await.unwrap_err();
        assert!(err.to_string().contains("line too long"));
    }

    #[tokio::test]
    async fn test_eof() {
        let mock = Builder::new().read(b"partial").build();
        let mut framed = FramedStream::new(mock);
        assert!(matches!(framed.read_line().await.unwrap_err(), Error::Io(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let mock = Builder::new().wait(Duration::from_secs(5)).build();
        let mut framed = FramedStream::new(mock).with_read_timeout(Duration::from_secs(1));
        assert!(matches!(
            framed.read_line().await.unwrap_err(),
            Error::Timeout(d) if d == Duration::from_secs(1)
        ));
    }

    #[tokio::test]
    async fn test_write_line_appends_crlf() {
        let mock = Builder::new()
            .write(b"USER bob\r\n")
            .write(b"PASS secret\r\n")
            .build();
        let mut framed = FramedStream::new(mock).with_wire_log(true);
        framed.write_line("USER bob").await.unwrap();
        framed.write_secret("PASS secret", "PASS ***").await.unwrap();
    }
}
