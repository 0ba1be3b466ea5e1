//! Plain and TLS streams to a mail store.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use mailsource_core::{SocketFactory, TransportProfile};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Connection settings taken from a [`TransportProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transport {
    /// How the socket is opened.
    pub socket_factory: SocketFactory,
    /// Retry in plaintext when the TLS handshake fails.
    pub fallback: bool,
    /// Limit for TCP connect plus handshake.
    pub connect_timeout: Duration,
    /// Limit for each read.
    pub read_timeout: Duration,
    /// Log every command and response line.
    pub wire_log: bool,
}

impl Transport {
    /// Reads the typed settings out of a profile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a property has an unusable value.
    pub fn from_profile(profile: &TransportProfile) -> Result<Self> {
        Ok(Self {
            socket_factory: profile.socket_factory()?,
            fallback: profile.fallback()?,
            connect_timeout: profile.connect_timeout()?,
            read_timeout: profile.read_timeout()?,
            wire_log: profile.debug()?,
        })
    }
}

/// A stream that can be either plaintext or TLS.
pub enum MailStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl MailStream {
    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Creates a TLS connector with the webpki root certificates.
#[must_use]
pub fn create_tls_connector() -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

/// Opens a stream to `host:port` the way `transport` says.
///
/// With a TLS socket factory and fallback enabled, a failed handshake is
/// retried over a fresh plaintext connection.
///
/// # Errors
///
/// Returns an error if the connection or handshake fails or exceeds the
/// connect timeout.
pub async fn connect(host: &str, port: u16, transport: &Transport) -> Result<MailStream> {
    match transport.socket_factory {
        SocketFactory::Plain => connect_plain(host, port, transport.connect_timeout).await,
        SocketFactory::Tls => match connect_tls(host, port, transport.connect_timeout).await {
            Err(e) if transport.fallback => {
                warn!(host, port, error = %e, "TLS handshake failed, falling back to plaintext");
                connect_plain(host, port, transport.connect_timeout).await
            }
            result => result,
        },
    }
}

async fn connect_tcp(host: &str, port: u16, limit: Duration) -> Result<TcpStream> {
    debug!(host, port, "Connecting");
    timeout(limit, TcpStream::connect((host, port)))
        .await
        .map_err(|_| Error::Timeout(limit))?
        .map_err(Into::into)
}

async fn connect_plain(host: &str, port: u16, limit: Duration) -> Result<MailStream> {
    Ok(MailStream::Plain(connect_tcp(host, port, limit).await?))
}

async fn connect_tls(host: &str, port: u16, limit: Duration) -> Result<MailStream> {
    let tcp = connect_tcp(host, port, limit).await?;
    let server_name = ServerName::try_from(host.to_string())?;
    let tls = timeout(limit, create_tls_connector().connect(server_name, tcp))
        .await
        .map_err(|_| Error::Timeout(limit))??;
    Ok(MailStream::Tls(Box::new(tls)))
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
    use mailsource_core::Protocol;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn transport(protocol: Protocol, overrides: &[(&str, &str)]) -> Transport {
        let overrides: Vec<(String, String)> = overrides
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Transport::from_profile(&TransportProfile::resolve(protocol, &overrides)).unwrap()
    }

    #[test]
    fn test_transport_from_profile() {
        let t = transport(Protocol::Imaps, &[]);
        assert_eq!(t.socket_factory, SocketFactory::Tls);
        assert!(!t.fallback);
        assert!(!t.wire_log);
        assert_eq!(t.read_timeout, Duration::from_secs(60));

        let t = transport(
            Protocol::Pop3,
            &[("mail.debug", "true"), ("mail.pop3.connectiontimeout", "100")],
        );
        assert_eq!(t.socket_factory, SocketFactory::Plain);
        assert!(t.wire_log);
        assert_eq!(t.connect_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_transport_from_bad_profile() {
        let profile = TransportProfile::resolve(
            Protocol::Imap,
            &[("mail.debug".to_string(), "yes please".to_string())],
        );
        assert!(matches!(
            Transport::from_profile(&profile).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[tokio::test]
    async fn test_connect_plain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hi").await.unwrap();
        });

        let mut stream = connect("127.0.0.1", port, &transport(Protocol::Imap, &[]))
            .await
            .unwrap();
        assert!(!stream.is_tls());
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tls_fallback_to_plain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            // First connection: answer the ClientHello with garbage.
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"* OK not tls at all\r\n").await;
            drop(socket);

            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ok").await.unwrap();
        });

        let t = transport(
            Protocol::Imaps,
            &[("mail.imap.socketFactory.fallback", "true")],
        );
        let mut stream = connect("127.0.0.1", port, &t).await.unwrap();
        assert!(!stream.is_tls());
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tls_without_fallback_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"* OK not tls at all\r\n").await;
        });

        let result = connect("127.0.0.1", port, &transport(Protocol::Imaps, &[])).await;
        assert!(result.is_err());
    }
}
