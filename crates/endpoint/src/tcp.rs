//! Line-oriented TCP sender.
//!
//! Frames are newline-terminated; the FIX payload keeps its internal SOH
//! delimiters (and its trailing SOH) inside the line.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::EndpointError;
use crate::sender::EndpointSender;
use crate::uri::{EndpointScheme, EndpointUri};

/// A sender for one `netty:tcp://host:port` destination.
pub struct TcpLineSender {
    addr: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    reuse_channel: bool,
    disconnect_after_send: bool,
    conn: Mutex<Option<TcpStream>>,
}

impl TcpLineSender {
    /// Build a sender from a parsed URI. Connection behaviour comes from
    /// the URI parameters (`connectTimeout`, `requestTimeout`,
    /// `reuseChannel`, `disconnect`), with the Netty send defaults as
    /// fallbacks.
    pub fn from_uri(uri: &EndpointUri) -> Result<Self, EndpointError> {
        let EndpointScheme::NettyTcp { host, port } = &uri.scheme else {
            return Err(EndpointError::UnsupportedScheme(uri.base()));
        };
        Ok(Self {
            addr: format!("{host}:{port}"),
            connect_timeout: Duration::from_millis(uri.param_u64("connectTimeout").unwrap_or(2000)),
            request_timeout: Duration::from_millis(uri.param_u64("requestTimeout").unwrap_or(2000)),
            reuse_channel: uri.param_bool("reuseChannel").unwrap_or(false),
            disconnect_after_send: uri.param_bool("disconnect").unwrap_or(true),
            conn: Mutex::new(None),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn open(&self) -> Result<TcpStream, EndpointError> {
        let connect = TcpStream::connect(&self.addr);
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| EndpointError::Timeout(self.connect_timeout.as_millis() as u64))??;
        debug!(addr = %self.addr, "connected");
        Ok(stream)
    }
}

#[async_trait]
impl EndpointSender for TcpLineSender {
    #[instrument(skip_all, fields(addr = %self.addr))]
    async fn send(&self, payload: &str) -> Result<(), EndpointError> {
        let mut guard = self.conn.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.open().await?,
        };

        let write = async {
            stream.write_all(payload.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await?;
            Ok::<_, std::io::Error>(())
        };
        match tokio::time::timeout(self.request_timeout, write).await {
            Err(_) => {
                return Err(EndpointError::Timeout(
                    self.request_timeout.as_millis() as u64
                ));
            }
            Ok(Err(e)) => return Err(EndpointError::Io(e)),
            Ok(Ok(())) => {}
        }

        if self.reuse_channel && !self.disconnect_after_send {
            *guard = Some(stream);
        } else {
            let _ = stream.shutdown().await;
        }
        debug!(bytes = payload.len(), "payload sent");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    async fn sender_for(addr: std::net::SocketAddr, extra: &str) -> TcpLineSender {
        let uri = EndpointUri::parse(&format!(
            "netty:tcp://{}:{}{extra}",
            addr.ip(),
            addr.port()
        ))
        .unwrap()
        .with_netty_defaults();
        TcpLineSender::from_uri(&uri).unwrap()
    }

    #[tokio::test]
    async fn sends_newline_terminated_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = tokio::io::BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        let sender = sender_for(addr, "").await;
        sender.send("8=FIX.4.4\u{1}35=D\u{1}").await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, "8=FIX.4.4\u{1}35=D\u{1}");
    }

    #[tokio::test]
    async fn reuse_channel_keeps_one_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = tokio::io::BufReader::new(stream).lines();
            let first = lines.next_line().await.unwrap().unwrap();
            let second = lines.next_line().await.unwrap().unwrap();
            (first, second)
        });

        let sender = sender_for(addr, "?reuseChannel=true&disconnect=false").await;
        sender.send("35=D\u{1}").await.unwrap();
        sender.send("35=8\u{1}").await.unwrap();

        let (first, second) = server.await.unwrap();
        assert_eq!(first, "35=D\u{1}");
        assert_eq!(second, "35=8\u{1}");
    }

    #[tokio::test]
    async fn refused_connection_classifies_as_network() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sender = sender_for(addr, "?connectTimeout=500").await;
        let err = sender.send("35=D\u{1}").await.unwrap_err();
        assert!(err.is_network(), "expected network error, got {err}");
    }

    #[tokio::test]
    async fn wrong_scheme_is_rejected() {
        let uri = EndpointUri::parse("direct:orders").unwrap();
        assert!(TcpLineSender::from_uri(&uri).is_err());
    }
}
