//! Line-oriented TCP listener for output routes.
//!
//! Accepts any number of inbound connections, splits each stream on
//! newlines and funnels the raw FIX payload lines into one channel per
//! listener.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::EndpointError;

/// A bound listener endpoint yielding raw FIX buffers one at a time.
pub struct TcpLineListener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

impl TcpLineListener {
    /// Bind and start accepting. Returns the listener handle and the
    /// receiving end of the payload channel.
    pub async fn bind(
        host: &str,
        port: u16,
        buffer: usize,
    ) -> Result<(Self, mpsc::Receiver<String>), EndpointError> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(addr = %local_addr, "listener bound");
        tokio::spawn(accept_loop(listener, tx, shutdown_rx));

        Ok((
            Self {
                local_addr,
                shutdown: shutdown_tx,
            },
            rx,
        ))
    }

    /// The bound address; useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wind down connection readers.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A closed channel means the listener handle is gone.
                if changed.is_err() || *shutdown.borrow() {
                    debug!("accept loop stopping");
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "connection accepted");
                    tokio::spawn(read_lines(stream, tx.clone(), shutdown.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }
}

async fn read_lines(stream: TcpStream, tx: mpsc::Sender<String>, mut shutdown: watch::Receiver<bool>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        // Consumer side is gone; nothing left to do.
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "read failed, dropping connection");
                    break;
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn yields_one_payload_per_line() {
        let (listener, mut rx) = TcpLineListener::bind("127.0.0.1", 0, 16).await.unwrap();
        let addr = listener.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"8=FIX.4.4\x0135=D\x01\n8=FIX.4.4\x0135=8\x01\n")
            .await
            .unwrap();
        client.flush().await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, "8=FIX.4.4\u{1}35=D\u{1}");
        assert_eq!(second, "8=FIX.4.4\u{1}35=8\u{1}");

        listener.shutdown();
    }

    #[tokio::test]
    async fn multiple_connections_feed_one_channel() {
        let (listener, mut rx) = TcpLineListener::bind("127.0.0.1", 0, 16).await.unwrap();
        let addr = listener.local_addr();

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        a.write_all(b"35=D\x01\n").await.unwrap();
        b.write_all(b"35=8\x01\n").await.unwrap();
        a.flush().await.unwrap();
        b.flush().await.unwrap();

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort();
        assert_eq!(seen, vec!["35=8\u{1}", "35=D\u{1}"]);

        listener.shutdown();
    }
}
