//! Multi-protocol listener: several protocol handlers on one port.
//!
//! [`MultiUseNetServer`] accepts raw TCP connections and inspects the
//! initial bytes of each one. Registered `(sniffer, handler)` pairs are
//! evaluated in registration order; the first sniffer returning `true`
//! claims the connection. If no sniffer matches within
//! [`SNIFF_LIMIT`] bytes or [`SNIFF_TIMEOUT`], the connection is closed.
//!
//! Sniffing consumes no bytes observably: the claiming handler receives a
//! [`SniffedStream`] that replays the buffered prefix before the live
//! socket, so it sees the full original byte stream from the start.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace, warn};

/// Maximum bytes buffered while sniffing a connection.
pub const SNIFF_LIMIT: usize = 4096;

/// Maximum time a connection may take to produce identifiable bytes.
pub const SNIFF_TIMEOUT: Duration = Duration::from_secs(10);

/// Predicate over the initial bytes of a connection.
pub type SniffPredicate = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// A protocol handler claiming sniffed connections.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Handle one claimed connection. The stream replays all sniffed
    /// bytes before the live socket.
    async fn handle(&self, stream: SniffedStream, peer: SocketAddr);
}

struct RegisteredUse {
    handler: Arc<dyn ProtocolHandler>,
    sniffer: SniffPredicate,
}

/// TCP listener shared by several protocol handlers.
pub struct MultiUseNetServer {
    listener: TcpListener,
    uses: Mutex<Vec<RegisteredUse>>,
}

impl MultiUseNetServer {
    /// Bind the shared listening socket.
    ///
    /// # Errors
    ///
    /// Returns the bind error if the address is unavailable.
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            uses: Mutex::new(Vec::new()),
        })
    }

    /// Local address of the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Register a handler with its sniff predicate. Evaluation order is
    /// registration order.
    pub fn add_use(&self, handler: Arc<dyn ProtocolHandler>, sniffer: SniffPredicate) {
        self.uses
            .lock()
            .expect("listener uses lock poisoned")
            .push(RegisteredUse { handler, sniffer });
    }

    /// Run the accept loop until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.sniff_and_dispatch(stream, peer).await;
                    });
                },
                Err(error) => {
                    warn!(%error, "accept failed");
                },
            }
        }
    }

    async fn sniff_and_dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        match tokio::time::timeout(SNIFF_TIMEOUT, self.sniff(stream)).await {
            Ok(Some((handler, sniffed))) => handler.handle(sniffed, peer).await,
            Ok(None) => debug!(%peer, "no protocol handler claimed connection, closing"),
            Err(_) => debug!(%peer, "connection produced no identifiable bytes, closing"),
        }
    }

    /// Read initial bytes until a sniffer claims the connection.
    async fn sniff(
        &self,
        mut stream: TcpStream,
    ) -> Option<(Arc<dyn ProtocolHandler>, SniffedStream)> {
        let mut buffer = Vec::with_capacity(256);
        let mut chunk = [0u8; 1024];

        loop {
            let read = match stream.read(&mut chunk).await {
                Ok(0) => return None,
                Ok(read) => read,
                Err(error) => {
                    trace!(%error, "read failed during sniff");
                    return None;
                },
            };
            buffer.extend_from_slice(&chunk[..read]);

            let claimed = {
                let uses = self.uses.lock().expect("listener uses lock poisoned");
                uses.iter()
                    .find(|registered| (registered.sniffer)(&buffer))
                    .map(|registered| Arc::clone(&registered.handler))
            };
            if let Some(handler) = claimed {
                return Some((handler, SniffedStream::new(buffer, stream)));
            }
            if buffer.len() >= SNIFF_LIMIT {
                return None;
            }
        }
    }
}

/// A TCP stream with sniffed bytes replayed at the front.
#[derive(Debug)]
pub struct SniffedStream {
    prefix: Vec<u8>,
    offset: usize,
    inner: TcpStream,
}

impl SniffedStream {
    pub(crate) fn new(prefix: Vec<u8>, inner: TcpStream) -> Self {
        Self {
            prefix,
            offset: 0,
            inner,
        }
    }
}

impl AsyncRead for SniffedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.offset < self.prefix.len() {
            let remaining = &self.prefix[self.offset..];
            let take = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..take]);
            self.offset += take;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SniffedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
