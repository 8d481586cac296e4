//! Point-to-point transport boundary.
//!
//! The core protocol layer only ever consumes this surface: dial a set of
//! endpoints to get a bidirectional connection, open a byte stream on it
//! scoped to a protocol id, and ask whether the connection is still open.
//! Peer discovery, NAT traversal, and transport security live behind these
//! traits and are not omesh's concern.
//!
//! Two implementations ship with the workspace: [`tcp::TcpTransport`] for
//! real networking and [`memory::MemoryTransport`] for in-process nodes and
//! tests.

pub mod error;
pub mod memory;
pub mod tcp;

pub use error::TransportError;
pub use memory::{MemoryHub, MemoryTransport};
pub use tcp::{serve_tcp, TcpTransport};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Liveness of a dialed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Streams may still be opened.
    Open,
    /// The connection was closed or its peer is gone.
    Closed,
}

/// One application byte stream on a dialed connection.
///
/// The write side can be half-closed independently of the read side, which
/// is how omesh delimits a message: write, close the write side, read the
/// peer's reply until end of stream.
#[async_trait]
pub trait RawStream: Send {
    /// Write the full buffer.
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Half-close the write side, signalling end of message to the peer.
    async fn close_write(&mut self) -> Result<(), TransportError>;

    /// Read until the peer closes its write side.
    async fn read_to_end(&mut self) -> Result<Vec<u8>, TransportError>;
}

impl std::fmt::Debug for dyn RawStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawStream")
    }
}

/// A dialed point-to-point connection.
#[async_trait]
pub trait RawConnection: Send + Sync {
    /// Open a new stream scoped to a protocol id.
    async fn new_stream(&self, protocol_id: &str) -> Result<Box<dyn RawStream>, TransportError>;

    /// Current liveness.
    fn status(&self) -> ConnectionStatus;

    /// Close the connection. Further `new_stream` calls fail.
    async fn close(&self) -> Result<(), TransportError>;
}

impl std::fmt::Debug for dyn RawConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawConnection")
    }
}

/// Dials logical-address endpoints into connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dial the endpoints in order; the first reachable one wins.
    async fn dial(&self, endpoints: &[String]) -> Result<Arc<dyn RawConnection>, TransportError>;
}

/// Serves inbound streams for a listening node.
///
/// One call per stream: the accumulated request bytes for `protocol_id` in,
/// the fully serialized response bytes out. Implementations encode their own
/// error responses; the transport layer does not interpret payloads.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    /// Handle one inbound stream.
    async fn handle_stream(&self, protocol_id: &str, payload: Vec<u8>) -> Vec<u8>;
}

/// [`RawStream`] over any async byte pipe.
///
/// Both shipped transports produce streams through this adapter, so the
/// half-close and read-to-end semantics are identical across them.
pub struct IoStream<S> {
    io: S,
}

impl<S> IoStream<S> {
    /// Wrap an async byte pipe.
    pub fn new(io: S) -> Self {
        Self { io }
    }
}

#[async_trait]
impl<S> RawStream for IoStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.io.write_all(bytes).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn close_write(&mut self) -> Result<(), TransportError> {
        self.io.shutdown().await?;
        Ok(())
    }

    async fn read_to_end(&mut self) -> Result<Vec<u8>, TransportError> {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        self.io.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

/// Read the newline-terminated protocol-id header from an inbound stream.
pub(crate) async fn read_protocol_header<R>(
    reader: &mut BufReader<R>,
) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(TransportError::ConnectionClosed);
    }
    Ok(line.trim_end_matches('\n').to_string())
}
