//! TCP transport.
//!
//! Streams are deliberately cheap: every [`RawConnection::new_stream`] opens
//! its own TCP connection to the dialed endpoint and writes a
//! newline-terminated protocol-id header before the payload. Streams are
//! therefore fully independent of one another, and half-closing the write
//! side maps directly onto a TCP `shutdown(Write)`.

use crate::error::TransportError;
use crate::{read_protocol_header, ConnectionStatus, IoStream, RawConnection, RawStream, StreamHandler, Transport};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

/// Dials `host:port` endpoints over TCP.
#[derive(Debug, Default, Clone)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create a TCP transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(&self, endpoints: &[String]) -> Result<Arc<dyn RawConnection>, TransportError> {
        if endpoints.is_empty() {
            return Err(TransportError::NoEndpoints);
        }
        for endpoint in endpoints {
            match TcpStream::connect(endpoint.as_str()).await {
                Ok(probe) => {
                    // Reachability confirmed; streams open their own
                    // connections, so the probe is not kept.
                    drop(probe);
                    debug!(endpoint = %endpoint, "dialed tcp endpoint");
                    return Ok(Arc::new(TcpConnection {
                        endpoint: endpoint.clone(),
                        open: AtomicBool::new(true),
                    }));
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "tcp dial attempt failed");
                }
            }
        }
        Err(TransportError::DialFailure {
            tried: endpoints.len(),
        })
    }
}

/// A dialed TCP peer.
struct TcpConnection {
    endpoint: String,
    open: AtomicBool,
}

#[async_trait]
impl RawConnection for TcpConnection {
    async fn new_stream(&self, protocol_id: &str) -> Result<Box<dyn RawStream>, TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        let mut stream = match TcpStream::connect(self.endpoint.as_str()).await {
            Ok(s) => s,
            Err(e) => {
                // The peer is gone; report the connection dead so the
                // caller's validation evicts it.
                warn!(endpoint = %self.endpoint, error = %e, "tcp stream open failed");
                self.open.store(false, Ordering::Release);
                return Err(TransportError::ConnectionClosed);
            }
        };
        stream.write_all(protocol_id.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        Ok(Box::new(IoStream::new(stream)))
    }

    fn status(&self) -> ConnectionStatus {
        if self.open.load(Ordering::Acquire) {
            ConnectionStatus::Open
        } else {
            ConnectionStatus::Closed
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }
}

/// Accept inbound streams on `listener` and dispatch them to `handler`.
///
/// One inbound TCP connection carries exactly one stream: protocol-id
/// header, request bytes until the client half-closes, then the handler's
/// response bytes and a close.
pub fn serve_tcp(
    listener: TcpListener,
    handler: Arc<dyn StreamHandler>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "accepted tcp stream");
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = serve_stream(stream, &*handler).await {
                            debug!(peer = %addr, error = %e, "inbound tcp stream ended");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "tcp accept failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    })
}

async fn serve_stream(stream: TcpStream, handler: &dyn StreamHandler) -> Result<(), TransportError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let protocol_id = read_protocol_header(&mut reader).await?;
    let mut payload = Vec::new();
    reader.read_to_end(&mut payload).await?;

    let response = handler.handle_stream(&protocol_id, payload).await;
    write_half.write_all(&response).await?;
    write_half.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl StreamHandler for Echo {
        async fn handle_stream(&self, protocol_id: &str, payload: Vec<u8>) -> Vec<u8> {
            let mut out = protocol_id.as_bytes().to_vec();
            out.push(b'|');
            out.extend_from_slice(&payload);
            out
        }
    }

    #[tokio::test]
    async fn test_dial_and_stream_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = serve_tcp(listener, Arc::new(Echo));

        let transport = TcpTransport::new();
        let conn = transport.dial(&[addr.to_string()]).await.unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Open);

        let mut stream = conn.new_stream("/o/echo").await.unwrap();
        stream.write_all(b"hello").await.unwrap();
        stream.close_write().await.unwrap();
        let reply = stream.read_to_end().await.unwrap();
        assert_eq!(reply, b"/o/echo|hello");
    }

    #[tokio::test]
    async fn test_streams_are_independent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = serve_tcp(listener, Arc::new(Echo));

        let transport = TcpTransport::new();
        let conn = transport.dial(&[addr.to_string()]).await.unwrap();

        let mut a = conn.new_stream("/o/a").await.unwrap();
        let mut b = conn.new_stream("/o/b").await.unwrap();
        b.write_all(b"2").await.unwrap();
        b.close_write().await.unwrap();
        a.write_all(b"1").await.unwrap();
        a.close_write().await.unwrap();
        assert_eq!(a.read_to_end().await.unwrap(), b"/o/a|1");
        assert_eq!(b.read_to_end().await.unwrap(), b"/o/b|2");
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let transport = TcpTransport::new();
        // Nothing listens here.
        let err = transport
            .dial(&["127.0.0.1:1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::DialFailure { tried: 1 }));

        let err = transport.dial(&[]).await.unwrap_err();
        assert!(matches!(err, TransportError::NoEndpoints));
    }

    #[tokio::test]
    async fn test_closed_connection_refuses_streams() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = serve_tcp(listener, Arc::new(Echo));

        let transport = TcpTransport::new();
        let conn = transport.dial(&[addr.to_string()]).await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Closed);
        assert!(matches!(
            conn.new_stream("/o/echo").await.unwrap_err(),
            TransportError::ConnectionClosed
        ));
    }
}
