//! In-process transport.
//!
//! A [`MemoryHub`] is a process-local endpoint table. Listeners bind an
//! endpoint name and receive stream offers; dialers resolve the name and get
//! a duplex byte pipe to the listener. Used by virtual nodes and by tests
//! that want real stream semantics without sockets.

use crate::error::TransportError;
use crate::{ConnectionStatus, IoStream, RawConnection, RawStream, StreamHandler, Transport};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tracing::debug;

/// Stream buffer size for duplex pipes.
const STREAM_BUFFER: usize = 64 * 1024;

/// How many pending stream offers a listener may queue.
const OFFER_BACKLOG: usize = 64;

/// One inbound stream handed to a listener.
pub struct StreamOffer {
    /// Protocol id the dialer opened the stream for.
    pub protocol_id: String,
    /// The listener's end of the pipe.
    pub stream: DuplexStream,
}

/// Process-local endpoint table shared by memory transports.
#[derive(Clone, Default)]
pub struct MemoryHub {
    endpoints: Arc<RwLock<HashMap<String, mpsc::Sender<StreamOffer>>>>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an endpoint name and receive its stream offers.
    ///
    /// Re-binding an existing name replaces the previous listener.
    pub fn bind(&self, endpoint: impl Into<String>) -> mpsc::Receiver<StreamOffer> {
        let (tx, rx) = mpsc::channel(OFFER_BACKLOG);
        let mut endpoints = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        endpoints.insert(endpoint.into(), tx);
        rx
    }

    /// Remove an endpoint. Existing connections to it go dead.
    pub fn unbind(&self, endpoint: &str) {
        let mut endpoints = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        endpoints.remove(endpoint);
    }

    /// Whether an endpoint is currently bound.
    pub fn contains(&self, endpoint: &str) -> bool {
        let endpoints = self.endpoints.read().unwrap_or_else(|e| e.into_inner());
        endpoints.contains_key(endpoint)
    }

    fn lookup(&self, endpoint: &str) -> Option<mpsc::Sender<StreamOffer>> {
        let endpoints = self.endpoints.read().unwrap_or_else(|e| e.into_inner());
        endpoints.get(endpoint).cloned()
    }

    /// Bind an endpoint and serve its streams with `handler`.
    ///
    /// Each offered stream is read to end-of-message, handed to the handler,
    /// and answered with the handler's response bytes.
    pub fn serve(
        &self,
        endpoint: impl Into<String>,
        handler: Arc<dyn StreamHandler>,
    ) -> tokio::task::JoinHandle<()> {
        let endpoint = endpoint.into();
        let mut offers = self.bind(endpoint.clone());
        tokio::spawn(async move {
            while let Some(offer) = offers.recv().await {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = serve_offer(offer, &*handler).await {
                        debug!(error = %e, "memory stream ended");
                    }
                });
            }
        })
    }
}

async fn serve_offer(offer: StreamOffer, handler: &dyn StreamHandler) -> Result<(), TransportError> {
    let mut stream = offer.stream;
    let mut payload = Vec::new();
    stream.read_to_end(&mut payload).await?;
    let response = handler.handle_stream(&offer.protocol_id, payload).await;
    stream.write_all(&response).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Dials endpoints registered on a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

impl MemoryTransport {
    /// Create a transport dialing through `hub`.
    pub fn new(hub: MemoryHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dial(&self, endpoints: &[String]) -> Result<Arc<dyn RawConnection>, TransportError> {
        if endpoints.is_empty() {
            return Err(TransportError::NoEndpoints);
        }
        for endpoint in endpoints {
            if self.hub.contains(endpoint) {
                debug!(endpoint = %endpoint, "dialed memory endpoint");
                return Ok(Arc::new(MemoryConnection {
                    endpoint: endpoint.clone(),
                    hub: self.hub.clone(),
                    open: AtomicBool::new(true),
                }));
            }
        }
        Err(TransportError::DialFailure {
            tried: endpoints.len(),
        })
    }
}

/// A dialed in-process peer.
struct MemoryConnection {
    endpoint: String,
    hub: MemoryHub,
    open: AtomicBool,
}

#[async_trait]
impl RawConnection for MemoryConnection {
    async fn new_stream(&self, protocol_id: &str) -> Result<Box<dyn RawStream>, TransportError> {
        if self.status() == ConnectionStatus::Closed {
            return Err(TransportError::ConnectionClosed);
        }
        let sender = self
            .hub
            .lookup(&self.endpoint)
            .ok_or(TransportError::ConnectionClosed)?;
        let (local, remote) = tokio::io::duplex(STREAM_BUFFER);
        let offer = StreamOffer {
            protocol_id: protocol_id.to_string(),
            stream: remote,
        };
        if sender.send(offer).await.is_err() {
            // Listener went away between lookup and send.
            self.open.store(false, Ordering::Release);
            return Err(TransportError::ConnectionClosed);
        }
        Ok(Box::new(IoStream::new(local)))
    }

    fn status(&self) -> ConnectionStatus {
        if self.open.load(Ordering::Acquire) && self.hub.contains(&self.endpoint) {
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
