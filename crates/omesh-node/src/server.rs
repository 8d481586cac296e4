//! Inbound request dispatch.
//!
//! A [`NodeServer`] adapts a node to the transport's stream interface: it
//! parses each inbound stream as one [`Request`], answers handshakes from the
//! node's config, hands registrations to the node, and routes everything else
//! through a [`RequestHandler`]. Failures become error results on the wire,
//! never dropped streams.

use async_trait::async_trait;
use omesh_core::{Node, NodeError};
use omesh_protocol::address::REGISTRATION_ADDRESS;
use omesh_protocol::{Address, Method, Request, Response, ResponseResult};
use omesh_transport::StreamHandler;
use std::sync::Arc;
use tracing::{debug, warn};

/// Application-level handling of routed requests.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Answer a routed request addressed to `node`.
    async fn handle_route(
        &self,
        node: &Arc<Node>,
        request: &Request,
    ) -> Result<ResponseResult, NodeError>;
}

/// Refuses every route. The handler for nodes that only exist to be
/// handshaken with (or, wrapped by a leader, to accept registrations).
pub struct UnroutedHandler;

#[async_trait]
impl RequestHandler for UnroutedHandler {
    async fn handle_route(
        &self,
        node: &Arc<Node>,
        _request: &Request,
    ) -> Result<ResponseResult, NodeError> {
        Err(NodeError::Lifecycle(format!(
            "{} does not route requests",
            node.address()
        )))
    }
}

/// Serves a node's protocol endpoint.
pub struct NodeServer {
    node: Arc<Node>,
    handler: Arc<dyn RequestHandler>,
}

impl NodeServer {
    /// Build a server for `node` with the given route handler.
    pub fn new(node: Arc<Node>, handler: Arc<dyn RequestHandler>) -> Arc<Self> {
        Arc::new(Self { node, handler })
    }

    /// The handshake answer: this node's declared dependencies and
    /// advertised parameters.
    fn handshake_result(&self) -> ResponseResult {
        let config = self.node.config();
        ResponseResult {
            request_method: Some(Method::Handshake),
            kind: Some("handshake".into()),
            dependencies: config.dependencies.clone(),
            parameters: (!config.parameters.is_empty()).then(|| config.parameters.clone()),
            ..ResponseResult::default()
        }
    }

    async fn dispatch(
        &self,
        protocol_id: &str,
        request: &Request,
    ) -> Result<ResponseResult, NodeError> {
        match &request.method {
            Method::Handshake => Ok(self.handshake_result()),
            Method::Route => {
                if protocol_id == Address::new(REGISTRATION_ADDRESS).protocol() {
                    self.node.handle_registration(&request.params).await
                } else {
                    self.handler.handle_route(&self.node, request).await
                }
            }
            Method::Other(name) => {
                Err(NodeError::Lifecycle(format!("unsupported method {name}")))
            }
        }
    }
}

#[async_trait]
impl StreamHandler for NodeServer {
    async fn handle_stream(&self, protocol_id: &str, payload: Vec<u8>) -> Vec<u8> {
        let (id, result) = match Request::from_bytes(&payload) {
            Ok(request) => {
                debug!(
                    node = %self.node.address(),
                    protocol = %protocol_id,
                    method = %request.method,
                    id = request.id,
                    "serving request"
                );
                let mut result = match self.dispatch(protocol_id, &request).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(
                            node = %self.node.address(),
                            method = %request.method,
                            error = %e,
                            "request failed"
                        );
                        ResponseResult::error(e.to_string())
                    }
                };
                result.request_method.get_or_insert(request.method.clone());
                (request.id, result)
            }
            Err(e) => {
                warn!(node = %self.node.address(), error = %e, "unreadable request");
                (0, ResponseResult::error(format!("unreadable request: {e}")))
            }
        };
        encode(Response::new(id, result))
    }
}

fn encode(response: Response) -> Vec<u8> {
    match response.to_bytes() {
        Ok(bytes) => bytes,
        // Results are built from strings and maps, so this never triggers in
        // practice; answer with a hand-assembled error envelope regardless.
        Err(e) => {
            warn!(error = %e, "response serialization failed");
            format!(
                r#"{{"jsonrpc":"2.0","id":{},"result":{{"type":"error","message":"response serialization failed"}}}}"#,
                response.id
            )
            .into_bytes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omesh_core::{CoreConfig, NodeLifecycle};
    use omesh_protocol::{Dependency, RequestParams};
    use omesh_transport::{MemoryHub, MemoryTransport, Transport};

    struct HubOnly {
        hub: MemoryHub,
    }

    #[async_trait]
    impl NodeLifecycle for HubOnly {
        async fn initialize(&self, _node: &Arc<Node>) -> Result<Arc<dyn Transport>, NodeError> {
            Ok(Arc::new(MemoryTransport::new(self.hub.clone())))
        }

        async fn register(&self, _node: &Arc<Node>) -> Result<(), NodeError> {
            Ok(())
        }
    }

    fn server_for(config: CoreConfig) -> Arc<NodeServer> {
        let node = Node::new(config, Arc::new(HubOnly { hub: MemoryHub::new() }));
        NodeServer::new(node, Arc::new(UnroutedHandler))
    }

    #[tokio::test]
    async fn test_handshake_answers_from_config() {
        let mut parameters = serde_json::Map::new();
        parameters.insert("model".into(), serde_json::Value::String("large".into()));
        let server = server_for(CoreConfig {
            address: Address::new("o://svc"),
            dependencies: vec![Dependency::new("o://auth")],
            parameters,
            ..CoreConfig::default()
        });

        let request = Request::new(0, Method::Handshake, RequestParams::default());
        let bytes = server
            .handle_stream("/o/svc", request.to_bytes().unwrap())
            .await;
        let response = Response::from_bytes(&bytes).unwrap();
        assert_eq!(response.id, 0);
        assert_eq!(response.result.kind.as_deref(), Some("handshake"));
        assert_eq!(response.result.dependencies[0].address, "o://auth");
        assert_eq!(
            response.result.parameters.as_ref().unwrap()["model"],
            "large"
        );
    }

    #[tokio::test]
    async fn test_unrouted_node_refuses_routes() {
        let server = server_for(CoreConfig {
            address: Address::new("o://svc"),
            ..CoreConfig::default()
        });
        let request = Request::new(1, Method::Route, RequestParams::default());
        let bytes = server
            .handle_stream("/o/svc", request.to_bytes().unwrap())
            .await;
        let response = Response::from_bytes(&bytes).unwrap();
        assert_eq!(response.id, 1);
        assert!(response.result.is_error());
    }

    #[tokio::test]
    async fn test_registration_refused_without_directory() {
        let server = server_for(CoreConfig {
            address: Address::new("o://svc"),
            ..CoreConfig::default()
        });
        let request = Request::new(2, Method::Route, RequestParams::default());
        let bytes = server
            .handle_stream("/o/register", request.to_bytes().unwrap())
            .await;
        let response = Response::from_bytes(&bytes).unwrap();
        assert!(response.result.is_error());
        assert!(response.result.extra["message"]
            .as_str()
            .unwrap()
            .contains("does not accept registrations"));
    }

    #[tokio::test]
    async fn test_unknown_method_is_an_error_result() {
        let server = server_for(CoreConfig::default());
        let request = Request::new(3, Method::Other("discover".into()), RequestParams::default());
        let bytes = server
            .handle_stream("/o/node", request.to_bytes().unwrap())
            .await;
        let response = Response::from_bytes(&bytes).unwrap();
        assert!(response.result.is_error());
    }

    #[tokio::test]
    async fn test_unreadable_request_still_gets_an_envelope() {
        let server = server_for(CoreConfig::default());
        let bytes = server.handle_stream("/o/node", b"}{".to_vec()).await;
        let response = Response::from_bytes(&bytes).unwrap();
        assert_eq!(response.id, 0);
        assert!(response.result.is_error());
    }
}
