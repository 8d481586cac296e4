//! Shared test plumbing: a scripted protocol server over the memory hub.

use async_trait::async_trait;
use omesh_protocol::{Dependency, Method, Request, Response, ResponseResult};
use omesh_transport::StreamHandler;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A protocol peer that answers handshakes and routes, and records what it saw.
pub struct ScriptedPeer {
    /// Name recorded into the shared call log for each route request.
    pub name: String,
    /// Dependencies declared in handshake responses.
    pub dependencies: Vec<Dependency>,
    /// Handshake requests served so far.
    pub handshakes: AtomicUsize,
    /// Route requests served so far.
    pub routes: AtomicUsize,
    /// When set, the next route response is zero bytes (then clears).
    pub starve_next_route: AtomicBool,
    /// When set, handshake responses are unparseable garbage.
    pub garble_handshake: AtomicBool,
    /// Shared order log across peers.
    pub log: Arc<Mutex<Vec<String>>>,
    /// Payload maps of the route requests served.
    pub route_payloads: Mutex<Vec<serde_json::Map<String, serde_json::Value>>>,
}

impl ScriptedPeer {
    pub fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            dependencies: Vec::new(),
            handshakes: AtomicUsize::new(0),
            routes: AtomicUsize::new(0),
            starve_next_route: AtomicBool::new(false),
            garble_handshake: AtomicBool::new(false),
            log,
            route_payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn with_dependencies(
        name: &str,
        dependencies: Vec<Dependency>,
        log: Arc<Mutex<Vec<String>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            dependencies,
            handshakes: AtomicUsize::new(0),
            routes: AtomicUsize::new(0),
            starve_next_route: AtomicBool::new(false),
            garble_handshake: AtomicBool::new(false),
            log,
            route_payloads: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl StreamHandler for ScriptedPeer {
    async fn handle_stream(&self, _protocol_id: &str, payload: Vec<u8>) -> Vec<u8> {
        let request = match Request::from_bytes(&payload) {
            Ok(r) => r,
            Err(_) => {
                return Response::new(0, ResponseResult::error("malformed request"))
                    .to_bytes()
                    .unwrap()
            }
        };
        match request.method {
            Method::Handshake => {
                self.handshakes.fetch_add(1, Ordering::SeqCst);
                self.log
                    .lock()
                    .unwrap()
                    .push(format!("handshake:{}", self.name));
                if self.garble_handshake.load(Ordering::SeqCst) {
                    return b"}{ nope".to_vec();
                }
                let result = ResponseResult {
                    request_method: Some(Method::Handshake),
                    kind: Some("handshake".into()),
                    dependencies: self.dependencies.clone(),
                    ..ResponseResult::default()
                };
                Response::new(request.id, result).to_bytes().unwrap()
            }
            Method::Route | Method::Other(_) => {
                self.routes.fetch_add(1, Ordering::SeqCst);
                self.log.lock().unwrap().push(format!("route:{}", self.name));
                self.route_payloads
                    .lock()
                    .unwrap()
                    .push(request.params.payload.clone());
                if self.starve_next_route.swap(false, Ordering::SeqCst) {
                    return Vec::new();
                }
                let mut result = ResponseResult {
                    request_method: Some(request.method.clone()),
                    ..ResponseResult::default()
                };
                result
                    .extra
                    .insert("servedBy".into(), serde_json::Value::String(self.name.clone()));
                Response::new(request.id, result).to_bytes().unwrap()
            }
        }
    }
}
