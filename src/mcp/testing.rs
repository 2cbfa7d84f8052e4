//! In-memory transport used by session, registry, and chat-loop tests.

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{RequestFromClient, ServerMessage};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::mcp::error::TransportError;
use crate::mcp::transport::Transport;

/// Shared, scriptable behavior for one fake server. Tests keep handles to
/// the counters to assert connection and call accounting.
pub(crate) struct FakeBehavior {
    tools: Vec<(String, String)>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<String>>>,
    fail_connects: AtomicUsize,
    fail_requests: AtomicUsize,
    connect_delay_ms: AtomicUsize,
    tool_replies: Mutex<HashMap<String, String>>,
    tool_errors: Mutex<HashSet<String>>,
}

impl FakeBehavior {
    pub(crate) fn with_tools(tools: Vec<(&str, &str)>) -> Self {
        Self {
            tools: tools
                .into_iter()
                .map(|(name, description)| (name.to_string(), description.to_string()))
                .collect(),
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_connects: AtomicUsize::new(0),
            fail_requests: AtomicUsize::new(0),
            connect_delay_ms: AtomicUsize::new(0),
            tool_replies: Mutex::new(HashMap::new()),
            tool_errors: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn connects(&self) -> Arc<AtomicUsize> {
        self.connects.clone()
    }

    pub(crate) fn closes(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }

    pub(crate) fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    pub(crate) fn fail_next_connects(&self, count: usize) {
        self.fail_connects.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_requests(&self, count: usize) {
        self.fail_requests.store(count, Ordering::SeqCst);
    }

    pub(crate) fn set_connect_delay_ms(&self, millis: usize) {
        self.connect_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub(crate) fn set_tool_reply(&self, tool: &str, reply: &str) {
        self.tool_replies
            .lock()
            .expect("tool replies lock")
            .insert(tool.to_string(), reply.to_string());
    }

    pub(crate) fn set_tool_error(&self, tool: &str) {
        self.tool_errors
            .lock()
            .expect("tool errors lock")
            .insert(tool.to_string());
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            })
            .is_ok()
    }

    fn response(result: Value) -> ServerMessage {
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
            .expect("fake response should parse")
    }
}

pub(crate) struct FakeTransport {
    behavior: Arc<FakeBehavior>,
    closed: bool,
}

impl FakeTransport {
    pub(crate) fn new(behavior: Arc<FakeBehavior>) -> Self {
        Self {
            behavior,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let delay = self.behavior.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.behavior.connects.fetch_add(1, Ordering::SeqCst);
        if FakeBehavior::take_one(&self.behavior.fail_connects) {
            return Err(TransportError::ConnectionFailed(
                "scripted connect failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn send_request(
        &mut self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if FakeBehavior::take_one(&self.behavior.fail_requests) {
            return Err(TransportError::Stream(
                "scripted request failure".to_string(),
            ));
        }

        match request {
            RequestFromClient::ListToolsRequest(_) => {
                let tools: Vec<Value> = self
                    .behavior
                    .tools
                    .iter()
                    .map(|(name, description)| {
                        json!({
                            "name": name,
                            "description": description,
                            "inputSchema": {"type": "object"}
                        })
                    })
                    .collect();
                Ok(FakeBehavior::response(json!({"tools": tools})))
            }
            RequestFromClient::CallToolRequest(params) => {
                self.behavior
                    .calls
                    .lock()
                    .expect("calls lock")
                    .push(params.name.clone());
                let reply = self
                    .behavior
                    .tool_replies
                    .lock()
                    .expect("tool replies lock")
                    .get(&params.name)
                    .cloned()
                    .unwrap_or_else(|| "ok".to_string());
                let is_error = self
                    .behavior
                    .tool_errors
                    .lock()
                    .expect("tool errors lock")
                    .contains(&params.name);
                Ok(FakeBehavior::response(json!({
                    "content": [{"type": "text", "text": reply}],
                    "isError": is_error
                })))
            }
            RequestFromClient::ListResourcesRequest(_) => {
                Ok(FakeBehavior::response(json!({
                    "resources": [{"uri": "memo://greeting", "name": "greeting"}]
                })))
            }
            RequestFromClient::ReadResourceRequest(params) => {
                Ok(FakeBehavior::response(json!({
                    "contents": [{"uri": params.uri, "text": "hello"}]
                })))
            }
            _ => Err(TransportError::Rpc {
                code: -32601,
                message: "method not supported by fake".to_string(),
            }),
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.behavior.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.closed = true;
    }
}
