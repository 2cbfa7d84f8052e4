//! Session lifecycle for one MCP server.
//!
//! Each [`SessionManager`] owns at most one session to its endpoint. The
//! session is created lazily on first use; connection establishment is
//! single-flight (concurrent callers queue on the transport lock and observe
//! the first attempt's outcome). A `Failed` session is never silently
//! retried: the next operation re-attempts the connection exactly once and
//! surfaces a fresh error on repeat failure.

use rust_mcp_schema::schema_utils::{RequestFromClient, ServerMessage};
use rust_mcp_schema::{PaginatedRequestParams, ReadResourceRequestParams};
use rust_mcp_schema::CallToolRequestParams;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::config::ServerConfig;
use crate::mcp::error::{SessionError, TransportError};
use crate::mcp::protocol;
use crate::mcp::transport::{HttpTransport, Transport};

/// Listing requests follow pagination cursors up to this many tools.
const MAX_TOOL_LIST: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Ready,
    Closed,
    Failed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

/// A tool advertised by a server, in the shape the registry aggregates.
/// Rebuilt on every discovery call; servers may register and deregister
/// tools between calls.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub server: String,
}

/// Outcome of a tool call. `is_error` marks a protocol-level tool failure,
/// which is a normal result as far as the session is concerned.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub content: Value,
    pub is_error: bool,
}

#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

pub type TransportFactory = Box<dyn Fn(&ServerConfig) -> Box<dyn Transport> + Send + Sync>;

#[derive(Default)]
struct StateCell {
    state: Option<SessionState>,
    last_error: Option<String>,
}

pub struct SessionManager {
    config: ServerConfig,
    factory: TransportFactory,
    /// Holds the live transport. Also the single-flight and queuing point:
    /// the streamable-HTTP transport handles one in-flight request, so
    /// concurrent operations queue here rather than being dropped.
    transport: Mutex<Option<Box<dyn Transport>>>,
    state: std::sync::Mutex<StateCell>,
}

impl SessionManager {
    pub fn new(config: ServerConfig, factory: TransportFactory) -> Self {
        Self {
            config,
            factory,
            transport: Mutex::new(None),
            state: std::sync::Mutex::new(StateCell::default()),
        }
    }

    /// Manager backed by the streamable-HTTP transport.
    pub fn over_http(config: ServerConfig) -> Self {
        Self::new(
            config,
            Box::new(|config: &ServerConfig| {
                match HttpTransport::new(config.url.clone()) {
                    Ok(transport) => Box::new(transport) as Box<dyn Transport>,
                    Err(err) => Box::new(BrokenTransport(err.to_string())),
                }
            }),
        )
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    pub fn status(&self) -> (SessionState, Option<String>) {
        let cell = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        (
            cell.state.unwrap_or(SessionState::Unconnected),
            cell.last_error.clone(),
        )
    }

    fn set_state(&self, state: SessionState, last_error: Option<String>) {
        let mut cell = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        cell.state = Some(state);
        cell.last_error = last_error;
    }

    /// Closes the transport and marks the session `Closed`. Safe from any
    /// state, including before a session was ever opened, and idempotent.
    pub async fn shutdown(&self) {
        let mut slot = self.transport.lock().await;
        if let Some(mut transport) = slot.take() {
            transport.close().await;
        }
        self.set_state(SessionState::Closed, None);
        debug!(server = %self.config.name, "session shut down");
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.take().map(|cursor| PaginatedRequestParams {
                cursor: Some(cursor),
                meta: None,
            });
            let message = self
                .request(RequestFromClient::ListToolsRequest(params))
                .await?;
            let list = protocol::parse_list_tools(message).map_err(|err| self.wrap(err))?;

            tools.extend(list.tools.into_iter().map(|tool| ToolDescriptor {
                name: tool.name,
                description: tool.description,
                input_schema: serde_json::to_value(&tool.input_schema)
                    .unwrap_or(Value::Null),
                server: self.config.name.clone(),
            }));

            if tools.len() >= MAX_TOOL_LIST {
                tools.truncate(MAX_TOOL_LIST);
                break;
            }
            match list.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(server = %self.config.name, count = tools.len(), "listed tools");
        Ok(tools)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallResult, SessionError> {
        let mut params = CallToolRequestParams::new(name);
        if !arguments.is_empty() {
            params = params.with_arguments(arguments);
        }
        let message = self
            .request(RequestFromClient::CallToolRequest(params))
            .await?;
        let result = protocol::parse_call_tool(message).map_err(|err| self.wrap(err))?;
        let is_error = result.is_error.unwrap_or(false);
        if is_error {
            warn!(server = %self.config.name, tool = name, "server reported a tool error");
        }
        Ok(ToolCallResult {
            content: serde_json::to_value(&result.content).unwrap_or(Value::Null),
            is_error,
        })
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, SessionError> {
        let message = self
            .request(RequestFromClient::ListResourcesRequest(None))
            .await?;
        let list = protocol::parse_list_resources(message).map_err(|err| self.wrap(err))?;
        Ok(list
            .resources
            .into_iter()
            .map(|resource| ResourceDescriptor {
                uri: resource.uri,
                name: resource.name,
                description: resource.description,
                mime_type: resource.mime_type,
            })
            .collect())
    }

    pub async fn get_resource(&self, uri: &str) -> Result<Value, SessionError> {
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        let message = self
            .request(RequestFromClient::ReadResourceRequest(params))
            .await?;
        let result = protocol::parse_read_resource(message).map_err(|err| self.wrap(err))?;
        Ok(serde_json::to_value(&result).unwrap_or(Value::Null))
    }

    fn wrap(&self, source: TransportError) -> SessionError {
        SessionError::Transport {
            server: self.config.name.clone(),
            source,
        }
    }

    /// Ensures a `Ready` session and issues one request. On a transport
    /// failure the session is marked `Failed` and the transport dropped; no
    /// retry happens here (retries are the caller's concern).
    async fn request(
        &self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, SessionError> {
        if !self.config.is_enabled() {
            return Err(SessionError::Disabled(self.config.name.clone()));
        }

        let mut slot = self.transport.lock().await;
        self.ensure_ready(&mut slot).await?;
        let Some(transport) = slot.as_mut() else {
            return Err(self.wrap(TransportError::NotConnected));
        };

        match transport.send_request(request).await {
            Ok(message) => Ok(message),
            Err(err) => {
                // Close before discarding so the server can reclaim its
                // session slot; dropping alone skips the session DELETE.
                if let Some(mut transport) = slot.take() {
                    transport.close().await;
                }
                self.set_state(SessionState::Failed, Some(err.to_string()));
                Err(self.wrap(err))
            }
        }
    }

    /// Connects if no `Ready` session exists. Attempts exactly once per
    /// call. If the calling task is cancelled mid-connect, the in-progress
    /// transport is dropped (releasing its connection) and the slot is left
    /// empty, so the next operation starts a fresh attempt.
    async fn ensure_ready(
        &self,
        slot: &mut Option<Box<dyn Transport>>,
    ) -> Result<(), SessionError> {
        let (state, _) = self.status();
        if state == SessionState::Closed {
            return Err(SessionError::Closed(self.config.name.clone()));
        }
        if state == SessionState::Ready && slot.is_some() {
            return Ok(());
        }

        self.set_state(SessionState::Connecting, None);
        let mut transport = (self.factory)(&self.config);
        match transport.connect().await {
            Ok(()) => {
                *slot = Some(transport);
                self.set_state(SessionState::Ready, None);
                debug!(server = %self.config.name, "session ready");
                Ok(())
            }
            Err(err) => {
                transport.close().await;
                self.set_state(SessionState::Failed, Some(err.to_string()));
                warn!(server = %self.config.name, error = %err, "connection attempt failed");
                Err(self.wrap(err))
            }
        }
    }
}

/// Stand-in used when the HTTP client itself cannot be built; every
/// operation reports the construction error.
struct BrokenTransport(String);

#[async_trait::async_trait]
impl Transport for BrokenTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        Err(TransportError::ConnectionFailed(self.0.clone()))
    }

    async fn send_request(
        &mut self,
        _request: RequestFromClient,
    ) -> Result<ServerMessage, TransportError> {
        Err(TransportError::ConnectionFailed(self.0.clone()))
    }

    async fn close(&mut self) {}
}
