//! Ties the pieces together: chat sessions, the model backend, and the MCP
//! tool registry.

use futures_util::future::join_all;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::chat_loop::{run_tool_call_loop, ChatOutcome};
use crate::core::config::Config;
use crate::core::conversation::Role;
use crate::core::session_store::SessionStore;
use crate::llm::{ModelBackend, OllamaBackend};
use crate::mcp::error::EngineError;
use crate::mcp::registry::ToolRegistry;
use crate::mcp::session::{ResourceDescriptor, SessionManager, ToolCallResult, ToolDescriptor};

const MODEL_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-server status line for operator-facing output.
#[derive(Debug)]
pub struct ServerSummary {
    pub name: String,
    pub status: String,
    pub tool_count: Option<usize>,
}

pub struct EngineOptions {
    pub max_tool_iterations: Option<u32>,
    pub max_chat_sessions: usize,
}

pub struct ChatEngine {
    registry: ToolRegistry,
    backend: Arc<dyn ModelBackend>,
    sessions: SessionStore,
    max_tool_iterations: Option<u32>,
}

impl ChatEngine {
    pub fn new(
        registry: ToolRegistry,
        backend: Arc<dyn ModelBackend>,
        options: EngineOptions,
    ) -> Self {
        Self {
            registry,
            backend,
            sessions: SessionStore::new(options.max_chat_sessions),
            max_tool_iterations: options.max_tool_iterations,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(MODEL_HTTP_TIMEOUT)
            .build()
            .map_err(|err| EngineError::Init(err.to_string()))?;
        let backend = Arc::new(OllamaBackend::new(client, &config.model));

        let servers = config
            .servers
            .iter()
            .map(|server| Arc::new(SessionManager::over_http(server.clone())))
            .collect();

        Ok(Self::new(
            ToolRegistry::new(servers),
            backend,
            EngineOptions {
                max_tool_iterations: config.max_tool_iterations,
                max_chat_sessions: config.max_chat_sessions,
            },
        ))
    }

    /// Handles one user message within the named session. Tool discovery
    /// runs once per call, so tools registered after this point are picked
    /// up by the next message.
    pub async fn start_or_continue_chat(
        &self,
        session_id: &str,
        user_message: &str,
    ) -> Result<ChatOutcome, EngineError> {
        let session = self.sessions.get_or_create(session_id).await;
        let mut session = session.lock().await;
        session.conversation.push(Role::User, user_message);
        session.touch();

        let catalogue = self.registry.discover_all().await;
        for failure in catalogue.failures() {
            warn!(server = %failure.server, error = %failure.error, "continuing without server");
        }

        let outcome = run_tool_call_loop(
            self.backend.as_ref(),
            &self.registry,
            &catalogue,
            &mut session.conversation,
            self.max_tool_iterations,
        )
        .await?;

        info!(
            session = session_id,
            model_turns = outcome.model_turns,
            truncated = outcome.truncated,
            "chat request finished"
        );
        Ok(outcome)
    }

    /// Status of every configured server. Enabled servers are probed with a
    /// live tool listing; disabled ones are reported without contact.
    pub async fn list_servers(&self) -> Vec<ServerSummary> {
        let summaries = self.registry.servers().iter().map(|server| async move {
            if !server.is_enabled() {
                return ServerSummary {
                    name: server.name().to_string(),
                    status: "disabled".to_string(),
                    tool_count: None,
                };
            }
            let tool_count = match server.list_tools().await {
                Ok(tools) => Some(tools.len()),
                Err(_) => None,
            };
            let (state, _) = server.status();
            ServerSummary {
                name: server.name().to_string(),
                status: state.label().to_string(),
                tool_count,
            }
        });
        join_all(summaries).await
    }

    pub async fn list_tools(&self, server: &str) -> Result<Vec<ToolDescriptor>, EngineError> {
        Ok(self.server(server)?.list_tools().await?)
    }

    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallResult, EngineError> {
        Ok(self.server(server)?.call_tool(tool, arguments).await?)
    }

    pub async fn list_resources(
        &self,
        server: &str,
    ) -> Result<Vec<ResourceDescriptor>, EngineError> {
        Ok(self.server(server)?.list_resources().await?)
    }

    pub async fn get_resource(&self, server: &str, uri: &str) -> Result<Value, EngineError> {
        Ok(self.server(server)?.get_resource(uri).await?)
    }

    /// Closes every MCP session. Further chat requests will re-fail against
    /// the closed sessions rather than reconnect.
    pub async fn shutdown(&self) {
        join_all(
            self.registry
                .servers()
                .iter()
                .map(|server| server.shutdown()),
        )
        .await;
        info!("all sessions shut down");
    }

    fn server(&self, name: &str) -> Result<&Arc<SessionManager>, EngineError> {
        self.registry
            .find_server(name)
            .ok_or_else(|| EngineError::UnknownServer(name.to_string()))
    }
}

/// Races `future` against the token; cancellation wins with
/// [`EngineError::Cancelled`]. Any partially opened session stays owned by
/// its manager and is torn down by the next shutdown.
pub async fn run_cancellable<F, T>(
    future: F,
    cancel_token: &CancellationToken,
) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    tokio::select! {
        _ = cancel_token.cancelled() => Err(EngineError::Cancelled),
        result = future => result,
    }
}
