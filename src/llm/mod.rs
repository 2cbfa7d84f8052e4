//! Model backends. The chat engine talks to whichever backend implements
//! [`ModelBackend`]; Ollama is the one shipped here.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::api::ToolDefinition;
use crate::core::conversation::ConversationTurn;
use crate::mcp::error::ModelBackendError;

pub mod ollama;

pub use ollama::OllamaBackend;

/// One tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
}

/// A single model completion: assistant text plus any tool calls it wants
/// dispatched before answering.
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelTurn {
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn chat(
        &self,
        conversation: &[ConversationTurn],
        tools: &[ToolDefinition],
    ) -> Result<ModelTurn, ModelBackendError>;
}
