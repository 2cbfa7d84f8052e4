//! Ollama chat backend over its native `/api/chat` endpoint.

use async_trait::async_trait;
use tracing::debug;

use crate::api::{ChatMessage, ChatRequest, ChatResponse, ToolDefinition};
use crate::core::config::ModelConfig;
use crate::core::conversation::ConversationTurn;
use crate::llm::{ModelBackend, ModelTurn, ToolCallRequest};
use crate::mcp::error::ModelBackendError;

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(client: reqwest::Client, config: &ModelConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn build_request(
        &self,
        conversation: &[ConversationTurn],
        tools: &[ToolDefinition],
    ) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: conversation
                .iter()
                .map(|turn| ChatMessage {
                    role: turn.role.as_str().to_string(),
                    content: turn.content.clone(),
                })
                .collect(),
            stream: false,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.to_vec())
            },
        }
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn chat(
        &self,
        conversation: &[ConversationTurn],
        tools: &[ToolDefinition],
    ) -> Result<ModelTurn, ModelBackendError> {
        let request = self.build_request(conversation, tools);
        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = tools.len(),
            "sending chat request"
        );

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|err| ModelBackendError::Unreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelBackendError::Http { status, body });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| ModelBackendError::Malformed(err.to_string()))?;

        Ok(ModelTurn {
            content: parsed.message.content,
            tool_calls: parsed
                .message
                .tool_calls
                .into_iter()
                .map(|call| ToolCallRequest {
                    tool_name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ToolDefinition, ToolFunction};
    use crate::core::conversation::{ConversationTurn, Role};
    use serde_json::json;

    fn backend() -> OllamaBackend {
        OllamaBackend::new(
            reqwest::Client::new(),
            &ModelConfig {
                base_url: "http://localhost:11434/".to_string(),
                model: "llama3.2".to_string(),
            },
        )
    }

    #[test]
    fn chat_url_strips_trailing_slash() {
        assert_eq!(backend().chat_url(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn request_carries_roles_and_tools() {
        let conversation = vec![
            ConversationTurn::new(Role::System, "be brief"),
            ConversationTurn::new(Role::User, "2+2?"),
        ];
        let tools = vec![ToolDefinition {
            kind: "function".to_string(),
            function: ToolFunction {
                name: "add".to_string(),
                description: Some("Add numbers".to_string()),
                parameters: json!({"type": "object"}),
            },
        }];

        let request = backend().build_request(&conversation, &tools);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].role, "user");
        assert!(!request.stream);
        assert_eq!(request.tools.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn request_omits_empty_tool_list() {
        let conversation = vec![ConversationTurn::new(Role::User, "hi")];
        let request = backend().build_request(&conversation, &[]);
        assert!(request.tools.is_none());
    }
}
