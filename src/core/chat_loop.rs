//! The tool-calling loop: alternate model turns with tool dispatch until the
//! model answers in plain text or the turn budget runs out.

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::core::conversation::{Conversation, Role};
use crate::llm::{ModelBackend, ModelTurn, ToolCallRequest};
use crate::mcp::error::{InvocationError, ModelBackendError};
use crate::mcp::registry::{ToolCatalogue, ToolRegistry};
use crate::mcp::session::ToolCallResult;

/// What a chat request produced.
#[derive(Debug)]
pub struct ChatOutcome {
    pub answer: String,
    /// True when the loop stopped at the turn budget while the model still
    /// wanted tools.
    pub truncated: bool,
    /// Model completions consumed by this request.
    pub model_turns: u32,
}

enum LoopState {
    AwaitingModel,
    Inspecting(ModelTurn),
    Dispatching(ModelTurn),
}

/// Runs the model against the conversation, dispatching requested tool calls
/// between turns. Every requested call in a dispatched turn yields exactly
/// one tool turn, failures included, so the model always sees a result for
/// each call it made.
pub async fn run_tool_call_loop(
    backend: &dyn ModelBackend,
    registry: &ToolRegistry,
    catalogue: &ToolCatalogue,
    conversation: &mut Conversation,
    max_model_turns: Option<u32>,
) -> Result<ChatOutcome, ModelBackendError> {
    let definitions = catalogue.definitions();
    let mut model_turns: u32 = 0;
    let mut state = LoopState::AwaitingModel;

    loop {
        state = match state {
            LoopState::AwaitingModel => {
                let turn = backend.chat(conversation.turns(), &definitions).await?;
                model_turns += 1;
                LoopState::Inspecting(turn)
            }
            LoopState::Inspecting(turn) => {
                if !turn.wants_tools() {
                    let answer = turn.content;
                    conversation.push(Role::Assistant, answer.clone());
                    return Ok(ChatOutcome {
                        answer,
                        truncated: false,
                        model_turns,
                    });
                }
                if max_model_turns.is_some_and(|cap| model_turns >= cap) {
                    warn!(
                        model_turns,
                        pending_calls = turn.tool_calls.len(),
                        "tool-calling loop hit its turn budget"
                    );
                    let answer = turn.content;
                    conversation.push(Role::Assistant, answer.clone());
                    return Ok(ChatOutcome {
                        answer,
                        truncated: true,
                        model_turns,
                    });
                }
                LoopState::Dispatching(turn)
            }
            LoopState::Dispatching(turn) => {
                debug!(calls = turn.tool_calls.len(), "dispatching tool calls");
                let results = join_all(turn.tool_calls.iter().map(|call| {
                    registry.invoke(catalogue, &call.tool_name, call.arguments.clone())
                }))
                .await;
                for (call, result) in turn.tool_calls.iter().zip(results) {
                    conversation.push(Role::Tool, render_tool_result(call, result));
                }
                LoopState::AwaitingModel
            }
        };
    }
}

/// Renders one dispatched call as the tool-turn text the model reads next.
fn render_tool_result(
    call: &ToolCallRequest,
    result: Result<ToolCallResult, InvocationError>,
) -> String {
    match result {
        Ok(result) if result.is_error => format!(
            "Tool call {} reported an error: {}",
            call.tool_name, result.content
        ),
        Ok(result) => format!("{}: {}", call.tool_name, result.content),
        Err(error) => format!("Tool call {} failed: {}", call.tool_name, error),
    }
}
