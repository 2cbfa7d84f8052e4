//! Confab is a chatbot engine that lets a local LLM call tools hosted on
//! MCP servers over streamable HTTP.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] implements the Model Context Protocol client: the streamable
//!   HTTP transport, per-server session lifecycle, and the tool registry
//!   that aggregates and routes tool calls.
//! - [`llm`] defines the model backend seam and the Ollama implementation.
//! - [`core`] owns configuration, conversation state, the chat-session
//!   store, the tool-calling loop, and the engine that ties them together.
//! - [`api`] defines the chat payload types exchanged with model backends.
//!
//! The binary crate (`src/main.rs`) wraps [`core::engine::ChatEngine`] in a
//! command-line interface with an interactive chat mode.

pub mod api;
pub mod core;
pub mod llm;
pub mod mcp;
