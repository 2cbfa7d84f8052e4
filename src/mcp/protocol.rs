//! Typed decoding of MCP server messages.

use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{
    CallToolResult, InitializeResult, ListResourcesResult, ListToolsResult, ReadResourceResult,
    RpcError, LATEST_PROTOCOL_VERSION,
};
use serde_json::Value;

use crate::mcp::error::TransportError;

pub fn requested_protocol_version() -> String {
    LATEST_PROTOCOL_VERSION.to_string()
}

/// Prefers the version the server negotiated during initialize.
pub fn effective_protocol_version(negotiated: Option<&str>) -> String {
    match negotiated {
        Some(version) if !version.trim().is_empty() => version.to_string(),
        _ => requested_protocol_version(),
    }
}

pub fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult, TransportError> {
    let value = response_value(message)?;
    let result = serde_json::from_value::<InitializeResult>(value)
        .map_err(|err| TransportError::Decode(err.to_string()))?;
    if result.protocol_version.trim().is_empty() {
        return Err(TransportError::Decode(
            "initialize response carried a blank protocol version".to_string(),
        ));
    }
    Ok(result)
}

pub fn parse_list_tools(message: ServerMessage) -> Result<ListToolsResult, TransportError> {
    parse_response(message)
}

pub fn parse_call_tool(message: ServerMessage) -> Result<CallToolResult, TransportError> {
    parse_response(message)
}

pub fn parse_list_resources(
    message: ServerMessage,
) -> Result<ListResourcesResult, TransportError> {
    parse_response(message)
}

pub fn parse_read_resource(message: ServerMessage) -> Result<ReadResourceResult, TransportError> {
    parse_response(message)
}

fn parse_response<T: serde::de::DeserializeOwned>(
    message: ServerMessage,
) -> Result<T, TransportError> {
    let value = response_value(message)?;
    serde_json::from_value::<T>(value).map_err(|err| TransportError::Decode(err.to_string()))
}

fn response_value(message: ServerMessage) -> Result<Value, TransportError> {
    match message {
        ServerMessage::Response(response) => serde_json::to_value(&response.result)
            .map_err(|err| TransportError::Decode(err.to_string())),
        ServerMessage::Error(error) => Err(rpc_error(&error.error)),
        other => Err(TransportError::Decode(format!(
            "unexpected server message: {other:?}"
        ))),
    }
}

fn rpc_error(error: &RpcError) -> TransportError {
    let mut message = error.message.clone();
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()));
        if let Some(details) = details {
            if !details.is_empty() {
                message.push_str(": ");
                message.push_str(&details);
            }
        }
    }
    TransportError::Rpc {
        code: error.code,
        message,
    }
}
