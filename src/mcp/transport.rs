//! Session transport for MCP servers over streamable HTTP.
//!
//! [`HttpTransport`] owns the connection to one remote server: it performs an
//! optional reachability probe, the `initialize` handshake, and request
//! dispatch with `mcp-session-id` tracking. Servers may answer with plain
//! JSON or an event-stream body; both paths converge on a single
//! [`ServerMessage`].

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{
    ClientCapabilities, Implementation, InitializeRequestParams, RequestId,
};
use std::time::Duration;
use tracing::{debug, warn};

use crate::mcp::error::TransportError;
use crate::mcp::protocol;
use crate::mcp::sse;

const HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const HTTP_REQUEST_TIMEOUT_SECONDS: u64 = 60;
const HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;

const JSON_CONTENT_TYPE: &str = "application/json";
const JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Transport contract consumed by the session manager. The seam exists so
/// session, registry, and loop behavior can be exercised without a network.
#[async_trait]
pub trait Transport: Send {
    /// Establishes the connection and performs the protocol handshake.
    /// A handshake failure must release any partially-opened state.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Sends one request and waits for the matching response message.
    async fn send_request(
        &mut self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, TransportError>;

    /// Idempotent teardown; safe on a never-opened transport. All later
    /// operations fail with [`TransportError::Closed`].
    async fn close(&mut self);
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    session_id: Option<String>,
    negotiated_protocol_version: Option<String>,
    next_request_id: i64,
    initialized: bool,
    closed: bool,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECONDS))
            .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECONDS))
            .pool_max_idle_per_host(HTTP_POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|err| TransportError::ConnectionFailed(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            session_id: None,
            negotiated_protocol_version: None,
            next_request_id: 0,
            initialized: false,
            closed: false,
        })
    }

    fn client_details() -> InitializeRequestParams {
        InitializeRequestParams {
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "confab".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Confab MCP Client".to_string()),
                description: None,
                icons: Vec::new(),
                website_url: None,
            },
            meta: None,
            protocol_version: protocol::requested_protocol_version(),
        }
    }

    fn take_request_id(&mut self) -> i64 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.saturating_add(1);
        id
    }

    /// Best-effort reachability check. Failure is logged, never fatal: some
    /// servers reject bare GETs but still speak the protocol on POST.
    async fn probe(&self) {
        match self.client.get(&self.base_url).send().await {
            Ok(response) => {
                debug!(url = %self.base_url, status = %response.status(), "reachability probe answered")
            }
            Err(err) => {
                warn!(url = %self.base_url, error = %err, "reachability probe failed")
            }
        }
    }

    async fn post_notification(
        &mut self,
        notification: NotificationFromClient,
    ) -> Result<(), TransportError> {
        let message =
            ClientMessage::from_message(MessageFromClient::NotificationFromClient(notification), None)
                .map_err(|err| TransportError::Decode(err.to_string()))?;
        let payload =
            serde_json::to_string(&message).map_err(|err| TransportError::Decode(err.to_string()))?;

        let response = self
            .build_post(payload)
            .send()
            .await
            .map_err(|err| TransportError::ConnectionFailed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Http(response.status()));
        }
        self.capture_session_id(&response);
        Ok(())
    }

    async fn post_request(
        &mut self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, TransportError> {
        let request_id = self.take_request_id();
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(RequestId::Integer(request_id)),
        )
        .map_err(|err| TransportError::Decode(err.to_string()))?;
        let payload =
            serde_json::to_string(&message).map_err(|err| TransportError::Decode(err.to_string()))?;

        debug!(url = %self.base_url, request_id, "sending MCP HTTP request");
        let response = self
            .build_post(payload)
            .send()
            .await
            .map_err(|err| TransportError::ConnectionFailed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Http(response.status()));
        }
        self.capture_session_id(&response);

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        if sse::is_event_stream_content_type(&content_type) {
            sse::next_sse_server_message(response).await
        } else {
            let body = response
                .bytes()
                .await
                .map_err(|err| TransportError::Stream(err.to_string()))?;
            serde_json::from_slice::<ServerMessage>(&body)
                .map_err(|err| TransportError::Decode(err.to_string()))
        }
    }

    fn build_post(&self, payload: String) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.base_url)
            .header("Content-Type", JSON_CONTENT_TYPE)
            .header("Accept", JSON_AND_SSE_ACCEPT)
            .header(
                PROTOCOL_VERSION_HEADER,
                protocol::effective_protocol_version(self.negotiated_protocol_version.as_deref()),
            )
            .body(payload);
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_ID_HEADER, session_id);
        }
        request
    }

    fn capture_session_id(&mut self, response: &reqwest::Response) {
        if let Some(session_id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            self.session_id = Some(session_id.to_string());
        }
    }

    fn release(&mut self) {
        self.session_id = None;
        self.negotiated_protocol_version = None;
        self.initialized = false;
        self.next_request_id = 0;
    }

    async fn perform_handshake(&mut self) -> Result<(), TransportError> {
        let response = self
            .post_request(RequestFromClient::InitializeRequest(Self::client_details()))
            .await?;
        let initialize = protocol::parse_initialize_result(response)?;
        self.negotiated_protocol_version = Some(initialize.protocol_version);
        self.post_notification(NotificationFromClient::InitializedNotification(None))
            .await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.initialized {
            return Ok(());
        }

        self.probe().await;

        let handshake = self.perform_handshake().await;
        match handshake {
            Ok(()) => {
                self.initialized = true;
                debug!(url = %self.base_url, session_id = ?self.session_id, "MCP session established");
                Ok(())
            }
            Err(err) => {
                // No leaked half-open handshakes: drop everything the
                // partial exchange established.
                self.release();
                Err(TransportError::HandshakeFailed(err.to_string()))
            }
        }
    }

    async fn send_request(
        &mut self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if !self.initialized {
            return Err(TransportError::NotConnected);
        }
        self.post_request(request).await
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.initialized {
            if let Some(session_id) = self.session_id.clone() {
                // Best effort: servers that track sessions can reclaim the
                // slot; others answer 405 and we move on.
                let _ = self
                    .client
                    .delete(&self.base_url)
                    .header(SESSION_ID_HEADER, session_id)
                    .send()
                    .await;
            }
        }
        self.release();
        self.closed = true;
    }
}
