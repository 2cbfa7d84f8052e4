//! Aggregates tools across all configured servers and routes calls to the
//! server that owns them.

use futures_util::future::join_all;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::{ToolDefinition, ToolFunction};
use crate::mcp::error::{InvocationError, ResolutionError, SessionError};
use crate::mcp::session::{SessionManager, ToolCallResult, ToolDescriptor};

pub struct ToolRegistry {
    /// Configuration order; resolution precedence depends on it.
    servers: Vec<Arc<SessionManager>>,
}

/// One failed server during discovery. Recorded, not fatal: a single bad
/// server never blocks the chat loop.
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub server: String,
    pub error: SessionError,
}

/// Snapshot of every advertised tool, taken once per chat invocation.
#[derive(Debug, Default)]
pub struct ToolCatalogue {
    tools: Vec<ToolDescriptor>,
    failures: Vec<DiscoveryFailure>,
}

impl ToolCatalogue {
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn failures(&self) -> &[DiscoveryFailure] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Maps descriptors into the function-call shape model backends consume.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| ToolDefinition {
                kind: "function".to_string(),
                function: ToolFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                },
            })
            .collect()
    }

    /// Resolves a tool name to the server that advertised it. When several
    /// servers advertise the same name, the first in configuration order
    /// wins, deterministically, and the ambiguity is logged.
    pub fn resolve(&self, tool_name: &str) -> Result<&ToolDescriptor, ResolutionError> {
        let mut matches = self.tools.iter().filter(|tool| tool.name == tool_name);
        let Some(first) = matches.next() else {
            return Err(ResolutionError::NotFound(tool_name.to_string()));
        };
        let shadowed: Vec<&str> = matches.map(|tool| tool.server.as_str()).collect();
        if !shadowed.is_empty() {
            warn!(
                tool = tool_name,
                chosen = %first.server,
                shadowed = ?shadowed,
                "tool name advertised by multiple servers; using configuration order"
            );
        }
        Ok(first)
    }
}

impl ToolRegistry {
    pub fn new(servers: Vec<Arc<SessionManager>>) -> Self {
        Self { servers }
    }

    pub fn servers(&self) -> &[Arc<SessionManager>] {
        &self.servers
    }

    pub fn find_server(&self, name: &str) -> Option<&Arc<SessionManager>> {
        self.servers
            .iter()
            .find(|server| server.name().eq_ignore_ascii_case(name))
    }

    /// Queries every enabled server for its tools. Partial-success: a
    /// failing server is recorded in the catalogue and excluded from the
    /// aggregate, never propagated as a fatal error.
    pub async fn discover_all(&self) -> ToolCatalogue {
        let enabled: Vec<&Arc<SessionManager>> = self
            .servers
            .iter()
            .filter(|server| server.is_enabled())
            .collect();

        let listings = join_all(enabled.iter().map(|server| server.list_tools())).await;

        let mut catalogue = ToolCatalogue::default();
        for (server, listing) in enabled.iter().zip(listings) {
            match listing {
                Ok(tools) => catalogue.tools.extend(tools),
                Err(error) => {
                    warn!(server = %server.name(), error = %error, "tool discovery failed");
                    catalogue.failures.push(DiscoveryFailure {
                        server: server.name().to_string(),
                        error,
                    });
                }
            }
        }
        debug!(
            tools = catalogue.tools.len(),
            failures = catalogue.failures.len(),
            "tool discovery finished"
        );
        catalogue
    }

    /// Resolves the tool against the catalogue and delegates to the owning
    /// server's session.
    pub async fn invoke(
        &self,
        catalogue: &ToolCatalogue,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallResult, InvocationError> {
        let descriptor = catalogue.resolve(tool_name)?;
        let Some(server) = self.find_server(&descriptor.server) else {
            return Err(InvocationError::Resolution(ResolutionError::NotFound(
                tool_name.to_string(),
            )));
        };
        Ok(server.call_tool(tool_name, arguments).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ServerConfig;
    use crate::mcp::testing::{FakeBehavior, FakeTransport};

    fn fake_server(name: &str, behavior: Arc<FakeBehavior>) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            ServerConfig {
                name: name.to_string(),
                url: format!("http://{name}.test"),
                enabled: Some(true),
            },
            Box::new(move |_| Box::new(FakeTransport::new(behavior.clone()))),
        ))
    }

    #[tokio::test]
    async fn discovery_skips_failing_servers() {
        let alpha = Arc::new(FakeBehavior::with_tools(vec![("a", "alpha tool")]));
        let beta = Arc::new(FakeBehavior::with_tools(vec![("b", "beta tool")]));
        beta.fail_next_connects(usize::MAX);
        let gamma = Arc::new(FakeBehavior::with_tools(vec![("c", "gamma tool")]));

        let registry = ToolRegistry::new(vec![
            fake_server("alpha", alpha),
            fake_server("beta", beta),
            fake_server("gamma", gamma),
        ]);

        let catalogue = registry.discover_all().await;
        let names: Vec<&str> = catalogue.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(catalogue.failures().len(), 1);
        assert_eq!(catalogue.failures()[0].server, "beta");
    }

    #[tokio::test]
    async fn duplicate_names_resolve_in_configuration_order() {
        let alpha = Arc::new(FakeBehavior::with_tools(vec![("x", "alpha x")]));
        let beta = Arc::new(FakeBehavior::with_tools(vec![("x", "beta x")]));
        let registry = ToolRegistry::new(vec![
            fake_server("alpha", alpha),
            fake_server("beta", beta),
        ]);

        let catalogue = registry.discover_all().await;
        for _ in 0..3 {
            let resolved = catalogue.resolve("x").expect("x should resolve");
            assert_eq!(resolved.server, "alpha");
        }
    }

    #[tokio::test]
    async fn unknown_tool_fails_resolution() {
        let registry = ToolRegistry::new(vec![fake_server(
            "alpha",
            Arc::new(FakeBehavior::with_tools(vec![("a", "alpha tool")])),
        )]);
        let catalogue = registry.discover_all().await;
        assert!(matches!(
            catalogue.resolve("missing"),
            Err(ResolutionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invoke_routes_to_the_owning_server() {
        let alpha = Arc::new(FakeBehavior::with_tools(vec![("a", "alpha tool")]));
        let beta = Arc::new(FakeBehavior::with_tools(vec![("beta_only", "beta tool")]));
        let alpha_calls = alpha.calls();
        let beta_calls = beta.calls();

        let registry = ToolRegistry::new(vec![
            fake_server("alpha", alpha),
            fake_server("beta", beta),
        ]);
        let catalogue = registry.discover_all().await;

        registry
            .invoke(&catalogue, "beta_only", Map::new())
            .await
            .expect("invoke should succeed");

        assert!(alpha_calls.lock().expect("alpha calls").is_empty());
        assert_eq!(
            beta_calls.lock().expect("beta calls").as_slice(),
            ["beta_only"]
        );
    }

    #[tokio::test]
    async fn disabled_servers_are_not_discovered() {
        let behavior = Arc::new(FakeBehavior::with_tools(vec![("a", "alpha tool")]));
        let connects = behavior.connects();
        let manager = Arc::new(SessionManager::new(
            ServerConfig {
                name: "alpha".to_string(),
                url: "http://alpha.test".to_string(),
                enabled: Some(false),
            },
            Box::new(move |_| Box::new(FakeTransport::new(behavior.clone()))),
        ));
        let registry = ToolRegistry::new(vec![manager]);

        let catalogue = registry.discover_all().await;
        assert!(catalogue.is_empty());
        assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
