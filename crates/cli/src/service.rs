//! Answering one query: open a session, run the agent, close the session.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mcp::{Endpoint, ServerConfig};
use runtime::{Agent, AgentConfig, McpToolbox, RetryingBackend, WatsonxBackend};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Something that turns a user query into an answer.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn answer(&self, query: &str) -> Result<String>;
}

/// Runs the agent against a tool host, one session per query.
pub struct AgentService {
    agent: Agent<RetryingBackend<WatsonxBackend>>,
    endpoint: Endpoint,
    request_timeout: Option<Duration>,
}

impl AgentService {
    pub fn new(config: &Config, agent: AgentConfig, endpoint: Endpoint) -> Self {
        let backend = RetryingBackend::new(config.backend(), config.retry());
        Self {
            agent: Agent::new(backend, agent),
            endpoint,
            request_timeout: config.session.request_timeout(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl ChatService for AgentService {
    async fn answer(&self, query: &str) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::EmptyQuery);
        }

        let mut toolbox = McpToolbox::connect(&self.endpoint, self.request_timeout).await?;
        let instructions = toolbox.instructions().map(str::to_owned);
        let outcome = self
            .agent
            .run_with_instructions(&mut toolbox, query, instructions.as_deref())
            .await;

        // The session is released whether or not the agent succeeded.
        if let Err(e) = toolbox.close().await {
            warn!(server = %self.endpoint.name(), error = %e, "Failed to close session");
        }

        let outcome = outcome?;
        info!(steps = outcome.steps, "Query answered");
        Ok(outcome.answer)
    }
}

/// The configured server named `name`, the first configured server, or this
/// binary's own math host over stdio.
pub fn resolve_endpoint(config: &Config, name: Option<&str>) -> Result<Endpoint> {
    if let Some(endpoint) = config.server(name) {
        return Ok(endpoint.clone());
    }
    if let Some(name) = name {
        return Err(Error::UnknownServer(name.to_string()));
    }

    let exe = std::env::current_exe()?;
    Ok(Endpoint::Stdio(ServerConfig {
        name: "math".to_string(),
        command: exe.display().to_string(),
        args: vec!["host".to_string(), "math".to_string()],
        env: HashMap::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_own_math_host() {
        let config = Config::default();
        let endpoint = resolve_endpoint(&config, None).unwrap();
        assert!(matches!(
            endpoint,
            Endpoint::Stdio(ServerConfig { ref name, ref args, .. }) if name == "math" && args == &["host", "math"]
        ));
    }

    #[test]
    fn unknown_server_names_are_errors() {
        let config = Config::default();
        assert!(matches!(
            resolve_endpoint(&config, Some("weather")),
            Err(Error::UnknownServer(name)) if name == "weather"
        ));
    }

    #[tokio::test]
    async fn empty_queries_never_open_a_session() {
        let endpoint = Endpoint::Remote {
            name: "nowhere".into(),
            url: "tcp://127.0.0.1:1".into(),
        };
        let service = AgentService::new(&Config::default(), AgentConfig::default(), endpoint);
        assert!(matches!(service.answer("   ").await, Err(Error::EmptyQuery)));
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = Endpoint::Remote {
            name: "gone".into(),
            url: format!("tcp://{addr}"),
        };
        let service = AgentService::new(&Config::default(), AgentConfig::default(), endpoint);
        assert!(matches!(service.answer("1 + 1").await, Err(Error::Mcp(_))));
    }
}
