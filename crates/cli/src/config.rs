//! Configuration loading from toolwire.toml and the environment.

use mcp::Endpoint;
use runtime::{AgentConfig, DEFAULT_MODEL, GenerationParams, Retry, RetryPolicy, WatsonxBackend};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tools::RagConfig;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub agent: AgentConfig,
    pub http: HttpConfig,
    pub rag: RagSettings,
    pub search: SearchConfig,
    pub session: SessionConfig,

    /// Tool hosts the agent can connect to. The first one is the default.
    pub servers: Vec<Endpoint>,
}

/// watsonx.ai connection and generation settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Service URL (`IBM_CLOUD_URL`).
    pub url: Option<String>,
    /// IBM Cloud API key (`API_KEY`).
    pub api_key: Option<String>,
    /// watsonx project (`PROJECT_ID`).
    pub project_id: Option<String>,
    pub model: String,
    #[serde(flatten)]
    pub params: GenerationParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            project_id: None,
            model: DEFAULT_MODEL.to_string(),
            params: GenerationParams::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub policy: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Retry::DEFAULT_ATTEMPTS,
            policy: RetryPolicy::Always,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    /// Directory ingested when the research host starts.
    pub data_dir: PathBuf,
    /// text-embeddings-inference server (`TEI_URL`). Offline hashing
    /// embeddings are used when unset.
    pub tei_url: Option<String>,
    #[serde(flatten)]
    pub pipeline: RagConfig,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            tei_url: None,
            pipeline: RagConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Tavily API key (`TAVILY_API_KEY`).
    pub tavily_api_key: Option<String>,
}

/// Client sessions with tool hosts.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-request deadline. Unset waits as long as the host takes.
    pub request_timeout_secs: Option<u64>,
}

impl SessionConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load the file if it exists, otherwise start from defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Let environment variables override file values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut Option<String>, var: &str| {
            if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                *target = Some(value);
            }
        };
        set(&mut self.model.url, "IBM_CLOUD_URL");
        set(&mut self.model.api_key, "API_KEY");
        set(&mut self.model.project_id, "PROJECT_ID");
        set(&mut self.search.tavily_api_key, "TAVILY_API_KEY");
        set(&mut self.rag.tei_url, "TEI_URL");
    }

    /// Build the model backend. Missing credentials surface on the first call.
    pub fn backend(&self) -> WatsonxBackend {
        let mut builder = WatsonxBackend::builder()
            .model(&self.model.model)
            .params(self.model.params.clone());
        if let Some(url) = &self.model.url {
            builder = builder.url(url);
        }
        if let Some(key) = &self.model.api_key {
            builder = builder.api_key(key);
        }
        if let Some(project) = &self.model.project_id {
            builder = builder.project_id(project);
        }
        builder.build()
    }

    pub fn retry(&self) -> Retry {
        Retry::new(self.retry.max_attempts).with_policy(self.retry.policy)
    }

    /// Look up a configured server by name, or the first one.
    pub fn server(&self, name: Option<&str>) -> Option<&Endpoint> {
        match name {
            Some(name) => self.servers.iter().find(|s| s.name() == name),
            None => self.servers.first(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[model]
model = "ibm/granite-3-8b-instruct"
max_new_tokens = 512

[retry]
max_attempts = 5
policy = "transient_only"

[agent]
max_steps = 8

[rag]
data_dir = "docs"
top_k = 4

[session]
request_timeout_secs = 90

[[servers]]
transport = "stdio"
name = "math"
command = "toolwire"
args = ["host", "math"]

[[servers]]
transport = "tcp"
name = "research"
url = "tcp://127.0.0.1:8081"
"#;

    #[test]
    fn parses_full_config() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.model.model, "ibm/granite-3-8b-instruct");
        assert_eq!(config.model.params.max_new_tokens, 512);
        assert_eq!(config.model.params.random_seed, 42);
        assert_eq!(config.retry().max_attempts(), 5);
        assert_eq!(config.retry().policy(), RetryPolicy::TransientOnly);
        assert_eq!(config.agent.max_steps, 8);
        assert_eq!(config.rag.data_dir, PathBuf::from("docs"));
        assert_eq!(config.rag.pipeline.top_k, 4);
        assert_eq!(config.rag.pipeline.chunk_size, 200);

        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.server(None).map(Endpoint::name), Some("math"));
        assert!(matches!(
            config.server(Some("research")),
            Some(Endpoint::Remote { url, .. }) if url == "tcp://127.0.0.1:8081"
        ));
        assert_eq!(config.session.request_timeout(), Some(Duration::from_secs(90)));
        assert!(config.server(Some("weather")).is_none());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.model.model, DEFAULT_MODEL);
        assert_eq!(config.agent.max_steps, 20);
        assert_eq!(config.retry().max_attempts(), 3);
        assert_eq!(config.http.bind, "127.0.0.1:8000");
        assert!(config.servers.is_empty());
        assert_eq!(config.session.request_timeout(), None);
    }

    #[test]
    fn http_servers_are_remote_endpoints() {
        let config = Config::parse(
            "[[servers]]\ntransport = \"http\"\nname = \"finance\"\nurl = \"http://127.0.0.1:8082/mcp\"",
        )
        .unwrap();
        assert!(matches!(
            config.server(None),
            Some(Endpoint::Remote { name, url }) if name == "finance" && url == "http://127.0.0.1:8082/mcp"
        ));
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::parse("[model]\napi_key = \"from-file\"\nproject_id = \"p1\"").unwrap();
        let env: HashMap<&str, &str> = [
            ("API_KEY", "from-env"),
            ("IBM_CLOUD_URL", "https://us-south.ml.cloud.ibm.com"),
            ("PROJECT_ID", ""),
            ("TAVILY_API_KEY", "tvly-123"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|var| env.get(var).map(|v| v.to_string()));

        assert_eq!(config.model.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.model.url.as_deref(), Some("https://us-south.ml.cloud.ibm.com"));
        // Empty variables do not clear file values.
        assert_eq!(config.model.project_id.as_deref(), Some("p1"));
        assert_eq!(config.search.tavily_api_key.as_deref(), Some("tvly-123"));
        assert!(config.rag.tei_url.is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("toolwire.toml")).unwrap();
        assert!(config.servers.is_empty());

        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[agent\nmax_steps = ").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }
}
