//! Web search tool backed by the Tavily API.

use std::sync::Arc;

use async_trait::async_trait;
use mcp::{Arguments, ParamType, RegistryBuilder, ReturnType, ToolFailure, ToolHandler, ToolSpec};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;

pub const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";
pub const DEFAULT_MAX_RESULTS: u32 = 3;

/// Something that can search the web.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Value, ProviderError>;
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u32,
}

/// Tavily search client. A missing API key fails the search, not construction.
#[derive(Debug, Clone)]
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    max_results: u32,
}

impl TavilySearch {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: TAVILY_SEARCH_URL.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str) -> Result<Value, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::Config("TAVILY_API_KEY is not set".into()))?;

        debug!(%query, max_results = self.max_results, "Searching the web");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&SearchRequest {
                query,
                max_results: self.max_results,
            })
            .send()
            .await?;

        let response = ProviderError::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

struct WebSearch(Arc<dyn SearchProvider>);

#[async_trait]
impl ToolHandler for WebSearch {
    async fn call(&self, args: Arguments) -> Result<Value, ToolFailure> {
        let query = args.string("query")?;
        Ok(self.0.search(query).await?)
    }
}

/// `web_search`.
pub fn tools(provider: Arc<dyn SearchProvider>) -> RegistryBuilder {
    mcp::ToolRegistry::builder().tool(
        ToolSpec::new("web_search", "Search the web for the given query.")
            .param("query", ParamType::String, "What to search for")
            .returns(ReturnType::Json),
        WebSearch(provider),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp::ToolCallResult;
    use serde_json::json;

    struct Canned;

    #[async_trait]
    impl SearchProvider for Canned {
        async fn search(&self, query: &str) -> Result<Value, ProviderError> {
            Ok(json!({"query": query, "results": [{"title": "DeepSeek-R1", "url": "https://example.com"}]}))
        }
    }

    #[tokio::test]
    async fn web_search_returns_provider_json() {
        let registry = tools(Arc::new(Canned)).build().unwrap();
        let result = registry
            .dispatch("web_search", json!({"query": "deepseek"}).as_object().cloned())
            .await;
        let ToolCallResult::Ok(value) = result else {
            panic!("expected a value, got {result:?}");
        };
        assert_eq!(value["query"], "deepseek");
        assert_eq!(value["results"][0]["title"], "DeepSeek-R1");
    }

    #[tokio::test]
    async fn missing_api_key_is_a_tool_error() {
        let registry = tools(Arc::new(TavilySearch::new(None))).build().unwrap();
        let result = registry
            .dispatch("web_search", json!({"query": "rust"}).as_object().cloned())
            .await;
        assert_eq!(
            result,
            ToolCallResult::Err("provider config: TAVILY_API_KEY is not set".into())
        );
    }
}
