//! Tool catalogue served by toolwire hosts.
//!
//! Each module contributes a [`RegistryBuilder`](mcp::RegistryBuilder); the
//! functions below assemble them into the registries a host serves.

mod error;
pub mod finance;
pub mod math;
pub mod rag;
pub mod search;

use std::sync::Arc;

use mcp::{RegistryError, ToolRegistry};
use runtime::Backend;

pub use error::ProviderError;
pub use finance::{MarketData, YahooEndpoints, YahooFinance};
pub use rag::{HashingEmbedder, RagConfig, RagError, RagPipeline, TeiEmbedder};
pub use search::{SearchProvider, TavilySearch};

/// `add`, `multiply`.
pub fn math_registry() -> Result<ToolRegistry, RegistryError> {
    math::tools().build()
}

/// Quote, news and analysis tools over `market`.
pub fn finance_registry(market: Arc<dyn MarketData>) -> Result<ToolRegistry, RegistryError> {
    finance::tools(market).build()
}

/// `web_search` and `rag`.
pub fn research_registry<B: Backend + 'static>(
    search: Arc<dyn SearchProvider>,
    rag: Arc<RagPipeline<B>>,
) -> Result<ToolRegistry, RegistryError> {
    search::tools(search).merge(rag::tools(rag)).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcp::ToolCallResult;
    use runtime::{ModelError, ModelRequest, ModelResponse, Usage};
    use serde_json::{Value, json};

    struct NoSearch;

    #[async_trait]
    impl SearchProvider for NoSearch {
        async fn search(&self, _query: &str) -> Result<Value, ProviderError> {
            Ok(json!({"results": []}))
        }
    }

    struct Silent;

    impl Backend for Silent {
        async fn call(&self, _request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
            Ok(ModelResponse {
                text: String::new(),
                usage: Usage::default(),
            })
        }
    }

    #[test]
    fn catalogues_have_expected_tools() {
        let math: Vec<_> = math_registry().unwrap().names().map(String::from).collect();
        assert_eq!(math, ["add", "multiply"]);

        let finance = finance_registry(Arc::new(YahooFinance::new().unwrap())).unwrap();
        let names: Vec<_> = finance.names().collect();
        assert_eq!(
            names,
            ["get_ticker_info", "get_ticker_news", "search_quote", "search_news", "analyze_ticker"]
        );
    }

    #[tokio::test]
    async fn research_rag_before_ingestion_is_a_tool_error() {
        let rag = RagPipeline::new(Silent, Arc::new(HashingEmbedder::default()), RagConfig::default());
        let registry = research_registry(Arc::new(NoSearch), Arc::new(rag)).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), ["web_search", "rag"]);

        let result = registry
            .dispatch("rag", json!({"query": "How was DeepSeek-R1 trained?"}).as_object().cloned())
            .await;
        assert_eq!(
            result,
            ToolCallResult::Err("no documents have been ingested".into())
        );
    }
}
