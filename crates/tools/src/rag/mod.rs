//! Retrieval-augmented question answering tool.

mod chunk;
mod embed;
mod index;
mod pipeline;

use std::sync::Arc;

use async_trait::async_trait;
use mcp::{Arguments, ParamType, RegistryBuilder, ReturnType, ToolFailure, ToolHandler, ToolSpec};
use runtime::Backend;
use serde_json::Value;

pub use chunk::Chunk;
pub use embed::{Embedder, HashingEmbedder, TeiEmbedder};
pub use index::{Hit, VectorIndex};
pub use pipeline::{RagConfig, RagError, RagPipeline};

struct RagTool<B>(Arc<RagPipeline<B>>);

#[async_trait]
impl<B: Backend + 'static> ToolHandler for RagTool<B> {
    async fn call(&self, args: Arguments) -> Result<Value, ToolFailure> {
        let query = args.string("query")?;
        Ok(Value::String(self.0.query(query).await?))
    }
}

/// `rag`.
pub fn tools<B: Backend + 'static>(pipeline: Arc<RagPipeline<B>>) -> RegistryBuilder {
    mcp::ToolRegistry::builder().tool(
        ToolSpec::new("rag", "Answer a question from the ingested documents.")
            .param("query", ParamType::String, "The question to answer")
            .returns(ReturnType::String),
        RagTool(pipeline),
    )
}
