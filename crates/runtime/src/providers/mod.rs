//! LLM provider adapters.
//!
//! Each provider implements the backend trait for its specific API.

mod watsonx;

pub use watsonx::{
    DEFAULT_IAM_URL, DEFAULT_MODEL, Decoding, GenerationParams, WatsonxBackend,
    WatsonxBackendBuilder,
};
