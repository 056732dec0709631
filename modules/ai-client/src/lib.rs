//! OpenAI-compatible AI client: chat completions, strict structured output
//! (JSON-schema response format derived via `schemars`), and embeddings.
//!
//! Providers that speak the OpenAI wire protocol (OpenAI itself, Voyage for
//! embeddings, local gateways) are reached by swapping the base URL.

pub mod openai;
pub mod schema;
mod wire;

pub use openai::OpenAi;
pub use schema::StructuredOutput;

use anyhow::Result;
use async_trait::async_trait;

/// Dyn-compatible embedding surface.
#[async_trait]
pub trait EmbedAgent: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
