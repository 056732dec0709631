use std::sync::Arc;

use ai_client::{EmbedAgent, OpenAi};
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use synapse_common::{Config, HitKind, SynapticSearchHit};

/// Dyn-compatible embedding trait (wraps `ai_client::EmbedAgent`).
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Structured verdict for a personal signal, as returned by the semantic
/// classifier tier. Flat on purpose: strict structured output handles flat
/// optionals better than nested unions.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SignalVerdict {
    /// One of: finance, todo, crypto, links, openai.
    pub module: String,
    /// Model-derived confidence in [0,1].
    pub confidence: f32,
    pub merchant: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub todo_title: Option<String>,
    /// "buy" or "sell".
    pub crypto_action: Option<String>,
    pub crypto_symbol: Option<String>,
    pub crypto_amount: Option<f64>,
    pub crypto_price: Option<f64>,
    pub link_url: Option<String>,
    pub link_title: Option<String>,
    pub keywords: Vec<String>,
}

/// Raw topic verdict for a news item. Strings, not `Topic`: the pipeline
/// filters against the closed enumeration and substitutes the safe default.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TopicVerdict {
    pub topic_primary: String,
    pub tags: Vec<String>,
    /// Classifier confidence in [0,1].
    pub tag_confidence: f32,
}

/// Classification gateway shared by the signal dispatcher and the news
/// tagger.
#[async_trait]
pub trait ClassifierService: Send + Sync {
    async fn classify_signal(&self, text: &str, hint: Option<&str>) -> Result<SignalVerdict>;
    async fn classify_news(
        &self,
        title: &str,
        body: &str,
        hint: Option<&str>,
    ) -> Result<TopicVerdict>;
}

/// Nearest-neighbor query surface over previously stored vectors.
///
/// Similarity is `1 - cosine distance` (pgvector `<=>`); hits come back in
/// descending similarity order, already filtered to the threshold.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn nearest(
        &self,
        query: &[f32],
        similarity_threshold: f32,
        match_count: usize,
        kind: Option<HitKind>,
    ) -> Result<Vec<SynapticSearchHit>>;

    async fn insert(
        &self,
        kind: HitKind,
        text: &str,
        metadata: &serde_json::Value,
        embedding: &[f32],
    ) -> Result<Uuid>;
}

/// Central dependency container passed to handlers and workers.
#[derive(Clone)]
pub struct SynapseDeps {
    pub db_pool: PgPool,
    pub ai: Arc<OpenAi>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub classifier: Arc<dyn ClassifierService>,
    pub vectors: Arc<dyn VectorIndex>,
    pub config: Config,
}

impl SynapseDeps {
    pub fn pool(&self) -> &PgPool {
        &self.db_pool
    }
}

// --- OpenAI-backed gateway implementations ---

pub struct OpenAiEmbedder {
    inner: Arc<OpenAi>,
}

impl OpenAiEmbedder {
    pub fn new(inner: Arc<OpenAi>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_batch(texts).await
    }
}

const SIGNAL_SYSTEM_PROMPT: &str = "\
You classify one personal signal into exactly one module: finance (a purchase \
or expense), todo (a task to do), crypto (a buy/sell of a crypto asset), \
links (a URL to save), or openai (anything conversational or too vague to \
act on). Extract only fields you are certain of; leave the rest null. \
Confidence reflects how sure you are of BOTH the module and the extracted \
fields. Vague or speculative phrasing must score below 0.5.";

const NEWS_SYSTEM_PROMPT: &str = "\
You tag a news item. topic_primary must be one of: ai, crypto, geopolitics, \
macro, regulation, tech. tags is a subset of the same list (1-3 entries, \
topic_primary included). tag_confidence reflects how clearly the item fits \
the primary topic.";

pub struct OpenAiClassifier {
    inner: Arc<OpenAi>,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(inner: Arc<OpenAi>, model: impl Into<String>) -> Self {
        Self {
            inner,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ClassifierService for OpenAiClassifier {
    async fn classify_signal(&self, text: &str, hint: Option<&str>) -> Result<SignalVerdict> {
        let user_prompt = match hint {
            Some(h) => format!("Signal:\n{text}\n\nHint: {h}"),
            None => format!("Signal:\n{text}"),
        };
        self.inner
            .extract(&self.model, SIGNAL_SYSTEM_PROMPT, user_prompt)
            .await
    }

    async fn classify_news(
        &self,
        title: &str,
        body: &str,
        hint: Option<&str>,
    ) -> Result<TopicVerdict> {
        let user_prompt = match hint {
            Some(h) => format!("Title: {title}\n\n{body}\n\nHint: {h}"),
            None => format!("Title: {title}\n\n{body}"),
        };
        self.inner
            .extract(&self.model, NEWS_SYSTEM_PROMPT, user_prompt)
            .await
    }
}
