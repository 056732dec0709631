//! Integration tests for news persistence invariants against a real
//! Postgres instance: URL uniqueness and near-duplicate collapsing.
//!
//! Requirements: Docker (for Postgres via testcontainers)
//!
//! Run with: cargo test -p synapse-ingest --features test-utils --test news_dedup_test

#![cfg(feature = "test-utils")]

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use ai_client::OpenAi;
use synapse_common::{Config, Topic};
use synapse_core::deps::{ClassifierService, SignalVerdict, TopicVerdict};
use synapse_core::{EmbeddingService, PgVectorIndex, SynapseDeps};
use synapse_ingest::news::{self, InsertOutcome, NewsDraft};
use synapse_ingest::queue::{self, JOB_NEWS_INGEST};
use synapse_ingest::{
    news_job_id, JobContext, JobHandler, JobResult, NewsIngestHandler, NewsJobPayload,
};

// --- Mocks ---

/// Every text embeds to the same vector, so any two items look identical
/// to the dedup check.
struct ConstantEmbedder;

#[async_trait]
impl EmbeddingService for ConstantEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.7; 1536])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(vec![vec![0.7; 1536]; texts.len()])
    }
}

struct FixedTagger;

#[async_trait]
impl ClassifierService for FixedTagger {
    async fn classify_signal(&self, _text: &str, _hint: Option<&str>) -> Result<SignalVerdict> {
        unreachable!("news tests never classify signals")
    }

    async fn classify_news(
        &self,
        _title: &str,
        _body: &str,
        _hint: Option<&str>,
    ) -> Result<TopicVerdict> {
        Ok(TopicVerdict {
            topic_primary: "ai".into(),
            tags: vec!["ai".into()],
            tag_confidence: 0.9,
        })
    }
}

// --- Setup ---

fn test_config() -> Config {
    Config {
        database_url: String::new(),
        openai_api_key: "test".into(),
        chat_model: "gpt-4o".into(),
        classifier_model: "gpt-4o-mini".into(),
        embedding_model: "text-embedding-3-small".into(),
        ingest_secret: "secret".into(),
        owner_ids: vec!["owner".into()],
        auto_commit_threshold: 0.85,
        discard_threshold: 0.55,
        dedup_threshold: 0.90,
        briefing_timezone: "Europe/Lisbon".into(),
        web_host: "127.0.0.1".into(),
        web_port: 0,
    }
}

fn deps(pool: PgPool) -> SynapseDeps {
    SynapseDeps {
        db_pool: pool.clone(),
        ai: Arc::new(OpenAi::new("test", "gpt-4o")),
        embedder: Arc::new(ConstantEmbedder),
        classifier: Arc::new(FixedTagger),
        vectors: Arc::new(PgVectorIndex::new(pool)),
        config: test_config(),
    }
}

fn draft(url: &str) -> NewsDraft {
    NewsDraft {
        title: "Model release".into(),
        summary: "A lab shipped a new model.".into(),
        source_url: url.into(),
        source_name: "Example Wire".into(),
        topic_primary: Topic::Ai,
        tags: vec!["ai".into()],
        tag_confidence: 0.9,
        score: 0.8,
        published_at: None,
    }
}

fn payload(title: &str, url: &str) -> NewsJobPayload {
    NewsJobPayload {
        title: title.into(),
        summary: "A lab shipped a new model, and the benchmarks moved.".into(),
        source_url: url.into(),
        source_name: "Example Wire".into(),
        topic_hint: None,
        published_at: None,
    }
}

async fn run_job(pool: &PgPool, handler: &NewsIngestHandler, p: &NewsJobPayload) -> JobResult {
    let job_id = news_job_id(&p.source_url);
    let payload_json = serde_json::to_value(p).expect("serialize payload");
    queue::enqueue(pool, &job_id, JOB_NEWS_INGEST, &payload_json)
        .await
        .expect("enqueue");
    let job = queue::claim(pool, JOB_NEWS_INGEST)
        .await
        .expect("claim")
        .expect("job present");
    handler.execute(&JobContext::new(job)).await
}

async fn news_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM news_items")
        .fetch_one(pool)
        .await
        .expect("count news")
}

// --- Tests ---

#[tokio::test]
async fn same_source_url_inserts_once() {
    let (_container, pool) = synapse_core::testutil::postgres_container().await;
    let embedding = vec![0.7f32; 1536];

    let first = news::insert(&pool, &draft("https://example.com/a"), &embedding)
        .await
        .expect("first insert");
    assert!(matches!(first, InsertOutcome::Inserted(_)));

    // Same URL again: reported as a duplicate, not an error, and no second
    // row appears.
    let second = news::insert(&pool, &draft("https://example.com/a"), &embedding)
        .await
        .expect("second insert succeeds");
    assert!(matches!(second, InsertOutcome::DuplicateUrl));
    assert_eq!(news_count(&pool).await, 1);
}

#[tokio::test]
async fn near_duplicate_is_dropped_and_head_marked() {
    let (_container, pool) = synapse_core::testutil::postgres_container().await;
    let handler = NewsIngestHandler::new(deps(pool.clone()));

    let first = run_job(
        &pool,
        &handler,
        &payload("Model release", "https://example.com/a"),
    )
    .await;
    assert!(matches!(first, JobResult::Success), "got {first:?}");

    // A different URL with an identical embedding: the pipeline drops it
    // and marks the existing story as its group's head.
    let second = run_job(
        &pool,
        &handler,
        &payload("Model release (syndicated)", "https://mirror.example.com/a"),
    )
    .await;
    assert!(matches!(second, JobResult::Skipped(_)), "got {second:?}");

    assert_eq!(news_count(&pool).await, 1);

    let items = news::list_top(&pool, None, 10).await.expect("list");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].source_url, "https://example.com/a");
    assert_eq!(items[0].dedup_group_id, Some(items[0].id));
}
