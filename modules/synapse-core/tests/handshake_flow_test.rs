//! Integration tests for the handshake state machine against a real
//! Postgres instance.
//!
//! Requirements: Docker (for Postgres via testcontainers)
//!
//! Run with: cargo test -p synapse-core --features test-utils --test handshake_flow_test

#![cfg(feature = "test-utils")]

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use ai_client::OpenAi;
use synapse_common::{
    Config, HitKind, ModuleDraft, SynapseError, SynapticMemory, TargetModule,
};
use synapse_core::deps::{ClassifierService, SignalVerdict, TopicVerdict};
use synapse_core::{
    create_draft, record_handshake, store, EmbeddingService, PgVectorIndex, SynapseDeps,
};

// --- Mocks ---

/// Deterministic fake: first bytes of the text as f32 values, padded to the
/// stored vector width.
struct StubEmbedder;

#[async_trait]
impl EmbeddingService for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; 1536];
        for (i, b) in text.bytes().take(16).enumerate() {
            v[i] = b as f32 / 255.0;
        }
        Ok(v)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::new();
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }
}

struct FailingEmbedder;

#[async_trait]
impl EmbeddingService for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("embedding provider unavailable")
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding provider unavailable")
    }
}

struct UnusedClassifier;

#[async_trait]
impl ClassifierService for UnusedClassifier {
    async fn classify_signal(&self, _text: &str, _hint: Option<&str>) -> Result<SignalVerdict> {
        unreachable!("handshake tests never classify")
    }

    async fn classify_news(
        &self,
        _title: &str,
        _body: &str,
        _hint: Option<&str>,
    ) -> Result<TopicVerdict> {
        unreachable!("handshake tests never tag news")
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

fn deps_with(pool: PgPool, embedder: Arc<dyn EmbeddingService>) -> SynapseDeps {
    SynapseDeps {
        db_pool: pool.clone(),
        ai: Arc::new(OpenAi::new("test", "gpt-4o")),
        embedder,
        classifier: Arc::new(UnusedClassifier),
        vectors: Arc::new(PgVectorIndex::new(pool)),
        config: test_config(),
    }
}

fn finance_draft() -> ModuleDraft {
    ModuleDraft::Finance {
        merchant: "Pizza Hut".into(),
        amount: 12.50,
        currency: "EUR".into(),
    }
}

async fn pending_draft(deps: &SynapseDeps) -> Uuid {
    let signal = store::create_raw_signal(
        synapse_common::SignalType::Text,
        "test",
        "Pizza Hut 12.50 EUR",
        &serde_json::json!({}),
        deps.pool(),
    )
    .await
    .expect("create raw signal");

    create_draft(deps, signal.id, 0.70, &finance_draft())
        .await
        .expect("create draft");

    signal.id
}

async fn commit_count(pool: &PgPool, raw_signal_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM module_commits WHERE raw_signal_id = $1")
        .bind(raw_signal_id)
        .fetch_one(pool)
        .await
        .expect("count commits")
}

async fn handshake_status(pool: &PgPool, raw_signal_id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM handshakes WHERE raw_signal_id = $1")
        .bind(raw_signal_id)
        .fetch_one(pool)
        .await
        .expect("fetch status")
}

// --- Tests ---

#[tokio::test]
async fn terminal_handshake_conflicts_and_stays() {
    let (_container, pool) = synapse_core::testutil::postgres_container().await;
    let deps = deps_with(pool.clone(), Arc::new(StubEmbedder));
    let signal_id = pending_draft(&deps).await;

    let memory = vec![SynapticMemory {
        kind: HitKind::RecurringMerchant,
        text: "Pizza Hut is a recurring dinner spot".into(),
        metadata: serde_json::json!({"merchant": "Pizza Hut"}),
    }];

    let approved = record_handshake(
        &deps,
        signal_id,
        TargetModule::Finance,
        synapse_common::HandshakeStatus::Approved,
        Some(0.95),
        None,
        &memory,
    )
    .await
    .expect("first record succeeds");
    assert_eq!(approved.status, "approved");
    assert_eq!(commit_count(&pool, signal_id).await, 1);

    let memories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM synaptic_memories")
        .fetch_one(&pool)
        .await
        .expect("count memories");
    assert_eq!(memories, 1);

    // A second resolution of the same handshake must conflict and alter
    // nothing, whichever terminal status it asks for.
    let err = record_handshake(
        &deps,
        signal_id,
        TargetModule::Finance,
        synapse_common::HandshakeStatus::Rejected,
        None,
        None,
        &[],
    )
    .await
    .expect_err("re-record must fail");
    assert!(matches!(err, SynapseError::Conflict(_)), "got {err:?}");

    assert_eq!(handshake_status(&pool, signal_id).await, "approved");
    assert_eq!(commit_count(&pool, signal_id).await, 1);
}

#[tokio::test]
async fn claimed_handshake_conflicts_before_side_effects() {
    let (_container, pool) = synapse_core::testutil::postgres_container().await;
    let deps = deps_with(pool.clone(), Arc::new(StubEmbedder));
    let signal_id = pending_draft(&deps).await;

    // Simulate another callback mid-approval: the row is claimed but not
    // yet terminal.
    sqlx::query("UPDATE handshakes SET status = 'executing' WHERE raw_signal_id = $1")
        .bind(signal_id)
        .execute(&pool)
        .await
        .expect("claim row");

    let err = record_handshake(
        &deps,
        signal_id,
        TargetModule::Finance,
        synapse_common::HandshakeStatus::Approved,
        Some(0.95),
        None,
        &[],
    )
    .await
    .expect_err("claimed row must conflict");
    assert!(matches!(err, SynapseError::Conflict(_)), "got {err:?}");

    // The losing callback committed nothing.
    assert_eq!(commit_count(&pool, signal_id).await, 0);
    assert_eq!(handshake_status(&pool, signal_id).await, "executing");
}

#[tokio::test]
async fn failed_execution_marks_handshake_failed() {
    let (_container, pool) = synapse_core::testutil::postgres_container().await;
    let deps = deps_with(pool.clone(), Arc::new(FailingEmbedder));
    let signal_id = pending_draft(&deps).await;

    let memory = vec![SynapticMemory {
        kind: HitKind::PastContext,
        text: "will not embed".into(),
        metadata: serde_json::json!({}),
    }];

    let err = record_handshake(
        &deps,
        signal_id,
        TargetModule::Finance,
        synapse_common::HandshakeStatus::Approved,
        None,
        None,
        &memory,
    )
    .await
    .expect_err("embedding failure must surface");
    assert!(matches!(err, SynapseError::FatalJob(_)), "got {err:?}");

    assert_eq!(handshake_status(&pool, signal_id).await, "failed");
}
