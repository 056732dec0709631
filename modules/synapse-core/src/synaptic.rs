//! Synaptic search: vector-similarity lookup used for grounding and dedup.
//!
//! Similarity units: pgvector's `<=>` operator returns cosine distance, and
//! similarity = 1 − distance throughout. All thresholds (context grounding,
//! news dedup 0.90) are expressed in similarity.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use synapse_common::{HitKind, SynapticSearchHit};

use crate::deps::{EmbeddingService, VectorIndex};

/// Hits surfaced for context assembly.
pub const CONTEXT_HIT_CAP: usize = 12;

/// Cosine similarity between two vectors. Local fallback for when the
/// store's operator is unavailable (tests, in-memory indexes). Returns 0
/// for mismatched or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Embeds a query and runs it against the vector index.
pub struct SynapticSearch {
    embedder: Arc<dyn EmbeddingService>,
    vectors: Arc<dyn VectorIndex>,
}

impl SynapticSearch {
    pub fn new(embedder: Arc<dyn EmbeddingService>, vectors: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, vectors }
    }

    /// Search previously stored memories. Hits come back ordered by
    /// descending similarity, ties broken by recency, truncated to `top_k`.
    pub async fn search(
        &self,
        query_text: &str,
        kind: Option<HitKind>,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SynapticSearchHit>> {
        let query = self.embedder.embed(query_text).await?;
        let mut hits = self
            .vectors
            .nearest(&query, min_similarity, top_k, kind)
            .await?;

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// pgvector-backed index over the `synaptic_memories` table.
pub struct PgVectorIndex {
    pool: PgPool,
}

impl PgVectorIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MemoryRow {
    id: Uuid,
    kind: String,
    text: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    distance: f64,
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn nearest(
        &self,
        query: &[f32],
        similarity_threshold: f32,
        match_count: usize,
        kind: Option<HitKind>,
    ) -> Result<Vec<SynapticSearchHit>> {
        let query_vec = Vector::from(query.to_vec());
        let max_distance = f64::from(1.0 - similarity_threshold);

        let rows = sqlx::query_as::<_, MemoryRow>(
            r#"
            SELECT id, kind, text, metadata, created_at,
                   (embedding <=> $1) AS distance
            FROM synaptic_memories
            WHERE ($2::text IS NULL OR kind = $2)
              AND (embedding <=> $1) <= $3
            ORDER BY embedding <=> $1 ASC, created_at DESC
            LIMIT $4
            "#,
        )
        .bind(&query_vec)
        .bind(kind.map(|k| k.as_str()))
        .bind(max_distance)
        .bind(match_count as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let kind = HitKind::parse(&row.kind)?;
                let distance = row.distance as f32;
                Some(SynapticSearchHit {
                    id: row.id,
                    kind,
                    text: row.text,
                    metadata: row.metadata,
                    similarity: 1.0 - distance,
                    distance,
                    created_at: row.created_at,
                })
            })
            .collect())
    }

    async fn insert(
        &self,
        kind: HitKind,
        text: &str,
        metadata: &serde_json::Value,
        embedding: &[f32],
    ) -> Result<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO synaptic_memories (kind, text, metadata, embedding)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(kind.as_str())
        .bind(text)
        .bind(metadata)
        .bind(Vector::from(embedding.to_vec()))
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}
