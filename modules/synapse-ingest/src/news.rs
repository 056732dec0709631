//! Persistence for canonical news rows.
//!
//! `source_url` is the uniqueness key: a second insert for the same URL is
//! reported, not errored. Near-duplicate items (by embedding similarity)
//! are never stored; the existing story is marked as its group's head via
//! a self-referential `dedup_group_id`.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use synapse_common::{NewsItem, SynapseError, Topic};

/// Candidate row produced by the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct NewsDraft {
    pub title: String,
    pub summary: String,
    pub source_url: String,
    pub source_name: String,
    pub topic_primary: Topic,
    pub tags: Vec<String>,
    pub tag_confidence: f32,
    pub score: f32,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(NewsItem),
    /// A row with this `source_url` already exists.
    DuplicateUrl,
}

/// Closest existing item to a candidate embedding.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NewsNeighbor {
    pub id: Uuid,
    pub dedup_group_id: Option<Uuid>,
    pub distance: f64,
}

impl NewsNeighbor {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance as f32
    }
}

pub async fn insert(
    pool: &PgPool,
    draft: &NewsDraft,
    embedding: &[f32],
) -> Result<InsertOutcome, SynapseError> {
    let result = sqlx::query_as::<_, NewsItem>(
        r#"
        INSERT INTO news_items
            (title, summary, source_url, source_name, topic_primary, tags,
             tag_confidence, score, published_at, embedding)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id, title, summary, source_url, source_name, topic_primary,
                  tags, tag_confidence, score, dedup_group_id, published_at,
                  created_at
        "#,
    )
    .bind(&draft.title)
    .bind(&draft.summary)
    .bind(&draft.source_url)
    .bind(&draft.source_name)
    .bind(draft.topic_primary.as_str())
    .bind(&draft.tags)
    .bind(draft.tag_confidence)
    .bind(draft.score)
    .bind(draft.published_at)
    .bind(Vector::from(embedding.to_vec()))
    .fetch_one(pool)
    .await;

    match result {
        Ok(item) => Ok(InsertOutcome::Inserted(item)),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Ok(InsertOutcome::DuplicateUrl)
        }
        Err(e) => Err(e.into()),
    }
}

/// Single nearest neighbor by cosine distance, over all stored items.
pub async fn nearest_neighbor(
    pool: &PgPool,
    embedding: &[f32],
) -> Result<Option<NewsNeighbor>, SynapseError> {
    let neighbor = sqlx::query_as::<_, NewsNeighbor>(
        r#"
        SELECT id, dedup_group_id, (embedding <=> $1) AS distance
        FROM news_items
        ORDER BY embedding <=> $1 ASC
        LIMIT 1
        "#,
    )
    .bind(Vector::from(embedding.to_vec()))
    .fetch_optional(pool)
    .await?;
    Ok(neighbor)
}

/// Mark an existing story as its dedup group's head. A no-op if the row is
/// already marked, keeping the marker stable across repeated duplicates.
pub async fn mark_group_head(pool: &PgPool, id: Uuid) -> Result<(), SynapseError> {
    sqlx::query("UPDATE news_items SET dedup_group_id = id WHERE id = $1 AND dedup_group_id IS NULL")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Public listing: best score first. Rows collapsed into someone else's
/// dedup group are excluded; a group head (self-referential marker) stays.
pub async fn list_top(
    pool: &PgPool,
    topic: Option<Topic>,
    limit: i64,
) -> Result<Vec<NewsItem>, SynapseError> {
    let items = sqlx::query_as::<_, NewsItem>(
        r#"
        SELECT id, title, summary, source_url, source_name, topic_primary,
               tags, tag_confidence, score, dedup_group_id, published_at,
               created_at
        FROM news_items
        WHERE (dedup_group_id IS NULL OR dedup_group_id = id)
          AND ($1::text IS NULL OR topic_primary = $1)
        ORDER BY score DESC, created_at DESC
        LIMIT $2
        "#,
    )
    .bind(topic.map(|t| t.as_str()))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(items)
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct TopicCount {
    pub topic_primary: String,
    pub count: i64,
}

/// Item counts per primary topic, duplicates excluded.
pub async fn topic_counts(pool: &PgPool) -> Result<Vec<TopicCount>, SynapseError> {
    let counts = sqlx::query_as::<_, TopicCount>(
        r#"
        SELECT topic_primary, COUNT(*) AS count
        FROM news_items
        WHERE dedup_group_id IS NULL OR dedup_group_id = id
        GROUP BY topic_primary
        ORDER BY count DESC, topic_primary ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(counts)
}
