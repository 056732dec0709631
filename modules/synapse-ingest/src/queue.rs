//! Durable Postgres-backed job queue.
//!
//! Jobs carry deterministic ids so re-enqueueing the same work is a no-op,
//! claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never double-run
//! a job, and failures retry with exponential backoff until the attempt cap,
//! after which the job is dead-lettered and kept for inspection.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{error, info, warn};

use synapse_common::SynapseError;

/// Attempts before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// First retry delay; doubles each subsequent attempt.
pub const BACKOFF_BASE_SECS: i64 = 2;

pub const JOB_NEWS_INGEST: &str = "news_ingest";
pub const JOB_DAILY_BRIEFING: &str = "daily_briefing";
pub const JOB_NIGHTLY_REFLECTION: &str = "nightly_reflection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }
}

/// One queued unit of work. `id` is caller-supplied and deterministic.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub payload: Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with this id already exists (any status). Idempotent no-op.
    AlreadyQueued,
}

/// Deterministic id for a news-ingestion job: the same source URL always
/// maps to the same job, so webhook retries collapse.
pub fn news_job_id(source_url: &str) -> String {
    let digest = Sha256::digest(source_url.trim().as_bytes());
    format!("{JOB_NEWS_INGEST}:{}", hex::encode(digest))
}

/// Retry delay before attempt `attempt + 1`, given `attempt` failures so
/// far: 2s, 4s, 8s, ...
pub fn backoff_delay(attempt: i32) -> Duration {
    let exp = (attempt - 1).clamp(0, 16) as u32;
    Duration::seconds(BACKOFF_BASE_SECS << exp)
}

/// Insert a job if no job with this id exists yet.
pub async fn enqueue(
    pool: &PgPool,
    id: &str,
    name: &str,
    payload: &Value,
) -> Result<EnqueueOutcome, SynapseError> {
    let result = sqlx::query(
        r#"
        INSERT INTO jobs (id, name, payload, status, attempts, max_attempts, run_at)
        VALUES ($1, $2, $3, 'queued', 0, $4, NOW())
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(payload)
    .bind(DEFAULT_MAX_ATTEMPTS)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        info!(job_id = id, job = name, "job already enqueued, skipping");
        Ok(EnqueueOutcome::AlreadyQueued)
    } else {
        info!(job_id = id, job = name, "job enqueued");
        Ok(EnqueueOutcome::Enqueued)
    }
}

/// Claim the oldest due job of the given name. `SKIP LOCKED` makes
/// concurrent claims race-free: two workers never get the same row.
/// Increments the attempt counter as part of the claim.
pub async fn claim(pool: &PgPool, name: &str) -> Result<Option<Job>, SynapseError> {
    let job = sqlx::query_as::<_, Job>(
        r#"
        UPDATE jobs
        SET status = 'running', attempts = attempts + 1, updated_at = NOW()
        WHERE id = (
            SELECT id FROM jobs
            WHERE name = $1 AND status = 'queued' AND run_at <= NOW()
            ORDER BY run_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING *
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(job)
}

pub async fn complete(pool: &PgPool, job_id: &str) -> Result<(), SynapseError> {
    sqlx::query("UPDATE jobs SET status = 'completed', updated_at = NOW() WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a failure. Retryable failures under the attempt cap go back to
/// `queued` with backoff; everything else is dead-lettered.
pub async fn fail(
    pool: &PgPool,
    job: &Job,
    error_text: &str,
    retryable: bool,
) -> Result<(), SynapseError> {
    if retryable && job.attempts < job.max_attempts {
        let run_at = Utc::now() + backoff_delay(job.attempts);
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', run_at = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&job.id)
        .bind(run_at)
        .bind(error_text)
        .execute(pool)
        .await?;
        warn!(
            job_id = %job.id,
            job = %job.name,
            attempt = job.attempts,
            error = error_text,
            "job failed, retrying with backoff"
        );
    } else {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'dead', last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&job.id)
        .bind(error_text)
        .execute(pool)
        .await?;
        error!(
            job_id = %job.id,
            job = %job.name,
            attempts = job.attempts,
            error = error_text,
            "job dead-lettered"
        );
    }
    Ok(())
}
