//! Relational persistence for the signal ledger and committed extractions.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use synapse_common::{ModuleDraft, OcrTrace, RawSignal, SignalType};

pub async fn create_raw_signal(
    signal_type: SignalType,
    channel: &str,
    normalized_text: &str,
    metadata: &Value,
    pool: &PgPool,
) -> Result<RawSignal> {
    sqlx::query_as::<_, RawSignal>(
        r#"
        INSERT INTO raw_signals (signal_type, channel, normalized_text, metadata)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(signal_type.to_string())
    .bind(channel)
    .bind(normalized_text)
    .bind(metadata)
    .fetch_one(pool)
    .await
    .map_err(Into::into)
}

pub async fn create_ocr_trace(
    raw_signal_id: Uuid,
    merchant: Option<&str>,
    total: Option<f64>,
    currency: Option<&str>,
    raw_text: &str,
    pool: &PgPool,
) -> Result<OcrTrace> {
    sqlx::query_as::<_, OcrTrace>(
        r#"
        INSERT INTO ocr_traces (raw_signal_id, merchant, total, currency, raw_text)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(raw_signal_id)
    .bind(merchant)
    .bind(total)
    .bind(currency)
    .bind(raw_text)
    .fetch_one(pool)
    .await
    .map_err(Into::into)
}

/// A committed (auto- or handshake-approved) extraction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ModuleCommit {
    pub id: Uuid,
    pub raw_signal_id: Uuid,
    pub module: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

pub async fn commit_draft(
    raw_signal_id: Uuid,
    draft: &ModuleDraft,
    pool: &PgPool,
) -> Result<ModuleCommit> {
    sqlx::query_as::<_, ModuleCommit>(
        r#"
        INSERT INTO module_commits (raw_signal_id, module, payload)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(raw_signal_id)
    .bind(draft.target_module().as_str())
    .bind(serde_json::to_value(draft)?)
    .fetch_one(pool)
    .await
    .map_err(Into::into)
}
