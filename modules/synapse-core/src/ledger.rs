//! Ground-truth snapshot of recent ledger rows, used purely as grounding
//! context for the conversational fallback.

use anyhow::Result;
use sqlx::PgPool;

use synapse_common::{Handshake, OcrTrace, RawSignal};

/// Rows fetched per table for a snapshot.
pub const LEDGER_ROW_CAP: i64 = 20;

#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub raw_signals: Vec<RawSignal>,
    pub ocr_traces: Vec<OcrTrace>,
    pub handshakes: Vec<Handshake>,
}

impl LedgerSnapshot {
    /// Load the most recent rows of each ledger table, newest first,
    /// each capped at [`LEDGER_ROW_CAP`].
    pub async fn load(pool: &PgPool) -> Result<Self> {
        let raw_signals = sqlx::query_as::<_, RawSignal>(
            "SELECT * FROM raw_signals ORDER BY created_at DESC LIMIT $1",
        )
        .bind(LEDGER_ROW_CAP)
        .fetch_all(pool)
        .await?;

        let ocr_traces = sqlx::query_as::<_, OcrTrace>(
            "SELECT * FROM ocr_traces ORDER BY created_at DESC LIMIT $1",
        )
        .bind(LEDGER_ROW_CAP)
        .fetch_all(pool)
        .await?;

        let handshakes = sqlx::query_as::<_, Handshake>(
            "SELECT * FROM handshakes ORDER BY created_at DESC LIMIT $1",
        )
        .bind(LEDGER_ROW_CAP)
        .fetch_all(pool)
        .await?;

        Ok(Self {
            raw_signals,
            ocr_traces,
            handshakes,
        })
    }
}
