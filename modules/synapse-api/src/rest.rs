//! REST handlers. Owner-facing surfaces never leak internal error detail:
//! validation problems echo back, everything else collapses to a generic
//! message with the real error logged server-side.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use synapse_common::{
    HandshakeStatus, ModuleDraft, SynapseError, SynapticMemory, TargetModule, Topic,
};
use synapse_core::{handle_signal, record_handshake, SignalSubmission};
use synapse_ingest::{
    enqueue, generate_briefing, local_today, news_job_id, queue::JOB_NEWS_INGEST, EnqueueOutcome,
    NewsJobPayload,
};

use crate::routes::AppState;

const GENERIC_APOLOGY: &str =
    "Something went wrong on my side. Please try again in a moment.";

const INGEST_SECRET_HEADER: &str = "x-ingest-secret";
const OWNER_ID_HEADER: &str = "x-owner-id";

const DEFAULT_NEWS_LIMIT: i64 = 25;
const MAX_NEWS_LIMIT: i64 = 100;

pub async fn health() -> &'static str {
    "ok"
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": GENERIC_APOLOGY })),
    )
        .into_response()
}

/// Owner gate for the personal surfaces. The identity comes from the
/// channel header and is checked against configuration, never hardcoded.
fn require_owner(state: &AppState, headers: &HeaderMap) -> Result<String, Response> {
    let identity = headers
        .get(OWNER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    match identity {
        Some(id) if state.deps.config.is_owner(&id) => Ok(id),
        Some(id) => {
            warn!(identity = %id, "rejected non-owner request");
            Err((
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "not authorized" })),
            )
                .into_response())
        }
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing owner identity" })),
        )
            .into_response()),
    }
}

// --- POST /api/ingest ---

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub job_id: String,
    pub enqueued: bool,
}

/// Accept one news item for asynchronous ingestion. Authenticated by a
/// shared secret; the job id is deterministic over the source URL, so
/// webhook retries return 202 with `enqueued: false`.
pub async fn ingest_news(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewsJobPayload>,
) -> Response {
    let secret = headers
        .get(INGEST_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if secret != Some(state.deps.config.ingest_secret.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid ingest secret" })),
        )
            .into_response();
    }

    if let Err(e) = payload.validate() {
        return bad_request(e);
    }

    let job_id = news_job_id(&payload.source_url);
    let payload_json = match serde_json::to_value(&payload) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "ingest payload serialization failed");
            return internal_error();
        }
    };

    match enqueue(state.deps.pool(), &job_id, JOB_NEWS_INGEST, &payload_json).await {
        Ok(outcome) => (
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                job_id,
                enqueued: outcome == EnqueueOutcome::Enqueued,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "news enqueue failed");
            internal_error()
        }
    }
}

// --- GET /api/news ---

#[derive(Debug, Deserialize)]
pub struct NewsQuery {
    pub topic: Option<String>,
    pub limit: Option<i64>,
}

/// Public feed: dedup group heads only, best score first.
pub async fn list_news(
    State(state): State<AppState>,
    Query(query): Query<NewsQuery>,
) -> Response {
    let topic = match query.topic.as_deref() {
        Some(raw) => match Topic::parse(raw) {
            Some(t) => Some(t),
            None => return bad_request(format!("unknown topic: {raw}")),
        },
        None => None,
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_NEWS_LIMIT)
        .clamp(1, MAX_NEWS_LIMIT);

    match synapse_ingest::news::list_top(state.deps.pool(), topic, limit).await {
        Ok(items) => Json(items).into_response(),
        Err(e) => {
            error!(error = %e, "news listing failed");
            internal_error()
        }
    }
}

/// GET /api/news/topics — item counts per primary topic.
pub async fn news_topics(State(state): State<AppState>) -> Response {
    match synapse_ingest::news::topic_counts(state.deps.pool()).await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => {
            error!(error = %e, "topic counts failed");
            internal_error()
        }
    }
}

// --- POST /api/briefing/refresh ---

#[derive(Debug, Default, Deserialize)]
pub struct BriefingRefreshRequest {
    /// Local date to regenerate; defaults to today in the configured
    /// briefing timezone.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// Owner-only: regenerate the briefing on demand, bypassing the memoized
/// copy. The fresh text overwrites the cached one, so a later scheduled
/// read serves the regenerated version.
pub async fn refresh_briefing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BriefingRefreshRequest>,
) -> Response {
    if let Err(resp) = require_owner(&state, &headers) {
        return resp;
    }

    let date = request
        .date
        .unwrap_or_else(|| local_today(&state.deps.config.briefing_timezone));

    match generate_briefing(&state.deps, date, true).await {
        Ok(briefing) => Json(json!({ "date": date, "briefing": briefing })).into_response(),
        Err(e) => {
            error!(error = %e, %date, "briefing refresh failed");
            internal_error()
        }
    }
}

// --- POST /api/signal ---

/// Owner-only: run one signal through the dispatch pipeline and reply
/// synchronously with the decision.
pub async fn submit_signal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(submission): Json<SignalSubmission>,
) -> Response {
    if let Err(resp) = require_owner(&state, &headers) {
        return resp;
    }

    match handle_signal(&state.deps, submission).await {
        Ok(response) => Json(response).into_response(),
        Err(SynapseError::Validation(msg)) => bad_request(msg),
        Err(e) => {
            error!(error = %e, "signal handling failed");
            internal_error()
        }
    }
}

// --- POST /api/handshake ---

#[derive(Debug, Deserialize)]
pub struct HandshakeCallback {
    pub raw_signal_id: Uuid,
    pub module: TargetModule,
    pub status: HandshakeStatus,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub payload: Option<ModuleDraft>,
    #[serde(default)]
    pub memory: Vec<SynapticMemory>,
}

/// Owner-only: resolve a pending handshake. A handshake already resolved
/// (concurrently or before) answers 409 and changes nothing.
pub async fn resolve_handshake(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(callback): Json<HandshakeCallback>,
) -> Response {
    if let Err(resp) = require_owner(&state, &headers) {
        return resp;
    }

    let result = record_handshake(
        &state.deps,
        callback.raw_signal_id,
        callback.module,
        callback.status,
        callback.confidence,
        callback.payload,
        &callback.memory,
    )
    .await;

    match result {
        Ok(handshake) => Json(handshake).into_response(),
        Err(SynapseError::Validation(msg)) => bad_request(msg),
        Err(SynapseError::Conflict(msg)) => {
            (StatusCode::CONFLICT, Json(json!({ "error": msg }))).into_response()
        }
        Err(e) => {
            error!(error = %e, "handshake resolution failed");
            internal_error()
        }
    }
}
