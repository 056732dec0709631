//! End-to-end handling of one submitted signal: validate, persist to the
//! ledger, dispatch, then act on the decision outcome.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use synapse_common::{
    DecisionOutcome, DispatcherDecision, SignalType, SynapseError, SynapticMemory,
};

use crate::context::build_context;
use crate::deps::SynapseDeps;
use crate::dispatch::Dispatcher;
use crate::handshake;
use crate::ledger::LedgerSnapshot;
use crate::store;
use crate::synaptic::{SynapticSearch, CONTEXT_HIT_CAP};

/// Bounds on the submission boundary.
const MAX_SIGNAL_CHARS: usize = 20_000;
const MAX_OCR_TOTAL: f64 = 1_000_000.0;

/// Lines granted to the conversational-fallback context.
const CONTEXT_MAX_LINES: usize = 120;

/// Similarity floor for grounding hits (dedup uses its own, higher bar).
const GROUNDING_MIN_SIMILARITY: f32 = 0.30;

#[derive(Debug, Clone, Deserialize)]
pub struct OcrSubmission {
    pub merchant: Option<String>,
    pub total: Option<f64>,
    pub currency: Option<String>,
    pub raw_text: String,
}

/// One signal as received from a chat/voice/API collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalSubmission {
    pub signal_type: SignalType,
    pub raw_text: String,
    pub channel: Option<String>,
    pub metadata: Option<Value>,
    pub ocr_trace: Option<OcrSubmission>,
}

impl SignalSubmission {
    /// Closed-schema validation: text length bounds, OCR numeric ranges.
    pub fn validate(&self) -> Result<(), SynapseError> {
        let len = self.raw_text.chars().count();
        if len == 0 || self.raw_text.trim().is_empty() {
            return Err(SynapseError::Validation("raw_text is empty".to_string()));
        }
        if len > MAX_SIGNAL_CHARS {
            return Err(SynapseError::Validation(format!(
                "raw_text exceeds {MAX_SIGNAL_CHARS} characters"
            )));
        }
        if let Some(ocr) = &self.ocr_trace {
            if let Some(total) = ocr.total {
                if !total.is_finite() || total <= 0.0 || total > MAX_OCR_TOTAL {
                    return Err(SynapseError::Validation(
                        "ocr total out of range".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// What the caller gets back, synchronously.
#[derive(Debug, Clone, Serialize)]
pub struct SignalResponse {
    pub raw_signal_id: Uuid,
    pub outcome: DecisionOutcome,
    pub module: String,
    pub confidence: f32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<Uuid>,
}

/// Validate, ledger, dispatch, route. The caller is waiting: every
/// suspension point here is a blocking gateway call by design.
pub async fn handle_signal(
    deps: &SynapseDeps,
    submission: SignalSubmission,
) -> Result<SignalResponse, SynapseError> {
    submission.validate()?;

    let channel = submission.channel.as_deref().unwrap_or("api");
    let metadata = submission.metadata.clone().unwrap_or(Value::Null);
    let signal = store::create_raw_signal(
        submission.signal_type,
        channel,
        submission.raw_text.trim(),
        &metadata,
        deps.pool(),
    )
    .await?;

    if let Some(ocr) = &submission.ocr_trace {
        store::create_ocr_trace(
            signal.id,
            ocr.merchant.as_deref(),
            ocr.total,
            ocr.currency.as_deref(),
            &ocr.raw_text,
            deps.pool(),
        )
        .await?;
    }

    let decision = Dispatcher::from_deps(deps).dispatch(&signal).await?;

    match decision.outcome {
        DecisionOutcome::Committed => {
            let draft = decision
                .extracted
                .draft
                .as_ref()
                .ok_or_else(|| SynapseError::Validation("committed without draft".to_string()))?;
            let commit = store::commit_draft(signal.id, draft, deps.pool()).await?;
            // Committed resolutions are grounding material too
            remember_commit(deps, &signal.normalized_text, &decision).await;

            Ok(SignalResponse {
                raw_signal_id: signal.id,
                outcome: decision.outcome,
                module: decision.module.to_string(),
                confidence: decision.confidence,
                message: format!("Committed to {}.", decision.module),
                handshake_id: None,
                commit_id: Some(commit.id),
            })
        }
        DecisionOutcome::Drafted => {
            let draft = decision
                .extracted
                .draft
                .as_ref()
                .ok_or_else(|| SynapseError::Validation("drafted without draft".to_string()))?;
            let hs = handshake::create_draft(deps, signal.id, decision.confidence, draft).await?;

            Ok(SignalResponse {
                raw_signal_id: signal.id,
                outcome: decision.outcome,
                module: decision.module.to_string(),
                confidence: decision.confidence,
                message: format!(
                    "Drafted a {} entry — confirm or reject it.",
                    decision.module
                ),
                handshake_id: Some(hs.id),
                commit_id: None,
            })
        }
        DecisionOutcome::Clarify => Ok(SignalResponse {
            raw_signal_id: signal.id,
            outcome: decision.outcome,
            module: decision.module.to_string(),
            confidence: decision.confidence,
            message: format!(
                "This looks like a {} entry, but required details are missing. \
                 Can you restate it with the specifics?",
                decision.module
            ),
            handshake_id: None,
            commit_id: None,
        }),
        DecisionOutcome::Fallback => {
            let reply = conversational_reply(deps, &signal, &decision).await?;
            Ok(SignalResponse {
                raw_signal_id: signal.id,
                outcome: decision.outcome,
                module: decision.module.to_string(),
                confidence: decision.confidence,
                message: reply,
                handshake_id: None,
                commit_id: None,
            })
        }
    }
}

const FALLBACK_SYSTEM_PROMPT: &str = "\
You are the owner's personal assistant. Use the context to answer or to ask \
one short clarifying question. Be brief and concrete.";

async fn conversational_reply(
    deps: &SynapseDeps,
    signal: &synapse_common::RawSignal,
    decision: &DispatcherDecision,
) -> Result<String, SynapseError> {
    let search = SynapticSearch::new(deps.embedder.clone(), deps.vectors.clone());
    let hits = search
        .search(
            &signal.normalized_text,
            None,
            CONTEXT_HIT_CAP,
            GROUNDING_MIN_SIMILARITY,
        )
        .await
        .map_err(|e| SynapseError::TransientGateway(e.to_string()))?;

    let ledger = LedgerSnapshot::load(deps.pool()).await?;
    let context = build_context(signal, decision, &hits, &ledger, CONTEXT_MAX_LINES);

    info!(
        signal_id = %signal.id,
        hits = hits.len(),
        context_lines = context.lines().count(),
        "conversational fallback"
    );

    deps.ai
        .chat_completion(FALLBACK_SYSTEM_PROMPT, context)
        .await
        .map_err(|e| SynapseError::TransientGateway(e.to_string()))
}

/// Best-effort memory write after an auto-commit; a failure here must not
/// fail the commit itself.
async fn remember_commit(deps: &SynapseDeps, text: &str, decision: &DispatcherDecision) {
    let kind = match decision.module {
        synapse_common::TargetModule::Finance => synapse_common::HitKind::RecurringMerchant,
        synapse_common::TargetModule::Todo => synapse_common::HitKind::CompletedTask,
        _ => synapse_common::HitKind::PastContext,
    };
    let memory = SynapticMemory {
        kind,
        text: text.to_string(),
        metadata: serde_json::json!({ "module": decision.module.as_str() }),
    };

    let embedding = match deps.embedder.embed(&memory.text).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "commit memory embedding failed");
            return;
        }
    };
    if let Err(e) = deps
        .vectors
        .insert(memory.kind, &memory.text, &memory.metadata, &embedding)
        .await
    {
        tracing::warn!(error = %e, "commit memory insert failed");
    }
}
