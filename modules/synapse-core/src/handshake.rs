//! Handshake state machine: owner confirmation of low-confidence drafts.
//!
//! `pending_confirmation → {approved, rejected}`, with `failed` reachable
//! on an execution error. Terminal states are monotonic: a second record
//! attempt is a conflict and alters nothing. An approval first claims the
//! row (`executing`) with a guarded update, so of two concurrent callbacks
//! exactly one runs the side effects; the other conflicts before touching
//! anything.
//!
//! Approval is how the system learns without retraining: the attached
//! synaptic memories are embedded and persisted, so the next similar signal
//! retrieves this resolution as grounding context.

use tracing::{info, warn};
use uuid::Uuid;

use synapse_common::{
    Handshake, HandshakeStatus, ModuleDraft, SynapseError, SynapticMemory, TargetModule,
};

use crate::deps::SynapseDeps;
use crate::store;

/// Memory entries accepted per handshake callback.
pub const MEMORY_CAP: usize = 12;

/// Whether a terminal status may be recorded over `from`. The `executing`
/// claim is internal and never a recordable target.
pub fn can_transition(from: HandshakeStatus, to: HandshakeStatus) -> bool {
    let live = matches!(
        from,
        HandshakeStatus::PendingConfirmation | HandshakeStatus::Executing
    );
    live && to.is_terminal()
}

/// Open a pending handshake for a mid-band draft.
pub async fn create_draft(
    deps: &SynapseDeps,
    raw_signal_id: Uuid,
    confidence: f32,
    draft: &ModuleDraft,
) -> Result<Handshake, SynapseError> {
    draft.validate()?;

    let handshake = sqlx::query_as::<_, Handshake>(
        r#"
        INSERT INTO handshakes (raw_signal_id, module, status, confidence, payload)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(raw_signal_id)
    .bind(draft.target_module().as_str())
    .bind(HandshakeStatus::PendingConfirmation.as_str())
    .bind(confidence)
    .bind(serde_json::to_value(draft).map_err(|e| SynapseError::Validation(e.to_string()))?)
    .fetch_one(deps.pool())
    .await?;

    info!(
        handshake_id = %handshake.id,
        raw_signal_id = %raw_signal_id,
        module = %handshake.module,
        "draft pending confirmation"
    );

    Ok(handshake)
}

/// Apply an owner confirmation. On approval the payload is committed and
/// any attached memories are embedded and stored.
pub async fn record_handshake(
    deps: &SynapseDeps,
    raw_signal_id: Uuid,
    module: TargetModule,
    status: HandshakeStatus,
    confidence: Option<f32>,
    payload: Option<ModuleDraft>,
    memory: &[SynapticMemory],
) -> Result<Handshake, SynapseError> {
    if !status.is_terminal() {
        return Err(SynapseError::Validation(
            "handshake status must be approved, rejected, or failed".to_string(),
        ));
    }
    if memory.len() > MEMORY_CAP {
        return Err(SynapseError::Validation(format!(
            "at most {MEMORY_CAP} memory entries per handshake"
        )));
    }

    let current = sqlx::query_as::<_, Handshake>(
        "SELECT * FROM handshakes WHERE raw_signal_id = $1 AND module = $2",
    )
    .bind(raw_signal_id)
    .bind(module.as_str())
    .fetch_optional(deps.pool())
    .await?
    .ok_or_else(|| {
        SynapseError::Validation(format!(
            "no handshake for signal {raw_signal_id} and module {module}"
        ))
    })?;

    match current.status_enum() {
        Some(HandshakeStatus::PendingConfirmation) => {}
        Some(_) => {
            return Err(SynapseError::Conflict(format!(
                "handshake {} is already {}",
                current.id, current.status
            )));
        }
        None => {
            return Err(SynapseError::Database(format!(
                "handshake {} has unknown status {}",
                current.id, current.status
            )));
        }
    }

    // Resolve the draft to act on: callback payload wins over the stored one.
    let draft = match payload {
        Some(d) => {
            d.validate()?;
            Some(d)
        }
        None => serde_json::from_value::<ModuleDraft>(current.payload.clone()).ok(),
    };

    // Approval runs side effects (commit + memory inserts), so the row is
    // claimed first: exactly one caller wins the pending → executing flip,
    // a concurrent loser conflicts without having executed anything. An
    // execution error fails the handshake rather than leaving a
    // half-approved terminal state.
    if status == HandshakeStatus::Approved {
        let claimed = transition(
            deps,
            &current,
            HandshakeStatus::PendingConfirmation,
            HandshakeStatus::Executing,
            None,
        )
        .await?;

        if let Err(e) = approve(deps, &claimed, draft.as_ref(), memory).await {
            warn!(handshake_id = %claimed.id, error = %e, "handshake execution failed");
            transition(
                deps,
                &claimed,
                HandshakeStatus::Executing,
                HandshakeStatus::Failed,
                confidence,
            )
            .await?;
            return Err(SynapseError::FatalJob(format!(
                "handshake execution failed: {e}"
            )));
        }

        return transition(
            deps,
            &claimed,
            HandshakeStatus::Executing,
            HandshakeStatus::Approved,
            confidence,
        )
        .await;
    }

    transition(
        deps,
        &current,
        HandshakeStatus::PendingConfirmation,
        status,
        confidence,
    )
    .await
}

async fn approve(
    deps: &SynapseDeps,
    handshake: &Handshake,
    draft: Option<&ModuleDraft>,
    memory: &[SynapticMemory],
) -> anyhow::Result<()> {
    let draft = draft.ok_or_else(|| anyhow::anyhow!("approved handshake has no payload"))?;
    store::commit_draft(handshake.raw_signal_id, draft, deps.pool()).await?;

    if memory.is_empty() {
        return Ok(());
    }

    let texts: Vec<String> = memory.iter().map(|m| m.text.clone()).collect();
    let embeddings = deps.embedder.embed_batch(&texts).await?;
    for (entry, embedding) in memory.iter().zip(embeddings.iter()) {
        deps.vectors
            .insert(entry.kind, &entry.text, &entry.metadata, embedding)
            .await?;
    }

    info!(
        handshake_id = %handshake.id,
        memories = memory.len(),
        "handshake approved, memories stored"
    );
    Ok(())
}

/// Guarded status flip: the row transitions only if it still holds the
/// expected `from` status. A concurrent write between our read and this
/// update loses the race here and is reported as a conflict.
async fn transition(
    deps: &SynapseDeps,
    handshake: &Handshake,
    from: HandshakeStatus,
    to: HandshakeStatus,
    confidence: Option<f32>,
) -> Result<Handshake, SynapseError> {
    sqlx::query_as::<_, Handshake>(
        r#"
        UPDATE handshakes
        SET status = $2, confidence = COALESCE($3, confidence), updated_at = NOW()
        WHERE id = $1 AND status = $4
        RETURNING *
        "#,
    )
    .bind(handshake.id)
    .bind(to.as_str())
    .bind(confidence)
    .bind(from.as_str())
    .fetch_optional(deps.pool())
    .await?
    .ok_or_else(|| {
        SynapseError::Conflict(format!(
            "handshake {} was resolved concurrently",
            handshake.id
        ))
    })
}
