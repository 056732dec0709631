//! Scheduled generation jobs: the morning news briefing and the nightly
//! reflection over the signal ledger. Both are memoized per local date so
//! a retried job reuses the generated text instead of paying for a second
//! model call.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use synapse_common::HitKind;
use synapse_core::{LedgerSnapshot, SynapseDeps};

use crate::memo::memoized;
use crate::news;
use crate::worker::{JobContext, JobHandler, JobResult};

/// Generated artifacts live for a day; a late force-refresh overwrites.
const MEMO_TTL_HOURS: i64 = 24;

/// Stories included in the briefing digest.
const BRIEFING_ITEM_CAP: i64 = 10;

/// Payload shared by both scheduled jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJobPayload {
    pub date: NaiveDate,
    pub timezone: String,
    #[serde(default)]
    pub force_refresh: bool,
}

const BRIEFING_SYSTEM_PROMPT: &str = "\
You write the owner's morning news briefing. Summarize the stories below \
into a short digest grouped by topic, most important first. Plain prose, \
no preamble.";

const REFLECTION_SYSTEM_PROMPT: &str = "\
You review one day of the owner's personal signals. Note recurring \
merchants, open tasks, and unresolved confirmations worth surfacing \
tomorrow. Two or three sentences, concrete.";

/// Today's date in the given IANA timezone; an unknown name falls back to
/// UTC rather than failing an on-demand request.
pub fn local_today(timezone: &str) -> NaiveDate {
    match timezone.parse::<chrono_tz::Tz>() {
        Ok(tz) => Utc::now().with_timezone(&tz).date_naive(),
        Err(_) => Utc::now().date_naive(),
    }
}

/// Generate (or fetch the memoized) briefing for a local date.
pub async fn generate_briefing(
    deps: &SynapseDeps,
    date: NaiveDate,
    force_refresh: bool,
) -> anyhow::Result<String> {
    let pool = deps.pool().clone();
    let deps = deps.clone();
    memoized(
        &pool,
        "daily_briefing",
        &date,
        Duration::hours(MEMO_TTL_HOURS),
        force_refresh,
        || async move {
            let items = news::list_top(deps.pool(), None, BRIEFING_ITEM_CAP).await?;
            if items.is_empty() {
                return Ok(format!("No news ingested for {date}."));
            }

            let mut digest = format!("Stories for {date}:\n");
            for item in &items {
                digest.push_str(&format!(
                    "- [{}] {} ({}) — {}\n",
                    item.topic_primary, item.title, item.source_name, item.summary
                ));
            }
            deps.ai
                .chat_completion(BRIEFING_SYSTEM_PROMPT, digest)
                .await
        },
    )
    .await
}

pub struct DailyBriefingHandler {
    deps: SynapseDeps,
}

impl DailyBriefingHandler {
    pub fn new(deps: SynapseDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for DailyBriefingHandler {
    fn name(&self) -> &'static str {
        crate::queue::JOB_DAILY_BRIEFING
    }

    async fn execute(&self, ctx: &JobContext) -> JobResult {
        let payload: ScheduledJobPayload = match ctx.payload() {
            Ok(p) => p,
            Err(e) => return JobResult::Fatal(e.to_string()),
        };
        ctx.report_progress(10, "loading news");

        match generate_briefing(&self.deps, payload.date, payload.force_refresh).await {
            Ok(briefing) => {
                ctx.report_progress(100, "briefing ready");
                info!(date = %payload.date, chars = briefing.len(), "daily briefing generated");
                JobResult::Success
            }
            Err(e) => JobResult::Retry(format!("briefing generation failed: {e}")),
        }
    }
}

pub struct NightlyReflectionHandler {
    deps: SynapseDeps,
}

impl NightlyReflectionHandler {
    pub fn new(deps: SynapseDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for NightlyReflectionHandler {
    fn name(&self) -> &'static str {
        crate::queue::JOB_NIGHTLY_REFLECTION
    }

    async fn execute(&self, ctx: &JobContext) -> JobResult {
        let payload: ScheduledJobPayload = match ctx.payload() {
            Ok(p) => p,
            Err(e) => return JobResult::Fatal(e.to_string()),
        };
        ctx.report_progress(10, "loading ledger");

        let ledger = match LedgerSnapshot::load(self.deps.pool()).await {
            Ok(l) => l,
            Err(e) => return JobResult::Retry(format!("ledger load failed: {e}")),
        };
        if ledger.raw_signals.is_empty() && ledger.handshakes.is_empty() {
            return JobResult::Skipped("nothing to reflect on".to_string());
        }

        let mut summary = format!("Ledger as of {}:\nSignals:\n", payload.date);
        for signal in &ledger.raw_signals {
            summary.push_str(&format!(
                "- [{}] {}\n",
                signal.signal_type, signal.normalized_text
            ));
        }
        summary.push_str("Handshakes:\n");
        for hs in &ledger.handshakes {
            summary.push_str(&format!("- {} ({})\n", hs.module, hs.status));
        }
        ctx.report_progress(40, "generating reflection");

        let deps = self.deps.clone();
        let prompt = summary.clone();
        let reflection = match memoized(
            self.deps.pool(),
            "nightly_reflection",
            &payload.date,
            Duration::hours(MEMO_TTL_HOURS),
            payload.force_refresh,
            || async move {
                deps.ai
                    .chat_completion(REFLECTION_SYSTEM_PROMPT, prompt)
                    .await
            },
        )
        .await
        {
            Ok(r) => r,
            Err(e) => return JobResult::Retry(format!("reflection generation failed: {e}")),
        };
        ctx.report_progress(70, "storing memory");

        // The reflection becomes grounding context for future dispatches.
        let embedding = match self.deps.embedder.embed(&reflection).await {
            Ok(v) => v,
            Err(e) => return JobResult::Retry(format!("reflection embedding failed: {e}")),
        };
        let metadata = serde_json::json!({
            "source": "nightly_reflection",
            "date": payload.date,
        });
        if let Err(e) = self
            .deps
            .vectors
            .insert(HitKind::PastContext, &reflection, &metadata, &embedding)
            .await
        {
            return JobResult::Retry(format!("reflection memory insert failed: {e}"));
        }

        ctx.report_progress(100, "reflection stored");
        info!(date = %payload.date, "nightly reflection stored");
        JobResult::Success
    }
}
