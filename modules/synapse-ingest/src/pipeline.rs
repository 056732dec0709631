//! News ingestion pipeline: embed → dedup → tag → score → persist.
//!
//! Runs as a queued job handler. Every stage failure maps to a queue
//! outcome: gateway errors retry, malformed payloads and duplicate URLs
//! settle without side effects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use synapse_common::Topic;
use synapse_core::SynapseDeps;

use crate::news::{self, InsertOutcome, NewsDraft};
use crate::score::score_news;
use crate::worker::{JobContext, JobHandler, JobResult};

/// Classifier confidence below this floor falls back to the safe default
/// topic; the low confidence itself is kept and depresses the score.
const TAG_CONFIDENCE_FLOOR: f32 = 0.2;

const MAX_TITLE_CHARS: usize = 500;
const MAX_SUMMARY_CHARS: usize = 10_000;

/// Payload of a `news_ingest` job, as enqueued by the ingest endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsJobPayload {
    pub title: String,
    pub summary: String,
    pub source_url: String,
    pub source_name: String,
    #[serde(default)]
    pub topic_hint: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl NewsJobPayload {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is empty".to_string());
        }
        if self.title.chars().count() > MAX_TITLE_CHARS {
            return Err(format!("title exceeds {MAX_TITLE_CHARS} characters"));
        }
        if self.summary.trim().is_empty() {
            return Err("summary is empty".to_string());
        }
        if self.summary.chars().count() > MAX_SUMMARY_CHARS {
            return Err(format!("summary exceeds {MAX_SUMMARY_CHARS} characters"));
        }
        if !self.source_url.starts_with("http://") && !self.source_url.starts_with("https://") {
            return Err("source_url must be an http(s) URL".to_string());
        }
        if self.source_name.trim().is_empty() {
            return Err("source_name is empty".to_string());
        }
        Ok(())
    }
}

/// Collapse a raw topic verdict onto the closed topic enumeration.
///
/// Unknown primary topics and sub-floor confidence both fall back to the
/// safe default; tags are filtered to known topics with the primary always
/// present.
pub fn normalize_topics(
    topic_primary: &str,
    tags: &[String],
    tag_confidence: f32,
) -> (Topic, Vec<String>, f32) {
    let confidence = tag_confidence.clamp(0.0, 1.0);
    let primary = match Topic::parse(topic_primary) {
        Some(t) if confidence >= TAG_CONFIDENCE_FLOOR => t,
        _ => Topic::SAFE_DEFAULT,
    };

    let mut kept: Vec<String> = vec![primary.as_str().to_string()];
    for tag in tags {
        if let Some(t) = Topic::parse(tag) {
            let s = t.as_str().to_string();
            if !kept.contains(&s) {
                kept.push(s);
            }
        }
    }

    (primary, kept, confidence)
}

pub struct NewsIngestHandler {
    deps: SynapseDeps,
}

impl NewsIngestHandler {
    pub fn new(deps: SynapseDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for NewsIngestHandler {
    fn name(&self) -> &'static str {
        crate::queue::JOB_NEWS_INGEST
    }

    async fn execute(&self, ctx: &JobContext) -> JobResult {
        let payload: NewsJobPayload = match ctx.payload() {
            Ok(p) => p,
            Err(e) => return JobResult::Fatal(e.to_string()),
        };
        if let Err(e) = payload.validate() {
            return JobResult::Fatal(e);
        }
        ctx.report_progress(10, "validated");

        let embed_text = format!("{}\n\n{}", payload.title.trim(), payload.summary.trim());
        let embedding = match self.deps.embedder.embed(&embed_text).await {
            Ok(v) => v,
            Err(e) => return JobResult::Retry(format!("embedding failed: {e}")),
        };
        ctx.report_progress(30, "embedded");

        // Near-duplicate check against everything already stored. A match at
        // or above the threshold ends the pipeline: the existing story gets
        // the group-head marker and the incoming item is never persisted.
        match news::nearest_neighbor(self.deps.pool(), &embedding).await {
            Ok(Some(n)) if n.similarity() >= self.deps.config.dedup_threshold => {
                if let Err(e) = news::mark_group_head(self.deps.pool(), n.id).await {
                    return JobResult::Retry(format!("dedup marking failed: {e}"));
                }
                info!(
                    neighbor_id = %n.id,
                    similarity = n.similarity(),
                    source_url = %payload.source_url,
                    "near-duplicate news item dropped"
                );
                return JobResult::Skipped(format!("duplicate of existing story {}", n.id));
            }
            Ok(_) => {}
            Err(e) => return JobResult::Retry(format!("dedup lookup failed: {e}")),
        }
        ctx.report_progress(50, "deduplicated");

        let verdict = match self
            .deps
            .classifier
            .classify_news(
                &payload.title,
                &payload.summary,
                payload.topic_hint.as_deref(),
            )
            .await
        {
            Ok(v) => v,
            Err(e) => return JobResult::Retry(format!("topic classification failed: {e}")),
        };
        let (topic_primary, tags, tag_confidence) =
            normalize_topics(&verdict.topic_primary, &verdict.tags, verdict.tag_confidence);
        ctx.report_progress(70, "tagged");

        let score = score_news(
            tag_confidence,
            payload.published_at,
            Utc::now(),
            &payload.summary,
        );
        ctx.report_progress(90, "scored");

        let draft = NewsDraft {
            title: payload.title.trim().to_string(),
            summary: payload.summary.trim().to_string(),
            source_url: payload.source_url.clone(),
            source_name: payload.source_name.trim().to_string(),
            topic_primary,
            tags,
            tag_confidence,
            score,
            published_at: payload.published_at,
        };

        match news::insert(self.deps.pool(), &draft, &embedding).await {
            Ok(InsertOutcome::Inserted(item)) => {
                ctx.report_progress(100, "persisted");
                info!(
                    news_id = %item.id,
                    topic = %item.topic_primary,
                    score = item.score,
                    "news item ingested"
                );
                JobResult::Success
            }
            Ok(InsertOutcome::DuplicateUrl) => {
                JobResult::Skipped(format!("source_url already ingested: {}", payload.source_url))
            }
            Err(e) => JobResult::Retry(format!("insert failed: {e}")),
        }
    }
}
