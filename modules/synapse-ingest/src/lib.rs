//! Queued ingestion: the durable job runtime, the news pipeline
//! (embed → dedup → tag → score → persist), and the recurring-job
//! scheduler.

pub mod briefing;
pub mod memo;
pub mod news;
pub mod pipeline;
pub mod queue;
pub mod scheduler;
pub mod score;
pub mod worker;

pub use briefing::{
    generate_briefing, local_today, DailyBriefingHandler, NightlyReflectionHandler,
};
pub use pipeline::{NewsIngestHandler, NewsJobPayload};
pub use queue::{enqueue, news_job_id, EnqueueOutcome, Job};
pub use scheduler::{register_schedules, Scheduler};
pub use worker::{JobContext, JobHandler, JobResult, WorkerPool};
