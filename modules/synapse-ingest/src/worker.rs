//! Fixed-concurrency polling workers over the job queue.
//!
//! A `WorkerPool` spawns N identical loops for one job name; each loop
//! claims, executes, and settles jobs until shutdown. Concurrency is a
//! property of the pool, not of the handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info};

use synapse_common::SynapseError;

use crate::queue::{self, Job};

/// How a handler settled its job.
#[derive(Debug)]
pub enum JobResult {
    Success,
    /// Work already done elsewhere (duplicate URL, stale schedule tick).
    /// Settles the job as completed without side effects.
    Skipped(String),
    /// Transient failure; the queue reschedules with backoff.
    Retry(String),
    /// Permanent failure; dead-letter immediately.
    Fatal(String),
}

/// Execution context handed to a handler for one claimed job.
pub struct JobContext {
    job: Job,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, SynapseError> {
        serde_json::from_value(self.job.payload.clone())
            .map_err(|e| SynapseError::FatalJob(format!("malformed job payload: {e}")))
    }

    /// Stage marker for observability. Progress is advisory; it never
    /// affects scheduling.
    pub fn report_progress(&self, percent: u8, stage: &str) {
        info!(
            job_id = %self.job.id,
            job = %self.job.name,
            progress = percent,
            stage,
            "job progress"
        );
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job name this handler claims.
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &JobContext) -> JobResult;
}

/// N polling loops over one handler.
pub struct WorkerPool {
    pool: PgPool,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(pool: PgPool, handler: Arc<dyn JobHandler>, concurrency: usize) -> Self {
        Self {
            pool,
            handler,
            concurrency,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Spawn the worker loops. Handles run until the runtime shuts down.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.concurrency);
        for worker_idx in 0..self.concurrency {
            let pool = self.pool.clone();
            let handler = self.handler.clone();
            let poll_interval = self.poll_interval;
            handles.push(tokio::spawn(async move {
                info!(job = handler.name(), worker = worker_idx, "worker started");
                loop {
                    match run_one(&pool, handler.as_ref()).await {
                        Ok(true) => {} // claimed and settled one; poll again immediately
                        Ok(false) => tokio::time::sleep(poll_interval).await,
                        Err(e) => {
                            error!(job = handler.name(), error = %e, "worker loop error");
                            tokio::time::sleep(poll_interval).await;
                        }
                    }
                }
            }));
        }
        handles
    }
}

/// Claim and settle at most one job. Returns whether a job was claimed.
async fn run_one(pool: &PgPool, handler: &dyn JobHandler) -> Result<bool, SynapseError> {
    let Some(job) = queue::claim(pool, handler.name()).await? else {
        return Ok(false);
    };

    let ctx = JobContext::new(job);
    let result = handler.execute(&ctx).await;
    let job = ctx.job();

    match result {
        JobResult::Success => {
            queue::complete(pool, &job.id).await?;
            info!(job_id = %job.id, job = %job.name, "job completed");
        }
        JobResult::Skipped(reason) => {
            queue::complete(pool, &job.id).await?;
            info!(job_id = %job.id, job = %job.name, reason, "job skipped");
        }
        JobResult::Retry(reason) => {
            queue::fail(pool, job, &reason, true).await?;
        }
        JobResult::Fatal(reason) => {
            queue::fail(pool, job, &reason, false).await?;
        }
    }
    Ok(true)
}
