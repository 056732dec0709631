use thiserror::Error;

/// Error taxonomy shared across the workspace.
///
/// The queue runtime routes on these categories: `Validation` is rejected
/// before enqueue/dispatch and never retried, `TransientGateway` is retried
/// with backoff, `Conflict` is treated as a successful no-op, and `FatalJob`
/// marks a job dead after its attempt budget is exhausted.
#[derive(Error, Debug)]
pub enum SynapseError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient gateway error: {0}")]
    TransientGateway(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Fatal job error: {0}")]
    FatalJob(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl SynapseError {
    /// Whether the queue should retry a job that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SynapseError::TransientGateway(_) | SynapseError::Database(_)
        )
    }
}

impl From<sqlx::Error> for SynapseError {
    fn from(e: sqlx::Error) -> Self {
        SynapseError::Database(e.to_string())
    }
}
