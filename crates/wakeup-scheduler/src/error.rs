use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("job not found: {id}")]
    JobNotFound { id: String },

    #[error("execution not found: {id}")]
    ExecutionNotFound { id: String },

    #[error("an execution already exists for job {job_id} at {scheduled_for}")]
    DuplicateExecution {
        job_id: String,
        scheduled_for: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
