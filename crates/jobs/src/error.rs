use core::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    /// The argument map did not deserialize into the handler's argument
    /// struct. Never retried.
    #[error("Invalid job arguments: {0}")]
    InvalidArgs(String),

    /// The handler failed; retried while the job has retry budget left.
    #[error("{0}")]
    Failed(String),
}

impl JobError {
    pub fn failed(err: impl fmt::Display) -> Self {
        JobError::Failed(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum CronError {
    #[error("Invalid cron expression `{0}`: {1}")]
    Invalid(String, String),
}
