use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("Invalid concurrency limit: {0}")]
    Config(String),

    #[error("Runtime unavailable: {0}")]
    Runtime(String),

    #[error("Invocation error: {0}")]
    Invocation(String),

    #[error("Task failed: {0}")]
    Task(serde_json::Value),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task dropped its completion without reporting a result")]
    Abandoned,
}

impl SchedulerError {
    /// The caller supplied payload for `Task` failures, `None` for the rest.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            SchedulerError::Task(value) => Some(value),
            _ => None,
        }
    }
}
