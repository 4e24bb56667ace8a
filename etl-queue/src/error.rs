use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations. Callers decide retry vs.
/// terminal failure based on which variant they see, not on a generic
/// exception path.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("queue not declared: {0}")]
    QueueNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid ack handle")]
    InvalidAckHandle,

    #[error("job already in terminal state")]
    AlreadyTerminal,

    #[error("job execution failed: {0}")]
    JobFailed(#[from] JobError),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("broker unreachable")]
    BrokerUnreachable,

    #[error("worker shutdown in progress")]
    WorkerShutdown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Job/message execution outcome — determines retry behavior at the
/// worker level. `Retryable` triggers exponential backoff up to the
/// configured bound; `Permanent` fails the stage immediately.
#[derive(Error, Debug, Clone)]
pub enum JobError {
    #[error("retryable error: {0}")]
    Retryable(String),

    #[error("permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}
