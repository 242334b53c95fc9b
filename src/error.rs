use thiserror::Error;

use crate::types::StopReason;

#[derive(Error, Debug)]
pub enum TotError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Run not found: {0}")]
    NotFound(String),

    #[error("Transient LLM failure: {0}")]
    TransientLlm(String),

    #[error("LLM quota exceeded: {0}")]
    Quota(String),

    #[error("Invalid LLM request: {0}")]
    InvalidRequest(String),

    #[error("LLM retries exhausted after {attempts} attempts: {message}")]
    ExhaustedLlm { attempts: u32, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDim { expected: usize, actual: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TotError {
    /// Whether the gateway may retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, TotError::TransientLlm(_) | TotError::Http(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TotError::Cancelled)
    }

    /// The stop reason a run ends with when this error crosses the engine
    /// boundary.
    pub fn stop_reason(&self) -> StopReason {
        match self {
            TotError::Cancelled => StopReason::Cancelled,
            _ => StopReason::InternalError,
        }
    }
}

pub type TotResult<T> = Result<T, TotError>;
