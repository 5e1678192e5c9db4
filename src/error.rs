//! Error taxonomy shared by every component of the flywheel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlywheelError {
    /// Inputs failed a precondition (empty text, missing title/abstract, bad dimension).
    #[error("validation error: {0}")]
    Validation(String),

    /// LLM output was not JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// LLM output parsed but a required field was absent.
    #[error("missing field: {0}")]
    MissingField(String),

    /// LLM output carried a field of the wrong type.
    #[error("invalid type: {0}")]
    InvalidType(String),

    #[error("empty response from upstream")]
    EmptyResponse,

    /// HTTP 4xx/5xx, timeout or network failure talking to an external API.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream still failing after {attempts} attempts: {last_error}")]
    ApiExhausted { attempts: u32, last_error: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// A report was requested for a day without analyzed papers.
    #[error("no data: {0}")]
    NoData(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlywheelError>;

impl FlywheelError {
    /// Whether the LLM/embedding retry loop may try the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlywheelError::Upstream(_) | FlywheelError::EmptyResponse)
    }

    /// HTTP status the API layer reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            FlywheelError::Validation(_) | FlywheelError::Conflict(_) => 400,
            FlywheelError::NotFound(_) | FlywheelError::NoData(_) => 404,
            _ => 500,
        }
    }
}

impl From<reqwest::Error> for FlywheelError {
    fn from(err: reqwest::Error) -> Self {
        FlywheelError::Upstream(err.to_string())
    }
}

impl From<async_openai::error::OpenAIError> for FlywheelError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        FlywheelError::Upstream(err.to_string())
    }
}

impl From<qdrant_client::QdrantError> for FlywheelError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        FlywheelError::Upstream(format!("qdrant: {}", err))
    }
}
