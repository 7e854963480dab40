use crate::item::ItemId;
use thiserror::Error;

/// Errors raised by the translation workflow.
///
/// Provider errors are passed through to callers unchanged in kind so the
/// poll scheduler can decide what is worth another attempt.
#[derive(Debug, Error)]
pub enum TranslationError {
    /// Transport failure, DNS/TLS error or timeout talking to the provider
    #[error("translation provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider answered with a non-2xx status
    #[error("translation provider rejected the request ({status}): {body}")]
    ProviderRejected { status: u16, body: String },

    /// The provider reported the job itself as failed
    #[error("translation provider reported job {0} as failed")]
    ProviderJobFailed(String),

    #[error("post {0} not found")]
    ItemNotFound(ItemId),

    #[error("translation request {0} not found")]
    RequestNotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("translation request {request_id} still pending after {attempts} status checks")]
    MaxAttemptsExceeded { request_id: String, attempts: u32 },

    #[error("invalid locale code: '{0}'")]
    InvalidLocale(String),
}

impl TranslationError {
    /// Whether another attempt might succeed without any change on our side
    pub fn is_retryable(&self) -> bool {
        matches!(self, TranslationError::ProviderUnavailable(_))
    }
}

impl From<reqwest::Error> for TranslationError {
    fn from(e: reqwest::Error) -> Self {
        TranslationError::ProviderUnavailable(e.to_string())
    }
}

impl From<sqlx::Error> for TranslationError {
    fn from(e: sqlx::Error) -> Self {
        TranslationError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TranslationError>;
