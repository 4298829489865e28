//! Error taxonomy for the knowledge pipeline.

use thiserror::Error;

use crate::extract::ExtractError;

/// Errors surfaced by ingestion, retrieval, and answering.
#[derive(Error, Debug)]
pub enum KbError {
    /// AI is disabled, the provider is unknown, or its key is missing.
    /// Raised before any network call.
    #[error("{0}")]
    NotConfigured(String),

    /// The provider was reached but the request failed.
    #[error("AI provider ({provider}) request failed. {message}")]
    Provider { provider: String, message: String },

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    /// An internal invariant was broken (e.g. vector count mismatch).
    #[error("{0}")]
    ContractViolation(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl KbError {
    pub fn ai_disabled() -> Self {
        KbError::NotConfigured(
            "AI features are disabled. Set ai.enabled = true and configure a provider to use AI."
                .to_string(),
        )
    }

    pub fn missing_api_key(provider: &str) -> Self {
        KbError::NotConfigured(format!(
            "AI is enabled but the configured provider ({}) has no API key set. \
             Set the key in the config file or the environment, or disable AI.",
            provider
        ))
    }

    pub fn provider(provider: &str, message: impl Into<String>) -> Self {
        KbError::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// HTTP-style status class for callers that map errors onto responses.
    pub fn status_code(&self) -> u16 {
        match self {
            KbError::NotConfigured(_) => 503,
            KbError::Provider { .. } => 502,
            KbError::Extraction(_) | KbError::InvalidInput(_) => 422,
            KbError::NotFound(_) => 404,
            KbError::ContractViolation(_) | KbError::Storage(_) => 500,
        }
    }
}

pub type KbResult<T> = std::result::Result<T, KbError>;
