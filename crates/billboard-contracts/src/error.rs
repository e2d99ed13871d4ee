use std::fmt;

use serde::{Deserialize, Serialize};

pub type PosterResult<T> = Result<T, PosterError>;

/// One failed backend attempt, recorded by the orchestrator before it moves on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub provider: String,
    pub operation: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.provider, self.operation, self.message)
    }
}

impl std::error::Error for ProviderError {}

#[derive(Debug, thiserror::Error)]
pub enum PosterError {
    #[error("layout not found for template '{template_id}'")]
    LayoutNotFound { template_id: String },

    #[error("layout for template '{template_id}' is invalid: {reason}")]
    LayoutInvalid { template_id: String, reason: String },

    #[error("template '{template_id}' asset '{asset}' unavailable: {reason}")]
    TemplateAssetMissing {
        template_id: String,
        asset: String,
        reason: String,
    },

    #[error("cannot build edit mask for template '{template_id}': slot '{slot}' missing")]
    MaskBuild { template_id: String, slot: String },

    #[error("asset '{key}' could not be fetched: {reason}")]
    AssetFetch { key: String, reason: String },

    #[error("provider {0}")]
    Provider(ProviderError),

    #[error("all providers exhausted: {}", format_attempts(.attempts))]
    AllProvidersExhausted { attempts: Vec<ProviderError> },

    #[error("poster content rejected: {reason}")]
    InvalidContent { reason: String },

    #[error("{mode} mode requires a base image and an edit mask")]
    EditInputsMissing { mode: String },

    #[error("unsupported content type '{content_type}'")]
    UnsupportedContentType { content_type: String },

    #[error("variant store error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PosterError {
    pub fn layout_invalid(template_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LayoutInvalid {
            template_id: template_id.into(),
            reason: reason.into(),
        }
    }

    pub fn asset_missing(
        template_id: impl Into<String>,
        asset: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::TemplateAssetMissing {
            template_id: template_id.into(),
            asset: asset.into(),
            reason: reason.into(),
        }
    }

    pub fn asset_fetch(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AssetFetch {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

fn format_attempts(attempts: &[ProviderError]) -> String {
    if attempts.is_empty() {
        return "no provider attempted".to_string();
    }
    attempts
        .iter()
        .map(ProviderError::to_string)
        .collect::<Vec<String>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::{PosterError, ProviderError};

    #[test]
    fn exhausted_error_lists_every_attempt_in_order() {
        let err = PosterError::AllProvidersExhausted {
            attempts: vec![
                ProviderError::new("vertex", "edit", "timeout"),
                ProviderError::new("openai-compatible", "edit", "401 unauthorized"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "all providers exhausted: vertex edit: timeout; \
             openai-compatible edit: 401 unauthorized"
        );
    }

    #[test]
    fn missing_edit_inputs_names_the_mode() {
        let err = PosterError::EditInputsMissing {
            mode: "locked".to_string(),
        };
        assert_eq!(err.to_string(), "locked mode requires a base image and an edit mask");
    }

    #[test]
    fn mask_error_names_template_and_slot() {
        let err = PosterError::MaskBuild {
            template_id: "spring".to_string(),
            slot: "product".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("spring"));
        assert!(text.contains("product"));
    }
}
