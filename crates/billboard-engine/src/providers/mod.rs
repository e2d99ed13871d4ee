mod openai;
mod placeholder;
mod vertex;

use std::fmt;

use anyhow::{Context, Result};
use billboard_contracts::providers::ProviderKind;
use image::{DynamicImage, RgbaImage};

pub use openai::OpenAiCompatibleBackend;
pub use placeholder::PlaceholderBackend;
pub use vertex::VertexBackend;

use crate::config::EngineConfig;
use crate::mask::EditMask;

/// Normalized request every adapter accepts.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub seed: Option<i64>,
    pub base_image: Option<RgbaImage>,
    pub mask: Option<EditMask>,
    /// Short human label, used by the placeholder renderer.
    pub label: String,
}

impl GenerationRequest {
    pub fn text_to_image(prompt: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width,
            height,
            seed: None,
            base_image: None,
            mask: None,
            label: String::new(),
        }
    }

    pub fn has_edit_inputs(&self) -> bool {
        self.base_image.is_some() && self.mask.is_some()
    }

    pub(crate) fn edit_inputs(&self) -> Result<(&RgbaImage, &EditMask)> {
        let base = self
            .base_image
            .as_ref()
            .context("masked edit requires a base image")?;
        let mask = self.mask.as_ref().context("masked edit requires an edit mask")?;
        Ok((base, mask))
    }

    /// Prompt text for backends without a separate negative prompt field.
    pub(crate) fn prompt_with_negative(&self) -> String {
        match self.negative_prompt.as_deref() {
            Some(negative) => format!("{}\nAvoid: {negative}", self.prompt),
            None => self.prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl ImageBytes {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: Some("image/png".to_string()),
        }
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory(&self.bytes).context("provider returned undecodable image bytes")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Edit,
    Generate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Generate => "generate",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;
    /// False when credentials are missing; the orchestrator skips the backend.
    fn is_configured(&self) -> bool;
    fn generate(&self, request: &GenerationRequest) -> Result<ImageBytes>;
    fn edit(&self, request: &GenerationRequest) -> Result<ImageBytes>;
}

/// Instantiates adapters for `config.provider_order`, keeping its priority.
pub fn build_backends(config: &EngineConfig) -> Result<Vec<Box<dyn ImageBackend>>> {
    let mut backends: Vec<Box<dyn ImageBackend>> = Vec::new();
    for kind in &config.provider_order {
        let backend: Box<dyn ImageBackend> = match kind {
            ProviderKind::Vertex => Box::new(VertexBackend::new(
                &config.vertex,
                config.vertex_project.clone(),
                &config.vertex_location,
                config.request_timeout,
            )?),
            ProviderKind::OpenAiCompatible => Box::new(OpenAiCompatibleBackend::new(
                &config.openai,
                config.request_timeout,
            )?),
            ProviderKind::Placeholder => Box::new(PlaceholderBackend),
        };
        backends.push(backend);
    }
    Ok(backends)
}
