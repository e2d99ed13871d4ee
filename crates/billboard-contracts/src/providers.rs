use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Backend families an orchestrator can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Vertex,
    OpenAiCompatible,
    Placeholder,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::OpenAiCompatible => "openai-compatible",
            Self::Placeholder => "placeholder",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vertex" | "imagen" | "google" => Ok(Self::Vertex),
            "openai-compatible" | "openai" | "openai_compatible" => Ok(Self::OpenAiCompatible),
            "placeholder" | "local" | "dryrun" => Ok(Self::Placeholder),
            other => Err(format!("Unknown provider '{other}'.")),
        }
    }
}

/// Parses a comma-separated priority list. Order is kept, duplicates dropped.
pub fn parse_provider_order(raw: &str) -> Result<Vec<ProviderKind>, String> {
    let mut order = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let kind = part.parse::<ProviderKind>()?;
        if !order.contains(&kind) {
            order.push(kind);
        }
    }
    Ok(order)
}

pub fn default_provider_order() -> Vec<ProviderKind> {
    vec![ProviderKind::Vertex, ProviderKind::OpenAiCompatible]
}

/// How strictly a generation must respect the edit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Masked edit of the locked frame only.
    #[default]
    Locked,
    /// Masked edit first, unconstrained generation if every edit fails.
    Hybrid,
    /// Unconstrained text-to-image.
    Free,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Hybrid => "hybrid",
            Self::Free => "free",
        }
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "locked" => Ok(Self::Locked),
            "hybrid" => Ok(Self::Hybrid),
            "free" => Ok(Self::Free),
            other => Err(format!("Unknown render mode '{other}'.")),
        }
    }
}
