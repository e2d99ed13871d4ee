use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use billboard_contracts::layout::FitPolicy;
use billboard_contracts::providers::{default_provider_order, parse_provider_order, ProviderKind};

use crate::util::non_empty_env;

const DEFAULT_VERTEX_LOCATION: &str = "us-central1";
const DEFAULT_VERTEX_MODEL: &str = "imagen-3.0-capability-001";
const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-image-1";
const DEFAULT_TIMEOUT_S: u64 = 120;

/// Process-wide settings, built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub templates_dir: PathBuf,
    pub variants_dir: PathBuf,
    pub storage_dir: Option<PathBuf>,
    pub storage_public_base: Option<String>,
    pub provider_order: Vec<ProviderKind>,
    pub vertex: BackendCredentials,
    pub vertex_project: Option<String>,
    pub vertex_location: String,
    pub openai: BackendCredentials,
    pub request_timeout: Duration,
    pub allow_placeholder: bool,
    pub substitute_missing_assets: bool,
    pub fit_policies: BTreeMap<String, FitPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCredentials {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("templates"),
            variants_dir: PathBuf::from("template_posters"),
            storage_dir: None,
            storage_public_base: None,
            provider_order: default_provider_order(),
            vertex: BackendCredentials {
                api_key: None,
                api_base: vertex_api_base(DEFAULT_VERTEX_LOCATION),
                model: DEFAULT_VERTEX_MODEL.to_string(),
            },
            vertex_project: None,
            vertex_location: DEFAULT_VERTEX_LOCATION.to_string(),
            openai: BackendCredentials {
                api_key: None,
                api_base: DEFAULT_OPENAI_API_BASE.to_string(),
                model: DEFAULT_OPENAI_MODEL.to_string(),
            },
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_S),
            allow_placeholder: true,
            substitute_missing_assets: false,
            fit_policies: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let provider_order = match non_empty_env("BILLBOARD_PROVIDERS") {
            Some(raw) => parse_provider_order(&raw)
                .map_err(anyhow::Error::msg)
                .context("invalid BILLBOARD_PROVIDERS")?,
            None => defaults.provider_order,
        };
        let request_timeout = match non_empty_env("BILLBOARD_PROVIDER_TIMEOUT_S") {
            Some(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .with_context(|| format!("invalid BILLBOARD_PROVIDER_TIMEOUT_S '{raw}'"))?
                    .max(1),
            ),
            None => defaults.request_timeout,
        };
        let fit_policies = match non_empty_env("BILLBOARD_SLOT_FIT") {
            Some(raw) => parse_fit_policies(&raw).context("invalid BILLBOARD_SLOT_FIT")?,
            None => BTreeMap::new(),
        };

        let vertex_location =
            non_empty_env("VERTEX_LOCATION").unwrap_or(defaults.vertex_location);

        Ok(Self {
            templates_dir: env_path("BILLBOARD_TEMPLATES_DIR").unwrap_or(defaults.templates_dir),
            variants_dir: env_path("BILLBOARD_VARIANTS_DIR").unwrap_or(defaults.variants_dir),
            storage_dir: env_path("BILLBOARD_STORAGE_DIR"),
            storage_public_base: non_empty_env("BILLBOARD_STORAGE_PUBLIC_BASE")
                .map(|value| value.trim_end_matches('/').to_string()),
            provider_order,
            vertex: BackendCredentials {
                api_key: non_empty_env("VERTEX_API_KEY")
                    .or_else(|| non_empty_env("GOOGLE_API_KEY")),
                api_base: non_empty_env("VERTEX_API_BASE")
                    .map(|value| value.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| vertex_api_base(&vertex_location)),
                model: non_empty_env("VERTEX_IMAGE_MODEL").unwrap_or(defaults.vertex.model),
            },
            vertex_project: non_empty_env("VERTEX_PROJECT")
                .or_else(|| non_empty_env("GOOGLE_CLOUD_PROJECT")),
            vertex_location,
            openai: BackendCredentials {
                api_key: non_empty_env("OPENAI_API_KEY"),
                api_base: non_empty_env("OPENAI_API_BASE")
                    .map(|value| value.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.openai.api_base),
                model: non_empty_env("OPENAI_IMAGE_MODEL").unwrap_or(defaults.openai.model),
            },
            request_timeout,
            allow_placeholder: env_flag("BILLBOARD_ALLOW_PLACEHOLDER")
                .unwrap_or(defaults.allow_placeholder),
            substitute_missing_assets: env_flag("BILLBOARD_SUBSTITUTE_MISSING_ASSETS")
                .unwrap_or(defaults.substitute_missing_assets),
            fit_policies,
        })
    }
}

/// `product=contain,scenario=cover`
pub fn parse_fit_policies(raw: &str) -> Result<BTreeMap<String, FitPolicy>> {
    let mut out = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (slot, policy) = entry
            .split_once('=')
            .with_context(|| format!("expected slot=policy, got '{entry}'"))?;
        let policy = FitPolicy::parse(policy)
            .with_context(|| format!("unknown fit policy '{}'", policy.trim()))?;
        out.insert(slot.trim().to_string(), policy);
    }
    Ok(out)
}

fn vertex_api_base(location: &str) -> String {
    format!("https://{location}-aiplatform.googleapis.com/v1")
}

fn env_path(key: &str) -> Option<PathBuf> {
    non_empty_env(key).map(PathBuf::from)
}

fn env_flag(key: &str) -> Option<bool> {
    let raw = env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
