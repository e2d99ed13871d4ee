use serde::{Deserialize, Serialize};

use crate::error::{PosterError, PosterResult};

pub const MIN_FEATURES: usize = 3;
pub const MAX_FEATURES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Zh,
}

/// Per-request poster copy and asset references.
///
/// Asset references are either object-store keys or `data:` URLs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PosterContent {
    pub brand_name: String,
    pub agent_name: String,
    pub product_name: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub series: Option<String>,
    pub features: Vec<String>,
    pub scenario_image: Option<String>,
    pub product_image: Option<String>,
    pub gallery_images: Vec<String>,
    pub logo_image: Option<String>,
    pub locale: Locale,
}

impl PosterContent {
    pub fn validate(&self) -> PosterResult<()> {
        let features = self
            .features
            .iter()
            .filter(|feature| !feature.trim().is_empty())
            .count();
        if !(MIN_FEATURES..=MAX_FEATURES).contains(&features) {
            return Err(PosterError::InvalidContent {
                reason: format!(
                    "expected {MIN_FEATURES}-{MAX_FEATURES} features, got {features}"
                ),
            });
        }
        if self.product_name.trim().is_empty() {
            return Err(PosterError::InvalidContent {
                reason: "product_name is required".to_string(),
            });
        }
        Ok(())
    }

    /// Image reference for a layout slot key, if the request supplied one.
    pub fn image_for_slot(&self, slot_key: &str) -> Option<&str> {
        match slot_key {
            "scenario" => self.scenario_image.as_deref(),
            "product" => self.product_image.as_deref(),
            "logo" | "brand_logo" => self.logo_image.as_deref(),
            _ => None,
        }
    }
}
