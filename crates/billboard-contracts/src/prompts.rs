use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aspect {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:5")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
}

impl Aspect {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "1:1" => Some(Self::Square),
            "4:5" => Some(Self::Portrait),
            "4:3" => Some(Self::Landscape),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait => "4:5",
            Self::Landscape => "4:3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptSlot {
    Scenario,
    Product,
    Gallery,
}

impl PromptSlot {
    pub const ALL: [PromptSlot; 3] = [Self::Scenario, Self::Product, Self::Gallery];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Scenario => "scenario",
            Self::Product => "product",
            Self::Gallery => "gallery",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Scenario => &["scenario"],
            Self::Product => &["product"],
            Self::Gallery => &["gallery", "gallery_strip"],
        }
    }

    pub fn default_aspect(&self) -> Aspect {
        match self {
            Self::Scenario => Aspect::Square,
            Self::Product => Aspect::Portrait,
            Self::Gallery => Aspect::Landscape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSlotConfig {
    pub preset: Option<String>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub aspect: Aspect,
}

impl PromptSlotConfig {
    pub fn defaults_for(slot: PromptSlot) -> Self {
        Self {
            preset: None,
            prompt: None,
            negative_prompt: None,
            aspect: slot.default_aspect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptBundle {
    pub scenario: PromptSlotConfig,
    pub product: PromptSlotConfig,
    pub gallery: PromptSlotConfig,
}

impl Default for PromptBundle {
    fn default() -> Self {
        Self {
            scenario: PromptSlotConfig::defaults_for(PromptSlot::Scenario),
            product: PromptSlotConfig::defaults_for(PromptSlot::Product),
            gallery: PromptSlotConfig::defaults_for(PromptSlot::Gallery),
        }
    }
}

impl PromptBundle {
    pub fn get(&self, slot: PromptSlot) -> &PromptSlotConfig {
        match slot {
            PromptSlot::Scenario => &self.scenario,
            PromptSlot::Product => &self.product,
            PromptSlot::Gallery => &self.gallery,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Canonicalizes loosely shaped per-slot prompt input. Never fails: anything
/// unrecognized degrades to the slot defaults.
pub fn normalize_prompt_bundle(raw: &Value) -> PromptBundle {
    let parsed;
    let source = match raw {
        Value::Object(map) => Some(map),
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text.trim()).ok();
            parsed.as_ref().and_then(Value::as_object)
        }
        _ => None,
    };
    let Some(source) = source else {
        return PromptBundle::default();
    };
    PromptBundle {
        scenario: normalize_prompt_slot(
            PromptSlot::Scenario,
            slot_input(source, PromptSlot::Scenario),
        ),
        product: normalize_prompt_slot(
            PromptSlot::Product,
            slot_input(source, PromptSlot::Product),
        ),
        gallery: normalize_prompt_slot(
            PromptSlot::Gallery,
            slot_input(source, PromptSlot::Gallery),
        ),
    }
}

fn slot_input(source: &Map<String, Value>, slot: PromptSlot) -> Option<&Value> {
    slot.aliases()
        .iter()
        .filter_map(|alias| source.get(*alias))
        .find(|value| !value.is_null())
}

pub fn normalize_prompt_slot(slot: PromptSlot, raw: Option<&Value>) -> PromptSlotConfig {
    let mut config = PromptSlotConfig::defaults_for(slot);
    match raw {
        Some(Value::String(text)) => {
            config.prompt = clean_text(text);
        }
        Some(Value::Object(fields)) => {
            config.preset = first_text(fields, &["preset", "style"]);
            config.prompt = first_text(fields, &["prompt", "positive", "text"]);
            config.negative_prompt = first_text(fields, &["negative_prompt", "negative"]);
            config.aspect = first_text(fields, &["aspect", "aspect_ratio"])
                .as_deref()
                .and_then(Aspect::parse)
                .unwrap_or_else(|| slot.default_aspect());
        }
        _ => {}
    }
    config
}

fn first_text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| fields.get(*key).and_then(Value::as_str))
        .find_map(clean_text)
}

fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{normalize_prompt_bundle, Aspect, PromptBundle};

    #[test]
    fn absent_slots_take_their_default_aspects() {
        let bundle = normalize_prompt_bundle(&Value::Null);
        assert_eq!(bundle, PromptBundle::default());
        assert_eq!(bundle.scenario.aspect, Aspect::Square);
        assert_eq!(bundle.product.aspect, Aspect::Portrait);
        assert_eq!(bundle.gallery.aspect, Aspect::Landscape);
    }

    #[test]
    fn bare_string_becomes_trimmed_prompt() {
        let bundle = normalize_prompt_bundle(&json!({"scenario": " abc "}));
        assert_eq!(bundle.scenario.prompt.as_deref(), Some("abc"));
        assert_eq!(bundle.scenario.negative_prompt, None);
    }

    #[test]
    fn object_aliases_map_onto_canonical_fields() {
        let bundle = normalize_prompt_bundle(&json!({
            "product": {"positive": "glass bottle", "negative": " blur ", "aspect_ratio": "4:3"},
            "gallery_strip": {"text": "three tiles", "preset": "studio"},
        }));
        assert_eq!(bundle.product.prompt.as_deref(), Some("glass bottle"));
        assert_eq!(bundle.product.negative_prompt.as_deref(), Some("blur"));
        assert_eq!(bundle.product.aspect, Aspect::Landscape);
        assert_eq!(bundle.gallery.prompt.as_deref(), Some("three tiles"));
        assert_eq!(bundle.gallery.preset.as_deref(), Some("studio"));
    }

    #[test]
    fn unknown_aspect_falls_back_to_slot_default() {
        let bundle = normalize_prompt_bundle(&json!({
            "scenario": {"aspect": "16:9"},
            "product": {"aspect": 4},
        }));
        assert_eq!(bundle.scenario.aspect, Aspect::Square);
        assert_eq!(bundle.product.aspect, Aspect::Portrait);
    }

    #[test]
    fn empty_strings_become_none_and_keys_stay_present() {
        let bundle = normalize_prompt_bundle(&json!({"scenario": {"prompt": "   ", "preset": ""}}));
        assert_eq!(bundle.scenario.prompt, None);
        assert_eq!(bundle.scenario.preset, None);
        let value = bundle.to_value();
        assert!(value["scenario"].as_object().is_some_and(|obj| obj.contains_key("prompt")));
        assert_eq!(value["scenario"]["prompt"], Value::Null);
    }

    #[test]
    fn normalizing_canonical_output_is_idempotent() {
        let first = normalize_prompt_bundle(&json!({
            "scenario": {"prompt": " beach at dusk ", "negative_prompt": "text", "aspect": "4:5"},
            "product": "bottle",
        }));
        let second = normalize_prompt_bundle(&first.to_value());
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_input_degrades_to_defaults() {
        assert_eq!(normalize_prompt_bundle(&json!([1, 2, 3])), PromptBundle::default());
        assert_eq!(normalize_prompt_bundle(&json!("not json")), PromptBundle::default());
        let bundle = normalize_prompt_bundle(&json!("{\"gallery\": \"tiles\"}"));
        assert_eq!(bundle.gallery.prompt.as_deref(), Some("tiles"));
    }
}
