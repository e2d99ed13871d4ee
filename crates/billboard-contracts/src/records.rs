use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Stored override slots, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VariantSlot {
    #[serde(rename = "variant_a")]
    A,
    #[serde(rename = "variant_b")]
    B,
}

impl VariantSlot {
    pub const ALL: [VariantSlot; 2] = [Self::A, Self::B];

    pub fn key(&self) -> &'static str {
        match self {
            Self::A => "variant_a",
            Self::B => "variant_b",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

impl fmt::Display for VariantSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for VariantSlot {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "variant_a" | "a" => Ok(Self::A),
            "variant_b" | "b" => Ok(Self::B),
            other => Err(format!("Unknown variant slot '{other}'.")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordLocation {
    /// File name relative to the variant store directory.
    Local { file: String },
    /// Object-store mirror; `file` is the local copy kept alongside it.
    Storage {
        file: String,
        key: String,
        url: Option<String>,
    },
}

impl RecordLocation {
    pub fn local_file(&self) -> &str {
        match self {
            Self::Local { file } | Self::Storage { file, .. } => file,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePosterRecord {
    pub slot: VariantSlot,
    pub filename: String,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
    pub location: RecordLocation,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetPayload {
    Inline(Vec<u8>),
    StorageKey(String),
    PublicUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAsset {
    pub id: Option<String>,
    pub filename: String,
    pub media_type: String,
    pub width: u32,
    pub height: u32,
    pub payload: AssetPayload,
}

impl GeneratedAsset {
    /// JSON description with inline bytes omitted.
    pub fn describe(&self) -> Map<String, Value> {
        let payload = match &self.payload {
            AssetPayload::Inline(bytes) => json!({"kind": "inline", "bytes": bytes.len()}),
            AssetPayload::StorageKey(key) => json!({"kind": "storage_key", "key": key}),
            AssetPayload::PublicUrl(url) => json!({"kind": "public_url", "url": url}),
        };
        let mut out = Map::new();
        out.insert("id".to_string(), json!(self.id));
        out.insert("filename".to_string(), json!(self.filename));
        out.insert("media_type".to_string(), json!(self.media_type));
        out.insert("width".to_string(), json!(self.width));
        out.insert("height".to_string(), json!(self.height));
        out.insert("payload".to_string(), payload);
        out
    }
}
