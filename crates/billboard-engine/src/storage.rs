use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use billboard_contracts::{PosterError, PosterResult};
use image::DynamicImage;

/// Narrow object-store contract. Every call may fail; callers never assume a
/// store is configured.
pub trait ObjectStore: Send + Sync {
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>>;
    fn put_bytes(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<Option<String>>;
    fn public_url_for(&self, key: &str) -> Option<String>;
}

/// Directory-backed store; keys are relative paths under `root`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base: Option<String>,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if key.trim().is_empty()
            || relative
                .components()
                .any(|part| !matches!(part, Component::Normal(_)))
        {
            bail!("invalid storage key '{key}'");
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).with_context(|| format!("failed reading {}", path.display()))
    }

    fn put_bytes(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(self.public_url_for(key))
    }

    fn public_url_for(&self, key: &str) -> Option<String> {
        self.public_base
            .as_ref()
            .map(|base| format!("{}/{}", base, key.trim_start_matches('/')))
    }
}

/// Where a content image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetRef<'a> {
    Data { mime: &'a str, payload: &'a str },
    StorageKey(&'a str),
}

impl<'a> AssetRef<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if let Some((meta, payload)) = rest.split_once(',') {
                let mime = meta.strip_suffix(";base64").unwrap_or(meta);
                return Self::Data { mime, payload };
            }
        }
        Self::StorageKey(trimmed)
    }
}

pub fn fetch_asset_bytes(
    store: Option<&dyn ObjectStore>,
    reference: &str,
) -> PosterResult<Vec<u8>> {
    let label = short_label(reference);
    match AssetRef::parse(reference) {
        AssetRef::Data { payload, .. } => BASE64
            .decode(payload.trim().as_bytes())
            .map_err(|err| {
                PosterError::asset_fetch(label, format!("data reference decode failed: {err}"))
            }),
        AssetRef::StorageKey(key) => {
            let Some(store) = store else {
                return Err(PosterError::asset_fetch(key, "no object store configured"));
            };
            store
                .get_bytes(key)
                .map_err(|err| PosterError::asset_fetch(key, format!("{err:#}")))
        }
    }
}

pub fn fetch_asset_image(
    store: Option<&dyn ObjectStore>,
    reference: &str,
) -> PosterResult<DynamicImage> {
    let bytes = fetch_asset_bytes(store, reference)?;
    image::load_from_memory(&bytes).map_err(|err| {
        PosterError::asset_fetch(short_label(reference), format!("image decode failed: {err}"))
    })
}

fn short_label(reference: &str) -> String {
    let trimmed = reference.trim();
    if trimmed.starts_with("data:") {
        let head = trimmed.split(',').next().unwrap_or("data:");
        return format!("{head},…");
    }
    trimmed.to_string()
}
