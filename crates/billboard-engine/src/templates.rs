use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use billboard_contracts::layout::{load_layout, Layout};
use billboard_contracts::{PosterError, PosterResult};
use image::{GrayImage, RgbaImage};

const BASE_SUFFIXES: [&str; 3] = ["_base.png", "_base.jpg", "_base.webp"];
const PROTECTION_SUFFIXES: [&str; 2] = ["_mask.png", "_protect.png"];
const SCENE_SUFFIX: &str = "_scene_mask.png";

/// Base raster plus protection masks for one template id.
///
/// Mask assets are single channel; any non-zero pixel is protected chrome
/// (protection mask) or repaintable scene area (scene mask).
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateResources {
    pub id: String,
    pub base: RgbaImage,
    pub protection: GrayImage,
    pub scene: Option<GrayImage>,
}

impl TemplateResources {
    pub fn dimensions(&self) -> (u32, u32) {
        self.base.dimensions()
    }
}

/// Per-id cache of layouts and template rasters for the process lifetime.
///
/// Loads run outside the lock; a racing duplicate load produces an equal
/// value and the first insert wins.
#[derive(Debug)]
pub struct TemplateCache {
    templates_dir: PathBuf,
    layouts: RwLock<HashMap<String, Arc<Layout>>>,
    templates: RwLock<HashMap<String, Arc<TemplateResources>>>,
}

impl TemplateCache {
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            layouts: RwLock::new(HashMap::new()),
            templates: RwLock::new(HashMap::new()),
        }
    }

    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }

    pub fn load_layout(&self, template_id: &str) -> PosterResult<Arc<Layout>> {
        if let Some(hit) = read_cached(&self.layouts, template_id)? {
            return Ok(hit);
        }
        let loaded = Arc::new(load_layout(&self.templates_dir, template_id)?);
        insert_cached(&self.layouts, template_id, loaded)
    }

    pub fn load_template(&self, template_id: &str) -> PosterResult<Arc<TemplateResources>> {
        if let Some(hit) = read_cached(&self.templates, template_id)? {
            return Ok(hit);
        }
        let loaded = Arc::new(read_template_assets(&self.templates_dir, template_id)?);
        tracing::info!(
            template_id,
            width = loaded.base.width(),
            height = loaded.base.height(),
            scene_mask = loaded.scene.is_some(),
            "template assets loaded"
        );
        insert_cached(&self.templates, template_id, loaded)
    }
}

fn read_cached<T>(
    cache: &RwLock<HashMap<String, Arc<T>>>,
    key: &str,
) -> PosterResult<Option<Arc<T>>> {
    let guard = cache
        .read()
        .map_err(|_| anyhow::anyhow!("template cache lock poisoned"))?;
    Ok(guard.get(key).cloned())
}

fn insert_cached<T>(
    cache: &RwLock<HashMap<String, Arc<T>>>,
    key: &str,
    value: Arc<T>,
) -> PosterResult<Arc<T>> {
    let mut guard = cache
        .write()
        .map_err(|_| anyhow::anyhow!("template cache lock poisoned"))?;
    Ok(guard.entry(key.to_string()).or_insert(value).clone())
}

fn read_template_assets(dir: &Path, template_id: &str) -> PosterResult<TemplateResources> {
    let base_path = first_existing(dir, template_id, &BASE_SUFFIXES).ok_or_else(|| {
        PosterError::asset_missing(template_id, "base", "no {id}_base.{png,jpg,webp} file")
    })?;
    let base = image::open(&base_path)
        .map_err(|err| {
            PosterError::asset_missing(
                template_id,
                base_path.display().to_string(),
                err.to_string(),
            )
        })?
        .to_rgba8();

    let mask_path = first_existing(dir, template_id, &PROTECTION_SUFFIXES).ok_or_else(|| {
        PosterError::asset_missing(template_id, "protection mask", "no {id}_mask.png file")
    })?;
    let protection = read_mask(template_id, &mask_path, base.dimensions())?;

    let scene_path = dir.join(format!("{template_id}{SCENE_SUFFIX}"));
    let scene = if scene_path.is_file() {
        Some(read_mask(template_id, &scene_path, base.dimensions())?)
    } else {
        None
    };

    Ok(TemplateResources {
        id: template_id.to_string(),
        base,
        protection,
        scene,
    })
}

fn read_mask(template_id: &str, path: &Path, expected: (u32, u32)) -> PosterResult<GrayImage> {
    let mask = image::open(path)
        .map_err(|err| {
            PosterError::asset_missing(template_id, path.display().to_string(), err.to_string())
        })?
        .to_luma8();
    if mask.dimensions() != expected {
        return Err(PosterError::asset_missing(
            template_id,
            path.display().to_string(),
            format!(
                "mask is {}x{} but base image is {}x{}",
                mask.width(),
                mask.height(),
                expected.0,
                expected.1
            ),
        ));
    }
    Ok(mask)
}

fn first_existing(dir: &Path, template_id: &str, suffixes: &[&str]) -> Option<PathBuf> {
    suffixes
        .iter()
        .map(|suffix| dir.join(format!("{template_id}{suffix}")))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use billboard_contracts::PosterError;
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    use super::TemplateCache;

    fn write_template(dir: &std::path::Path, id: &str, size: u32) -> anyhow::Result<()> {
        RgbaImage::from_pixel(size, size, Rgba([10, 20, 30, 255]))
            .save(dir.join(format!("{id}_base.png")))?;
        let mut mask = GrayImage::new(size, size);
        mask.put_pixel(0, 0, Luma([255]));
        mask.save(dir.join(format!("{id}_mask.png")))?;
        Ok(())
    }

    #[test]
    fn load_template_is_cached_and_stable() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_template(temp.path(), "spring", 8)?;
        let cache = TemplateCache::new(temp.path());
        let first = cache.load_template("spring")?;
        let second = cache.load_template("spring")?;
        assert!(Arc::ptr_eq(&first, &second));

        let fresh = TemplateCache::new(temp.path()).load_template("spring")?;
        assert_eq!(first.base.as_raw(), fresh.base.as_raw());
        assert_eq!(first.protection.as_raw(), fresh.protection.as_raw());
        assert!(first.scene.is_none());
        Ok(())
    }

    #[test]
    fn missing_protection_mask_is_reported() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        RgbaImage::new(4, 4).save(temp.path().join("bare_base.png"))?;
        let err = TemplateCache::new(temp.path()).load_template("bare").err();
        assert!(matches!(
            err,
            Some(PosterError::TemplateAssetMissing { asset, .. }) if asset == "protection mask"
        ));
        Ok(())
    }

    #[test]
    fn mismatched_mask_size_is_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        RgbaImage::new(8, 8).save(temp.path().join("odd_base.png"))?;
        GrayImage::new(4, 4).save(temp.path().join("odd_mask.png"))?;
        assert!(TemplateCache::new(temp.path()).load_template("odd").is_err());
        Ok(())
    }

    #[test]
    fn missing_base_is_reported() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let err = TemplateCache::new(temp.path()).load_template("ghost").err();
        assert!(matches!(err, Some(PosterError::TemplateAssetMissing { .. })));
        Ok(())
    }
}
