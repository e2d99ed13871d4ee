use std::sync::Arc;

use billboard_contracts::content::PosterContent;
use billboard_contracts::events::{EventPayload, EventSink};
use billboard_contracts::prompts::{normalize_prompt_bundle, PromptBundle, PromptSlot};
use billboard_contracts::providers::RenderMode;
use billboard_contracts::records::{
    AssetPayload, GeneratedAsset, TemplatePosterRecord, VariantSlot,
};
use billboard_contracts::{PosterError, PosterResult};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::frame::FrameRenderer;
use crate::mask::{build_edit_mask, EditMask};
use crate::orchestrator::{Orchestrator, ProviderOutcome};
use crate::providers::{GenerationRequest, Operation};
use crate::storage::{LocalObjectStore, ObjectStore};
use crate::templates::TemplateCache;
use crate::util::{encode_png, short_digest};
use crate::variants::{resolve_variants, TemplatePosterStore};

const PNG_MEDIA_TYPE: &str = "image/png";

#[derive(Debug, Clone)]
pub struct PosterRequest {
    pub template_id: String,
    pub content: PosterContent,
    /// Raw per-slot prompt input; normalized before use.
    pub prompts: Value,
    pub mode: RenderMode,
    pub desired_count: usize,
    pub seed: Option<i64>,
    pub fill_background: bool,
}

impl PosterRequest {
    pub fn new(template_id: impl Into<String>, content: PosterContent) -> Self {
        Self {
            template_id: template_id.into(),
            content,
            prompts: Value::Null,
            mode: RenderMode::default(),
            desired_count: 1,
            seed: None,
            fill_background: true,
        }
    }
}

/// Everything derived from the template for one request.
struct PreparedFrame {
    frame: RgbaImage,
    mask: EditMask,
}

pub struct PosterEngine {
    config: EngineConfig,
    templates: TemplateCache,
    storage: Option<Arc<dyn ObjectStore>>,
    variants: TemplatePosterStore,
    orchestrator: Orchestrator,
    events: EventSink,
}

impl PosterEngine {
    pub fn from_config(config: EngineConfig, events: EventSink) -> PosterResult<Self> {
        let storage = config.storage_dir.as_ref().map(|dir| {
            Arc::new(LocalObjectStore::new(dir, config.storage_public_base.clone()))
                as Arc<dyn ObjectStore>
        });
        let orchestrator = Orchestrator::from_config(&config)?;
        Self::new(config, storage, orchestrator, events)
    }

    pub fn new(
        config: EngineConfig,
        storage: Option<Arc<dyn ObjectStore>>,
        orchestrator: Orchestrator,
        events: EventSink,
    ) -> PosterResult<Self> {
        let variants = TemplatePosterStore::open(&config.variants_dir, storage.clone())?;
        Ok(Self {
            templates: TemplateCache::new(&config.templates_dir),
            config,
            storage,
            variants,
            orchestrator,
            events,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub fn variants(&self) -> &TemplatePosterStore {
        &self.variants
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn render_frame(
        &self,
        template_id: &str,
        content: &PosterContent,
        fill_background: bool,
    ) -> PosterResult<RgbaImage> {
        let layout = self.templates.load_layout(template_id)?;
        let template = self.templates.load_template(template_id)?;
        self.renderer()
            .render_locked_frame(content, &layout, &template, fill_background)
    }

    pub fn build_mask(&self, template_id: &str) -> PosterResult<EditMask> {
        let layout = self.templates.load_layout(template_id)?;
        let template = self.templates.load_template(template_id)?;
        build_edit_mask(&layout, &template)
    }

    pub fn upload_variant(
        &self,
        slot: VariantSlot,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> PosterResult<TemplatePosterRecord> {
        let record = self.variants.upload(slot, filename, content_type, bytes)?;
        self.events.note(
            "variant_uploaded",
            payload([("slot", json!(slot.key())), ("record", json!(record))]),
        );
        Ok(record)
    }

    pub fn generate_posters(&self, request: &PosterRequest) -> PosterResult<Vec<GeneratedAsset>> {
        request.content.validate()?;

        let reused = resolve_variants(&self.variants, request.desired_count)?;
        if !reused.is_empty() {
            info!(
                template_id = %request.template_id,
                count = reused.len(),
                "reusing stored template variants"
            );
            self.events.note(
                "variants_reused",
                payload([
                    ("template_id", json!(request.template_id)),
                    ("count", json!(reused.len())),
                ]),
            );
            return Ok(reused
                .into_iter()
                .map(|mut asset| {
                    asset.id = Some(new_asset_id());
                    asset
                })
                .collect());
        }

        let prepared = self.prepare(request)?;
        let bundle = normalize_prompt_bundle(&request.prompts);
        let (prompt, negative_prompt) = compose_prompt(&request.content, &bundle, request.mode);
        let (width, height) = prepared.frame.dimensions();

        let mut out = Vec::with_capacity(request.desired_count.max(1));
        for idx in 0..request.desired_count.max(1) {
            let mut generation = GenerationRequest::text_to_image(prompt.clone(), width, height);
            generation.negative_prompt = negative_prompt.clone();
            generation.seed = request.seed.map(|seed| seed.wrapping_add(idx as i64));
            generation.label = format!("{} #{}", request.template_id, idx + 1);
            if request.mode != RenderMode::Free {
                generation.base_image = Some(prepared.frame.clone());
                generation.mask = Some(prepared.mask.clone());
            }

            let outcome = self.orchestrator.run(request.mode, &generation)?;
            self.note_outcome(request, idx, &outcome);
            let poster = self.finish_image(&prepared, &outcome)?;
            let asset = self.store_poster(&request.template_id, idx, &poster)?;
            let mut described = asset.describe();
            described.insert("template_id".to_string(), json!(request.template_id));
            described.insert("provider".to_string(), json!(outcome.provider));
            self.events.note("poster_generated", described);
            out.push(asset);
        }
        Ok(out)
    }

    fn renderer(&self) -> FrameRenderer<'_> {
        FrameRenderer::new(
            self.storage.as_deref(),
            &self.config.fit_policies,
            self.config.substitute_missing_assets,
        )
    }

    fn prepare(&self, request: &PosterRequest) -> PosterResult<PreparedFrame> {
        let template_id = request.template_id.as_str();
        let layout = self.templates.load_layout(template_id)?;
        let template = self.templates.load_template(template_id)?;
        self.events.note(
            "template_loaded",
            payload([
                ("template_id", json!(template_id)),
                ("width", json!(layout.canvas_width)),
                ("height", json!(layout.canvas_height)),
                ("slots", json!(layout.slots.keys().collect::<Vec<_>>())),
            ]),
        );

        let frame = self.renderer().render_locked_frame(
            &request.content,
            &layout,
            &template,
            request.fill_background,
        )?;
        self.events.note(
            "frame_rendered",
            payload([
                ("template_id", json!(template_id)),
                ("fill_background", json!(request.fill_background)),
            ]),
        );

        let mask = build_edit_mask(&layout, &template)?;
        self.events.note(
            "mask_built",
            payload([
                ("template_id", json!(template_id)),
                ("editable_pixels", json!(mask.editable_count())),
                ("protected_pixels", json!(mask.protected_count())),
                ("feature_callouts", json!(layout.feature_callouts.len())),
            ]),
        );
        Ok(PreparedFrame { frame, mask })
    }

    fn note_outcome(&self, request: &PosterRequest, idx: usize, outcome: &ProviderOutcome) {
        for failure in &outcome.failures {
            self.events.note(
                "provider_attempt_failed",
                payload([
                    ("template_id", json!(request.template_id)),
                    ("variant", json!(idx)),
                    ("provider", json!(failure.provider)),
                    ("operation", json!(failure.operation)),
                    ("error", json!(failure.message)),
                ]),
            );
        }
        let event_type = if outcome.used_placeholder {
            "placeholder_used"
        } else {
            "provider_succeeded"
        };
        self.events.note(
            event_type,
            payload([
                ("template_id", json!(request.template_id)),
                ("variant", json!(idx)),
                ("mode", json!(request.mode.as_str())),
                ("provider", json!(outcome.provider)),
                ("operation", json!(outcome.operation.as_str())),
            ]),
        );
    }

    /// Brings the backend image to canvas size and, for masked edits, copies
    /// protected pixels back from the locked frame.
    fn finish_image(
        &self,
        prepared: &PreparedFrame,
        outcome: &ProviderOutcome,
    ) -> PosterResult<RgbaImage> {
        let (width, height) = prepared.frame.dimensions();
        let mut image = outcome.image.decode()?.to_rgba8();
        if image.dimensions() != (width, height) {
            warn!(
                provider = %outcome.provider,
                got_width = image.width(),
                got_height = image.height(),
                width,
                height,
                "provider returned off-canvas size, resizing"
            );
            image = imageops::resize(&image, width, height, FilterType::CatmullRom);
        }
        if outcome.operation == Operation::Edit {
            prepared.mask.restore_protected(&prepared.frame, &mut image);
        }
        Ok(image)
    }

    fn store_poster(
        &self,
        template_id: &str,
        idx: usize,
        poster: &RgbaImage,
    ) -> PosterResult<GeneratedAsset> {
        let bytes = encode_png(&DynamicImage::ImageRgba8(poster.clone()))?;
        let id = new_asset_id();
        let filename = format!("{template_id}_{}_{}.png", idx + 1, short_digest(&bytes));
        let location = match self.storage.as_deref() {
            Some(store) => {
                let key = format!("posters/{template_id}/{id}.png");
                let url = store
                    .put_bytes(&key, &bytes, PNG_MEDIA_TYPE)
                    .map_err(|err| {
                        PosterError::storage(format!("poster upload to '{key}' failed: {err:#}"))
                    })?;
                match url {
                    Some(url) => AssetPayload::PublicUrl(url),
                    None => AssetPayload::StorageKey(key),
                }
            }
            None => AssetPayload::Inline(bytes),
        };
        Ok(GeneratedAsset {
            id: Some(id),
            filename,
            media_type: PNG_MEDIA_TYPE.to_string(),
            width: poster.width(),
            height: poster.height(),
            payload: location,
        })
    }
}

/// Backend prompt text plus the merged negative prompt.
pub fn compose_prompt(
    content: &PosterContent,
    bundle: &PromptBundle,
    mode: RenderMode,
) -> (String, Option<String>) {
    let mut lines: Vec<String> = Vec::new();
    let product = content.product_name.trim();
    let brand = content.brand_name.trim();
    if brand.is_empty() {
        lines.push(format!("Marketing poster for {product}."));
    } else {
        lines.push(format!("Marketing poster for {product} by {brand}."));
    }

    for slot in PromptSlot::ALL {
        let config = bundle.get(slot);
        let text = match (config.preset.as_deref(), config.prompt.as_deref()) {
            (Some(preset), Some(prompt)) => format!("{prompt} ({preset} style)"),
            (None, Some(prompt)) => prompt.to_string(),
            (Some(preset), None) => format!("{preset} style"),
            (None, None) => continue,
        };
        lines.push(format!("{} ({}): {text}", slot.key(), config.aspect.as_str()));
    }

    match mode {
        RenderMode::Free => {
            let features: Vec<&str> = content
                .features
                .iter()
                .map(|item| item.trim())
                .filter(|item| !item.is_empty())
                .collect();
            if !features.is_empty() {
                lines.push(format!("Highlight: {}.", features.join("; ")));
            }
        }
        RenderMode::Locked | RenderMode::Hybrid => {
            lines.push(
                "Only repaint the masked scene areas; keep titles, logos and labels unchanged."
                    .to_string(),
            );
        }
    }

    let negatives: Vec<&str> = PromptSlot::ALL
        .iter()
        .filter_map(|slot| bundle.get(*slot).negative_prompt.as_deref())
        .collect();
    let negative = if negatives.is_empty() {
        None
    } else {
        Some(negatives.join(", "))
    };
    (lines.join("\n"), negative)
}

fn payload<const N: usize>(fields: [(&str, Value); N]) -> EventPayload {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn new_asset_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use billboard_contracts::content::PosterContent;
    use billboard_contracts::prompts::normalize_prompt_bundle;
    use billboard_contracts::providers::RenderMode;
    use serde_json::json;

    use super::compose_prompt;

    fn content() -> PosterContent {
        PosterContent {
            brand_name: "Acme".to_string(),
            product_name: "Kettle".to_string(),
            features: vec!["Fast boil".to_string(), "Quiet".to_string(), " ".to_string()],
            ..PosterContent::default()
        }
    }

    #[test]
    fn prompt_merges_slots_and_negatives() {
        let bundle = normalize_prompt_bundle(&json!({
            "scenario": {"positive": "sunlit kitchen", "preset": "warm", "negative": "people"},
            "product": "steel kettle on marble",
            "gallery": {"negative_prompt": "blurry"},
        }));
        let (prompt, negative) = compose_prompt(&content(), &bundle, RenderMode::Locked);
        assert!(prompt.starts_with("Marketing poster for Kettle by Acme."));
        assert!(prompt.contains("scenario (1:1): sunlit kitchen (warm style)"));
        assert!(prompt.contains("product (4:5): steel kettle on marble"));
        assert!(!prompt.contains("gallery ("));
        assert!(prompt.contains("keep titles"));
        assert_eq!(negative.as_deref(), Some("people, blurry"));
    }

    #[test]
    fn free_mode_lists_features_instead_of_protection() {
        let bundle = normalize_prompt_bundle(&json!(null));
        let (prompt, negative) = compose_prompt(&content(), &bundle, RenderMode::Free);
        assert!(prompt.contains("Highlight: Fast boil; Quiet."));
        assert!(!prompt.contains("keep titles"));
        assert_eq!(negative, None);
    }
}
