use std::fs;
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use billboard_contracts::content::PosterContent;
use billboard_contracts::events::EventSink;
use billboard_contracts::providers::RenderMode;
use billboard_contracts::records::{AssetPayload, VariantSlot};
use billboard_contracts::PosterError;
use billboard_engine::storage::{LocalObjectStore, ObjectStore};
use billboard_engine::{EngineConfig, Orchestrator, PosterEngine, PosterRequest};
use image::{DynamicImage, GrayImage, ImageFormat, Rgba, RgbaImage};
use serde_json::{json, Value};

const CANVAS: u32 = 64;
const BASE_COLOR: Rgba<u8> = Rgba([10, 20, 30, 255]);

fn png(image: RgbaImage) -> anyhow::Result<Vec<u8>> {
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn write_template(dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dir)?;
    RgbaImage::from_pixel(CANVAS, CANVAS, BASE_COLOR).save(dir.join("spring_base.png"))?;
    GrayImage::new(CANVAS, CANVAS).save(dir.join("spring_mask.png"))?;
    let layout = json!({
        "size": {"width": CANVAS, "height": CANVAS},
        "slots": {
            "scenario": {"x": 0.0, "y": 0.0, "width": 0.5, "height": 1.0},
            "product": {"x": 0.5, "y": 0.0, "width": 0.5, "height": 0.75},
            "title": {"x": 0.0, "y": 0.8, "width": 1.0, "height": 0.1, "text": "Spring sale"},
        },
        "feature_callouts": [
            {"label_box": {"x": 0.6, "y": 0.1, "width": 0.3, "height": 0.1}},
        ],
    });
    fs::write(dir.join("spring_layout.json"), serde_json::to_vec(&layout)?)?;
    Ok(())
}

fn content() -> anyhow::Result<PosterContent> {
    let product = png(RgbaImage::from_pixel(8, 10, Rgba([220, 30, 30, 255])))?;
    Ok(PosterContent {
        brand_name: "Acme".to_string(),
        product_name: "Kettle".to_string(),
        title: "Spring sale".to_string(),
        features: vec![
            "Boils in 90s".to_string(),
            "Whisper quiet".to_string(),
            "Auto shut-off".to_string(),
        ],
        product_image: Some(format!("data:image/png;base64,{}", BASE64.encode(product))),
        ..PosterContent::default()
    })
}

fn config(root: &Path) -> EngineConfig {
    EngineConfig {
        templates_dir: root.join("templates"),
        variants_dir: root.join("variants"),
        ..EngineConfig::default()
    }
}

fn event_types(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = fs::read_to_string(path)?;
    let mut out = Vec::new();
    for line in raw.lines() {
        let parsed: Value = serde_json::from_str(line)?;
        out.push(parsed["type"].as_str().unwrap_or_default().to_string());
    }
    Ok(out)
}

#[test]
fn locked_posters_keep_protected_pixels_from_the_frame() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    write_template(&temp.path().join("templates"))?;
    let events_path = temp.path().join("events.jsonl");
    let events = EventSink::new(&events_path, "run-1");
    let engine = PosterEngine::from_config(config(temp.path()), events)?;

    let mut request = PosterRequest::new("spring", content()?);
    request.desired_count = 2;
    request.seed = Some(11);
    request.prompts = json!({"scenario": "sunlit kitchen", "product": {"negative": "clutter"}});
    let assets = engine.generate_posters(&request)?;
    assert_eq!(assets.len(), 2);
    assert_ne!(assets[0].id, assets[1].id);
    let frame = engine.render_frame("spring", &request.content, true)?;

    for asset in &assets {
        assert_eq!((asset.width, asset.height), (CANVAS, CANVAS));
        assert_eq!(asset.media_type, "image/png");
        let AssetPayload::Inline(bytes) = &asset.payload else {
            panic!("expected inline payload without an object store");
        };
        let poster = image::load_from_memory(bytes)?.to_rgba8();
        // title band and callout label keep the locked frame
        assert_eq!(*poster.get_pixel(32, 54), BASE_COLOR);
        assert_eq!(poster.get_pixel(48, 9), frame.get_pixel(48, 9));
        // scenario was repainted
        assert_ne!(*poster.get_pixel(16, 20), BASE_COLOR);
    }

    let types = event_types(&events_path)?;
    for expected in [
        "template_loaded",
        "frame_rendered",
        "mask_built",
        "placeholder_used",
        "poster_generated",
    ] {
        assert!(types.iter().any(|item| item == expected), "missing {expected} event");
    }
    Ok(())
}

#[test]
fn free_mode_generates_canvas_sized_images() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    write_template(&temp.path().join("templates"))?;
    let engine = PosterEngine::from_config(config(temp.path()), EventSink::disabled("run-2"))?;

    let mut request = PosterRequest::new("spring", content()?);
    request.mode = RenderMode::Free;
    let assets = engine.generate_posters(&request)?;
    assert_eq!(assets.len(), 1);
    assert_eq!((assets[0].width, assets[0].height), (CANVAS, CANVAS));
    Ok(())
}

#[test]
fn stored_variants_are_reused_round_robin() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    write_template(&temp.path().join("templates"))?;
    let events_path = temp.path().join("events.jsonl");
    let events = EventSink::new(&events_path, "run-3");
    let engine = PosterEngine::from_config(config(temp.path()), events)?;
    engine.upload_variant(VariantSlot::A, "a.png", "image/png", &png(RgbaImage::new(6, 6))?)?;
    engine.upload_variant(VariantSlot::B, "b.png", "image/png", &png(RgbaImage::new(7, 7))?)?;

    let mut request = PosterRequest::new("spring", content()?);
    request.desired_count = 3;
    let assets = engine.generate_posters(&request)?;
    let names: Vec<&str> = assets.iter().map(|asset| asset.filename.as_str()).collect();
    assert_eq!(names, vec!["a.png", "b.png", "a.png"]);
    assert_ne!(assets[0].id, assets[2].id);

    let types = event_types(&events_path)?;
    assert_eq!(types, vec!["variant_uploaded", "variant_uploaded", "variants_reused"]);
    Ok(())
}

#[test]
fn posters_go_to_object_store_when_configured() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    write_template(&temp.path().join("templates"))?;
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
        temp.path().join("bucket"),
        Some("https://cdn.test".to_string()),
    ));
    let config = config(temp.path());
    let orchestrator = Orchestrator::from_config(&config)?;
    let events = EventSink::disabled("run-4");
    let engine = PosterEngine::new(config, Some(store.clone()), orchestrator, events)?;

    let assets = engine.generate_posters(&PosterRequest::new("spring", content()?))?;
    let AssetPayload::PublicUrl(url) = &assets[0].payload else {
        panic!("expected a public url");
    };
    let key = url.trim_start_matches("https://cdn.test/");
    assert!(key.starts_with("posters/spring/"));
    assert!(!store.get_bytes(key)?.is_empty());
    Ok(())
}

#[test]
fn missing_providers_without_placeholder_is_exhaustion() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    write_template(&temp.path().join("templates"))?;
    let config = EngineConfig {
        allow_placeholder: false,
        ..config(temp.path())
    };
    let engine = PosterEngine::from_config(config, EventSink::disabled("run-5"))?;
    let err = engine.generate_posters(&PosterRequest::new("spring", content()?)).err();
    assert!(matches!(err, Some(PosterError::AllProvidersExhausted { .. })));
    Ok(())
}

#[test]
fn invalid_content_is_rejected_before_rendering() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let engine = PosterEngine::from_config(config(temp.path()), EventSink::disabled("run-6"))?;
    let mut content = content()?;
    content.features.truncate(2);
    let err = engine.generate_posters(&PosterRequest::new("spring", content)).err();
    assert!(matches!(err, Some(PosterError::InvalidContent { .. })));
    Ok(())
}
