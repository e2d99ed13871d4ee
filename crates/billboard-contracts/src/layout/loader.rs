use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use super::model::{FitPolicy, HAlign, Layout, Rect, Slot, SlotKind, VAlign};
use crate::error::{PosterError, PosterResult};

#[derive(Debug, Deserialize)]
struct RawLayoutSpec {
    size: Option<RawSize>,
    canvas_w: Option<f64>,
    canvas_h: Option<f64>,
    units: Option<String>,
    #[serde(default)]
    slots: IndexMap<String, RawSlot>,
    #[serde(default)]
    feature_callouts: Vec<RawCallout>,
}

#[derive(Debug, Deserialize)]
struct RawSize {
    width: f64,
    height: f64,
}

#[derive(Debug, Default, Deserialize)]
struct RawBox {
    x: Option<f64>,
    y: Option<f64>,
    #[serde(alias = "w")]
    width: Option<f64>,
    #[serde(alias = "h")]
    height: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSlot {
    #[serde(flatten)]
    bounds: RawBox,
    kind: Option<String>,
    guidance: Option<Value>,
    text: Option<Value>,
    align: Option<String>,
    valign: Option<String>,
    fit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCallout {
    label_box: RawBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Units {
    Pixels,
    Normalized,
}

/// Candidate spec files for a template id, in lookup order.
pub fn layout_candidates(templates_dir: &Path, template_id: &str) -> Vec<PathBuf> {
    vec![
        templates_dir.join(format!("{template_id}_layout.json")),
        templates_dir.join(format!("{template_id}.json")),
        templates_dir.join(template_id).join("layout.json"),
    ]
}

pub fn load_layout(templates_dir: &Path, template_id: &str) -> PosterResult<Layout> {
    if template_id.trim().is_empty()
        || template_id.contains(['/', '\\'])
        || template_id.contains("..")
    {
        return Err(PosterError::LayoutNotFound {
            template_id: template_id.to_string(),
        });
    }
    let Some(path) = layout_candidates(templates_dir, template_id)
        .into_iter()
        .find(|candidate| candidate.is_file())
    else {
        return Err(PosterError::LayoutNotFound {
            template_id: template_id.to_string(),
        });
    };
    let raw = std::fs::read_to_string(&path).map_err(|err| {
        PosterError::layout_invalid(template_id, format!("{}: {err}", path.display()))
    })?;
    let layout = parse_layout(template_id, &raw)?;
    tracing::debug!(
        template_id,
        path = %path.display(),
        slots = layout.slots.len(),
        callouts = layout.feature_callouts.len(),
        "layout loaded"
    );
    Ok(layout)
}

/// Parses a layout spec in either pixel or normalized coordinates.
///
/// Units come from `"units": "px" | "normalized"` when present; otherwise any
/// coordinate above 1.0 marks the whole spec as pixel-based.
pub fn parse_layout(template_id: &str, raw: &str) -> PosterResult<Layout> {
    let spec: RawLayoutSpec = serde_json::from_str(raw)
        .map_err(|err| PosterError::layout_invalid(template_id, format!("malformed spec: {err}")))?;

    let (width, height) = match (&spec.size, spec.canvas_w, spec.canvas_h) {
        (Some(size), _, _) => (size.width, size.height),
        (None, Some(w), Some(h)) => (w, h),
        _ => {
            return Err(PosterError::layout_invalid(
                template_id,
                "missing size{width,height} or canvas_w/canvas_h",
            ))
        }
    };
    let canvas_width = canvas_dimension(template_id, "width", width)?;
    let canvas_height = canvas_dimension(template_id, "height", height)?;

    let units = resolve_units(template_id, &spec)?;
    let (scale_x, scale_y) = match units {
        Units::Pixels => (canvas_width as f64, canvas_height as f64),
        Units::Normalized => (1.0, 1.0),
    };

    let mut layout = Layout::new(template_id, canvas_width, canvas_height);
    for (key, raw_slot) in &spec.slots {
        let rect = normalized_rect(template_id, key, &raw_slot.bounds, scale_x, scale_y)?;
        let has_text_guidance = raw_slot.guidance.as_ref().is_some_and(|v| !v.is_null())
            || raw_slot.text.as_ref().is_some_and(|v| !v.is_null());
        let kind = match raw_slot.kind.as_deref().map(str::trim) {
            Some("text") => SlotKind::Text,
            Some("image") => SlotKind::Image,
            _ if has_text_guidance => SlotKind::Text,
            _ => SlotKind::Image,
        };
        layout.slots.insert(
            key.clone(),
            Slot {
                key: key.clone(),
                kind,
                rect,
                align: raw_slot
                    .align
                    .as_deref()
                    .and_then(HAlign::parse)
                    .unwrap_or_default(),
                valign: raw_slot
                    .valign
                    .as_deref()
                    .and_then(VAlign::parse)
                    .unwrap_or_default(),
                fit: raw_slot.fit.as_deref().and_then(FitPolicy::parse),
            },
        );
    }
    for (idx, callout) in spec.feature_callouts.iter().enumerate() {
        let label = format!("feature_callouts[{idx}].label_box");
        layout.feature_callouts.push(normalized_rect(
            template_id,
            &label,
            &callout.label_box,
            scale_x,
            scale_y,
        )?);
    }

    layout.validate()?;
    Ok(layout)
}

fn canvas_dimension(template_id: &str, axis: &str, value: f64) -> PosterResult<u32> {
    if !value.is_finite() || value < 1.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(PosterError::layout_invalid(
            template_id,
            format!("canvas {axis} must be a positive integer, got {value}"),
        ));
    }
    Ok(value as u32)
}

fn resolve_units(template_id: &str, spec: &RawLayoutSpec) -> PosterResult<Units> {
    if let Some(units) = spec.units.as_deref() {
        return match units.trim().to_ascii_lowercase().as_str() {
            "px" | "pixels" => Ok(Units::Pixels),
            "normalized" | "relative" | "fraction" => Ok(Units::Normalized),
            other => Err(PosterError::layout_invalid(
                template_id,
                format!("unknown units '{other}'"),
            )),
        };
    }
    let boxes = spec
        .slots
        .values()
        .map(|slot| &slot.bounds)
        .chain(spec.feature_callouts.iter().map(|callout| &callout.label_box));
    let exceeds_unit = boxes
        .flat_map(|bounds| [bounds.x, bounds.y, bounds.width, bounds.height])
        .flatten()
        .any(|value| value > 1.0);
    Ok(if exceeds_unit {
        Units::Pixels
    } else {
        Units::Normalized
    })
}

fn normalized_rect(
    template_id: &str,
    key: &str,
    bounds: &RawBox,
    scale_x: f64,
    scale_y: f64,
) -> PosterResult<Rect> {
    let (Some(width), Some(height)) = (bounds.width, bounds.height) else {
        return Err(PosterError::layout_invalid(
            template_id,
            format!("slot '{key}' has an origin but no width/height"),
        ));
    };
    let rect = Rect::new(
        bounds.x.unwrap_or(0.0) / scale_x,
        bounds.y.unwrap_or(0.0) / scale_y,
        width / scale_x,
        height / scale_y,
    );
    if !rect.within_unit_square() {
        return Err(PosterError::layout_invalid(
            template_id,
            format!("slot '{key}' lies outside the canvas: {rect:?}"),
        ));
    }
    Ok(rect)
}
