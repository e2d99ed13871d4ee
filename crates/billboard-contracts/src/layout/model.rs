use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{PosterError, PosterResult};

const BOUNDS_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Text,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HAlign {
    Left,
    #[default]
    Center,
    Right,
}

impl HAlign {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" | "start" => Some(Self::Left),
            "center" | "centre" | "middle" => Some(Self::Center),
            "right" | "end" => Some(Self::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    Top,
    #[default]
    Middle,
    Bottom,
}

impl VAlign {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "top" | "start" => Some(Self::Top),
            "middle" | "center" | "centre" => Some(Self::Middle),
            "bottom" | "end" => Some(Self::Bottom),
            _ => None,
        }
    }
}

/// How a pasted image is fitted into its slot rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitPolicy {
    /// Scale to fill, cropping the overflow (anchored by the slot alignment).
    #[default]
    Cover,
    /// Scale to fit entirely, padding the remainder.
    Contain,
}

impl FitPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cover" | "crop" | "fill" => Some(Self::Cover),
            "contain" | "letterbox" | "fit" => Some(Self::Contain),
            _ => None,
        }
    }
}

/// Normalized rectangle, all components in canvas fractions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn within_unit_square(&self) -> bool {
        let finite = [self.x, self.y, self.w, self.h]
            .iter()
            .all(|value| value.is_finite());
        finite
            && self.x >= -BOUNDS_EPSILON
            && self.y >= -BOUNDS_EPSILON
            && self.w > 0.0
            && self.h > 0.0
            && self.x + self.w <= 1.0 + BOUNDS_EPSILON
            && self.y + self.h <= 1.0 + BOUNDS_EPSILON
    }

    /// Pixel rectangle on a `canvas_w` x `canvas_h` canvas. Edges are rounded
    /// independently so adjacent slots tile without gaps.
    pub fn to_pixels(&self, canvas_w: u32, canvas_h: u32) -> PixelRect {
        let edge = |value: f64, extent: u32| -> u32 {
            (value * extent as f64).round().clamp(0.0, extent as f64) as u32
        };
        let x0 = edge(self.x, canvas_w);
        let y0 = edge(self.y, canvas_h);
        let x1 = edge(self.x + self.w, canvas_w).max(x0);
        let y1 = edge(self.y + self.h, canvas_h).max(y0);
        PixelRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    /// Pixel holding the rectangle's center point.
    pub fn center_pixel(&self, canvas_w: u32, canvas_h: u32) -> (u32, u32) {
        let (cx, cy) = self.center();
        let px = ((cx * canvas_w as f64).floor() as u32).min(canvas_w.saturating_sub(1));
        let py = ((cy * canvas_h as f64).floor() as u32).min(canvas_h.saturating_sub(1));
        (px, py)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && py >= self.y && px < self.x + self.width && py < self.y + self.height
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub key: String,
    pub kind: SlotKind,
    pub rect: Rect,
    #[serde(default)]
    pub align: HAlign,
    #[serde(default)]
    pub valign: VAlign,
    pub fit: Option<FitPolicy>,
}

impl Slot {
    pub fn image(key: impl Into<String>, rect: Rect) -> Self {
        Self {
            key: key.into(),
            kind: SlotKind::Image,
            rect,
            align: HAlign::default(),
            valign: VAlign::default(),
            fit: None,
        }
    }

    pub fn text(key: impl Into<String>, rect: Rect) -> Self {
        Self {
            kind: SlotKind::Text,
            ..Self::image(key, rect)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub template_id: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub slots: IndexMap<String, Slot>,
    /// Label boxes of the feature callouts drawn over the product area.
    #[serde(default)]
    pub feature_callouts: Vec<Rect>,
}

impl Layout {
    pub fn new(template_id: impl Into<String>, canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            template_id: template_id.into(),
            canvas_width,
            canvas_height,
            slots: IndexMap::new(),
            feature_callouts: Vec::new(),
        }
    }

    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slots.insert(slot.key.clone(), slot);
        self
    }

    pub fn with_callout(mut self, label_box: Rect) -> Self {
        self.feature_callouts.push(label_box);
        self
    }

    pub fn slot(&self, key: &str) -> Option<&Slot> {
        self.slots.get(key)
    }

    /// First slot present among `keys`, in the order given.
    pub fn first_slot(&self, keys: &[&str]) -> Option<&Slot> {
        keys.iter().find_map(|key| self.slots.get(*key))
    }

    pub fn pixel_rect(&self, rect: &Rect) -> PixelRect {
        rect.to_pixels(self.canvas_width, self.canvas_height)
    }

    pub fn image_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots
            .values()
            .filter(|slot| slot.kind == SlotKind::Image)
    }

    pub fn validate(&self) -> PosterResult<()> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(PosterError::layout_invalid(
                &self.template_id,
                format!(
                    "canvas must be positive, got {}x{}",
                    self.canvas_width, self.canvas_height
                ),
            ));
        }
        for slot in self.slots.values() {
            if !slot.rect.within_unit_square() {
                return Err(PosterError::layout_invalid(
                    &self.template_id,
                    format!("slot '{}' lies outside the canvas: {:?}", slot.key, slot.rect),
                ));
            }
        }
        for (idx, label_box) in self.feature_callouts.iter().enumerate() {
            if !label_box.within_unit_square() {
                return Err(PosterError::layout_invalid(
                    &self.template_id,
                    format!("feature callout {idx} lies outside the canvas: {label_box:?}"),
                ));
            }
        }
        Ok(())
    }
}
