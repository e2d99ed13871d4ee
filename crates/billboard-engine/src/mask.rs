//! Edit mask construction.
//!
//! Canonical polarity across the engine: `EDITABLE` (255) marks pixels a
//! backend may repaint, `PROTECTED` (0) marks pixels that must come back
//! unchanged. Adapters translate to their backend's convention.

use billboard_contracts::layout::{Layout, PixelRect, SlotKind};
use billboard_contracts::{PosterError, PosterResult};
use image::{GrayImage, Luma, RgbaImage};

use crate::templates::TemplateResources;

pub const EDITABLE: u8 = 255;
pub const PROTECTED: u8 = 0;

pub const REQUIRED_EDITABLE_SLOTS: [&str; 2] = ["scenario", "product"];
pub const GALLERY_SLOT_KEYS: [&str; 2] = ["gallery_strip", "gallery"];

/// Slot keys that are template chrome even when declared as image slots.
pub const PROTECTED_SLOT_KEYS: [&str; 9] = [
    "title",
    "subtitle",
    "series",
    "agent_name",
    "agent",
    "brand_name",
    "brand",
    "logo",
    "brand_logo",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditMask {
    image: GrayImage,
}

impl EditMask {
    pub fn all_protected(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::from_pixel(width, height, Luma([PROTECTED])),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_editable(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y).0[0] == EDITABLE
    }

    pub fn editable_count(&self) -> u64 {
        self.image.pixels().filter(|pixel| pixel.0[0] == EDITABLE).count() as u64
    }

    pub fn protected_count(&self) -> u64 {
        self.image.as_raw().len() as u64 - self.editable_count()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.image
    }

    pub fn fill(&mut self, rect: PixelRect, value: u8) {
        let (width, height) = self.image.dimensions();
        let x_end = rect.x.saturating_add(rect.width).min(width);
        let y_end = rect.y.saturating_add(rect.height).min(height);
        for y in rect.y.min(height)..y_end {
            for x in rect.x.min(width)..x_end {
                self.image.put_pixel(x, y, Luma([value]));
            }
        }
    }

    /// Copies every protected pixel of `frame` over `edited`, so the result
    /// matches the locked frame outside the editable area.
    pub fn restore_protected(&self, frame: &RgbaImage, edited: &mut RgbaImage) {
        for (x, y, pixel) in self.image.enumerate_pixels() {
            if pixel.0[0] != EDITABLE {
                edited.put_pixel(x, y, *frame.get_pixel(x, y));
            }
        }
    }
}

pub fn build_edit_mask(layout: &Layout, template: &TemplateResources) -> PosterResult<EditMask> {
    let canvas = (layout.canvas_width, layout.canvas_height);
    if template.dimensions() != canvas {
        return Err(PosterError::layout_invalid(
            &layout.template_id,
            format!(
                "template '{}' is {}x{} but layout canvas is {}x{}",
                template.id,
                template.base.width(),
                template.base.height(),
                canvas.0,
                canvas.1
            ),
        ));
    }

    let mut mask = EditMask::all_protected(canvas.0, canvas.1);

    for key in REQUIRED_EDITABLE_SLOTS {
        let slot = layout.slot(key).ok_or_else(|| PosterError::MaskBuild {
            template_id: layout.template_id.clone(),
            slot: key.to_string(),
        })?;
        let rect = layout.pixel_rect(&slot.rect);
        match (key, template.scene.as_ref()) {
            ("scenario", Some(scene)) => mark_where(&mut mask, rect, scene),
            _ => mask.fill(rect, EDITABLE),
        }
    }
    if let Some(gallery) = layout.first_slot(&GALLERY_SLOT_KEYS) {
        mask.fill(layout.pixel_rect(&gallery.rect), EDITABLE);
    }

    // Protection goes last so it wins every overlap.
    for (x, y, pixel) in template.protection.enumerate_pixels() {
        if pixel.0[0] != 0 {
            mask.image.put_pixel(x, y, Luma([PROTECTED]));
        }
    }
    for slot in layout.slots.values() {
        if is_protected_slot(&slot.key, slot.kind) {
            mask.fill(layout.pixel_rect(&slot.rect), PROTECTED);
        }
    }
    for label_box in &layout.feature_callouts {
        mask.fill(layout.pixel_rect(label_box), PROTECTED);
    }

    Ok(mask)
}

/// Chrome keys always protect. Other text slots protect unless they are one of
/// the editable regions, which may carry guidance and still load as text.
fn is_protected_slot(key: &str, kind: SlotKind) -> bool {
    if PROTECTED_SLOT_KEYS.contains(&key) {
        return true;
    }
    kind == SlotKind::Text
        && !REQUIRED_EDITABLE_SLOTS.contains(&key)
        && !GALLERY_SLOT_KEYS.contains(&key)
}

fn mark_where(mask: &mut EditMask, rect: PixelRect, scene: &GrayImage) {
    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            if scene.get_pixel(x, y).0[0] != 0 {
                mask.image.put_pixel(x, y, Luma([EDITABLE]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use billboard_contracts::layout::{parse_layout, Layout, Rect, Slot, SlotKind};
    use billboard_contracts::PosterError;
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    use super::{build_edit_mask, EditMask, EDITABLE};
    use crate::templates::TemplateResources;

    fn template(size: u32) -> TemplateResources {
        TemplateResources {
            id: "t".to_string(),
            base: RgbaImage::from_pixel(size, size, Rgba([255, 255, 255, 255])),
            protection: GrayImage::new(size, size),
            scene: None,
        }
    }

    fn base_layout() -> Layout {
        Layout::new("t", 200, 200)
            .with_slot(Slot::image("scenario", Rect::new(0.0, 0.0, 0.5, 1.0)))
            .with_slot(Slot::image("product", Rect::new(0.5, 0.0, 0.5, 0.8)))
            .with_slot(Slot::image("gallery", Rect::new(0.5, 0.8, 0.5, 0.2)))
            .with_slot(Slot::image("title", Rect::new(0.0, 0.0, 1.0, 0.1)))
    }

    fn is_editable_at(mask: &EditMask, layout: &Layout, rect: &Rect) -> bool {
        let (x, y) = rect.center_pixel(layout.canvas_width, layout.canvas_height);
        mask.is_editable(x, y)
    }

    #[test]
    fn callout_inside_product_stays_protected() -> anyhow::Result<()> {
        let callout = Rect::new(0.6, 0.3, 0.2, 0.1);
        let layout = base_layout().with_callout(callout);
        let mask = build_edit_mask(&layout, &template(200))?;
        assert!(!is_editable_at(&mask, &layout, &callout));
        assert!(is_editable_at(&mask, &layout, &Rect::new(0.5, 0.5, 0.5, 0.3)));
        assert!(is_editable_at(&mask, &layout, &Rect::new(0.5, 0.8, 0.5, 0.2)));
        Ok(())
    }

    #[test]
    fn protected_area_grows_with_callouts() -> anyhow::Result<()> {
        let callouts = [
            Rect::new(0.55, 0.15, 0.2, 0.08),
            Rect::new(0.55, 0.3, 0.2, 0.08),
            Rect::new(0.7, 0.45, 0.25, 0.08),
            Rect::new(0.6, 0.6, 0.2, 0.08),
        ];
        let mut layout = base_layout();
        let mut previous = build_edit_mask(&layout, &template(200))?.protected_count();
        for callout in callouts {
            layout = layout.with_callout(callout);
            let current = build_edit_mask(&layout, &template(200))?.protected_count();
            assert!(current >= previous);
            previous = current;
        }
        Ok(())
    }

    #[test]
    fn missing_required_slot_fails() {
        let layout = Layout::new("t", 200, 200)
            .with_slot(Slot::image("scenario", Rect::new(0.0, 0.0, 0.5, 1.0)));
        let err = build_edit_mask(&layout, &template(200)).err();
        assert!(matches!(err, Some(PosterError::MaskBuild { slot, .. }) if slot == "product"));
    }

    #[test]
    fn template_protection_overrides_editable_slots() -> anyhow::Result<()> {
        let mut resources = template(200);
        resources.protection.put_pixel(150, 100, Luma([255]));
        let mask = build_edit_mask(&base_layout(), &resources)?;
        assert!(!mask.is_editable(150, 100));
        assert!(mask.is_editable(151, 100));
        Ok(())
    }

    #[test]
    fn scene_mask_limits_scenario_edits() -> anyhow::Result<()> {
        let mut resources = template(200);
        let mut scene = GrayImage::new(200, 200);
        scene.put_pixel(10, 150, Luma([EDITABLE]));
        resources.scene = Some(scene);
        let mask = build_edit_mask(&base_layout(), &resources)?;
        assert!(mask.is_editable(10, 150));
        assert!(!mask.is_editable(50, 150));
        Ok(())
    }

    #[test]
    fn restore_protected_copies_frame_pixels() -> anyhow::Result<()> {
        let layout = base_layout();
        let mask = build_edit_mask(&layout, &template(200))?;
        let frame = RgbaImage::from_pixel(200, 200, Rgba([1, 2, 3, 255]));
        let mut edited = RgbaImage::from_pixel(200, 200, Rgba([9, 9, 9, 255]));
        mask.restore_protected(&frame, &mut edited);
        assert_eq!(edited.get_pixel(100, 5), &Rgba([1, 2, 3, 255]));
        assert_eq!(edited.get_pixel(50, 100), &Rgba([9, 9, 9, 255]));
        Ok(())
    }

    #[test]
    fn guided_editable_slots_stay_editable() -> anyhow::Result<()> {
        let raw = r#"{
            "size": {"width": 200, "height": 200},
            "slots": {
                "scenario": {"x": 0.0, "y": 0.0, "w": 0.5, "h": 1.0, "guidance": "sunlit interior"},
                "product": {"x": 0.5, "y": 0.0, "w": 0.5, "h": 0.8, "guidance": "hero shot"},
                "gallery": {"x": 0.5, "y": 0.8, "w": 0.5, "h": 0.2, "guidance": "thumbnails"},
                "headline": {"x": 0.0, "y": 0.0, "w": 1.0, "h": 0.1, "text": "Spring"}
            }
        }"#;
        let layout = parse_layout("t", raw)?;
        let mask = build_edit_mask(&layout, &template(200))?;
        for key in ["scenario", "product", "gallery"] {
            let slot = layout.slot(key).ok_or_else(|| anyhow::anyhow!("{key} missing"))?;
            assert_eq!(slot.kind, SlotKind::Text);
        }
        assert!(mask.is_editable(50, 150));
        assert!(mask.is_editable(150, 100));
        assert!(mask.is_editable(150, 180));
        assert!(!mask.is_editable(50, 10));
        Ok(())
    }

    #[test]
    fn text_slot_over_editable_region_wins() -> anyhow::Result<()> {
        let layout = base_layout().with_slot(Slot::text("tagline", Rect::new(0.5, 0.4, 0.5, 0.1)));
        let mask = build_edit_mask(&layout, &template(200))?;
        assert!(!mask.is_editable(150, 90));
        assert!(mask.is_editable(150, 130));
        Ok(())
    }

    #[test]
    fn mismatched_canvas_is_rejected() {
        assert!(build_edit_mask(&base_layout(), &template(100)).is_err());
    }
}
