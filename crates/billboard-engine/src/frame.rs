use std::collections::BTreeMap;

use billboard_contracts::content::PosterContent;
use billboard_contracts::layout::{FitPolicy, HAlign, Layout, PixelRect, Slot, VAlign};
use billboard_contracts::{PosterError, PosterResult};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};

use crate::mask::GALLERY_SLOT_KEYS;
use crate::storage::{fetch_asset_image, ObjectStore};
use crate::templates::TemplateResources;
use crate::util::color_from_label;

const BLANK: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Pastes request imagery onto a template, producing the locked frame.
///
/// Text slots are left alone: titles, callouts and names are the template's
/// pre-baked chrome.
pub struct FrameRenderer<'a> {
    store: Option<&'a dyn ObjectStore>,
    fit_overrides: &'a BTreeMap<String, FitPolicy>,
    substitute_missing_assets: bool,
}

impl<'a> FrameRenderer<'a> {
    pub fn new(
        store: Option<&'a dyn ObjectStore>,
        fit_overrides: &'a BTreeMap<String, FitPolicy>,
        substitute_missing_assets: bool,
    ) -> Self {
        Self {
            store,
            fit_overrides,
            substitute_missing_assets,
        }
    }

    pub fn render_locked_frame(
        &self,
        content: &PosterContent,
        layout: &Layout,
        template: &TemplateResources,
        fill_background: bool,
    ) -> PosterResult<RgbaImage> {
        let (width, height) = (layout.canvas_width, layout.canvas_height);
        if template.dimensions() != (width, height) {
            return Err(PosterError::layout_invalid(
                &layout.template_id,
                format!(
                    "template '{}' is {}x{} but layout canvas is {width}x{height}",
                    template.id,
                    template.base.width(),
                    template.base.height()
                ),
            ));
        }
        let mut frame = if fill_background {
            template.base.clone()
        } else {
            RgbaImage::from_pixel(width, height, BLANK)
        };

        for slot in layout.image_slots() {
            let rect = layout.pixel_rect(&slot.rect);
            if rect.is_empty() {
                continue;
            }
            if GALLERY_SLOT_KEYS.contains(&slot.key.as_str()) {
                self.paste_gallery(&mut frame, slot, rect, &content.gallery_images)?;
                continue;
            }
            let Some(reference) = content.image_for_slot(&slot.key) else {
                continue;
            };
            let source = self.fetch(slot, reference)?;
            let fitted = fit_into(
                &source,
                rect.width,
                rect.height,
                self.fit_for(slot),
                slot.align,
                slot.valign,
            );
            imageops::overlay(&mut frame, &fitted, rect.x as i64, rect.y as i64);
        }

        Ok(frame)
    }

    fn fit_for(&self, slot: &Slot) -> FitPolicy {
        self.fit_overrides
            .get(&slot.key)
            .copied()
            .or(slot.fit)
            .unwrap_or_default()
    }

    fn paste_gallery(
        &self,
        frame: &mut RgbaImage,
        slot: &Slot,
        rect: PixelRect,
        references: &[String],
    ) -> PosterResult<()> {
        let count = references.len() as u32;
        if count == 0 {
            return Ok(());
        }
        let tile_width = (rect.width / count).max(1);
        for (idx, reference) in references.iter().enumerate() {
            let idx = idx as u32;
            let x = rect.x + idx * tile_width;
            if x >= rect.x + rect.width {
                break;
            }
            let width = if idx + 1 == count {
                rect.x + rect.width - x
            } else {
                tile_width
            };
            let source = self.fetch(slot, reference)?;
            let fitted = fit_into(
                &source,
                width,
                rect.height,
                self.fit_for(slot),
                HAlign::Center,
                slot.valign,
            );
            imageops::overlay(frame, &fitted, x as i64, rect.y as i64);
        }
        Ok(())
    }

    fn fetch(&self, slot: &Slot, reference: &str) -> PosterResult<DynamicImage> {
        match fetch_asset_image(self.store, reference) {
            Ok(image) => Ok(image),
            Err(err) if self.substitute_missing_assets => {
                tracing::warn!(
                    slot = %slot.key,
                    error = %err,
                    "substituting placeholder for slot asset"
                );
                let [r, g, b] = color_from_label(&slot.key, 0);
                Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                    16,
                    16,
                    Rgba([r, g, b, 255]),
                )))
            }
            Err(err) => Err(err),
        }
    }
}

/// Scales `source` into exactly `width` x `height`.
///
/// `Cover` crops the overflow, keeping the part selected by the alignment;
/// `Contain` leaves transparent bars positioned by the alignment.
pub fn fit_into(
    source: &DynamicImage,
    width: u32,
    height: u32,
    fit: FitPolicy,
    align: HAlign,
    valign: VAlign,
) -> RgbaImage {
    let (src_w, src_h) = (source.width().max(1) as f64, source.height().max(1) as f64);
    let scale_x = width as f64 / src_w;
    let scale_y = height as f64 / src_h;
    let scale = match fit {
        FitPolicy::Cover => scale_x.max(scale_y),
        FitPolicy::Contain => scale_x.min(scale_y),
    };
    let scaled_w = ((src_w * scale).round() as u32).max(1);
    let scaled_h = ((src_h * scale).round() as u32).max(1);
    let scaled = source
        .resize_exact(scaled_w, scaled_h, FilterType::CatmullRom)
        .to_rgba8();

    match fit {
        FitPolicy::Cover => {
            let scaled_w = scaled_w.max(width);
            let scaled_h = scaled_h.max(height);
            let x = anchor_offset(scaled_w - width, align_fraction(align));
            let y = anchor_offset(scaled_h - height, valign_fraction(valign));
            let mut out = RgbaImage::new(width, height);
            imageops::replace(&mut out, &scaled, -(x as i64), -(y as i64));
            out
        }
        FitPolicy::Contain => {
            let mut out = RgbaImage::new(width, height);
            let x = anchor_offset(width.saturating_sub(scaled_w), align_fraction(align));
            let y = anchor_offset(height.saturating_sub(scaled_h), valign_fraction(valign));
            imageops::replace(&mut out, &scaled, x as i64, y as i64);
            out
        }
    }
}

fn anchor_offset(slack: u32, fraction: f64) -> u32 {
    (slack as f64 * fraction).round() as u32
}

fn align_fraction(align: HAlign) -> f64 {
    match align {
        HAlign::Left => 0.0,
        HAlign::Center => 0.5,
        HAlign::Right => 1.0,
    }
}

fn valign_fraction(valign: VAlign) -> f64 {
    match valign {
        VAlign::Top => 0.0,
        VAlign::Middle => 0.5,
        VAlign::Bottom => 1.0,
    }
}
