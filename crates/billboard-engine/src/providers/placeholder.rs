use anyhow::Result;
use image::{DynamicImage, Rgba, RgbaImage};

use super::{GenerationRequest, ImageBackend, ImageBytes};
use crate::util::{color_from_label, encode_png};

const BORDER_PX: u32 = 4;
const TINT_WEIGHT: u16 = 96;

/// Offline backend. Produces deterministic colour fields so the pipeline can
/// run end to end without credentials.
pub struct PlaceholderBackend;

impl PlaceholderBackend {
    fn color(request: &GenerationRequest) -> [u8; 3] {
        let label = if request.label.trim().is_empty() {
            request.prompt.as_str()
        } else {
            request.label.as_str()
        };
        color_from_label(label, request.seed.unwrap_or_default() as u64)
    }
}

impl ImageBackend for PlaceholderBackend {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn generate(&self, request: &GenerationRequest) -> Result<ImageBytes> {
        let image = placeholder_image(request.width, request.height, Self::color(request));
        Ok(ImageBytes::png(encode_png(&DynamicImage::ImageRgba8(image))?))
    }

    fn edit(&self, request: &GenerationRequest) -> Result<ImageBytes> {
        let (base, mask) = request.edit_inputs()?;
        let [r, g, b] = Self::color(request);
        let mut edited = base.clone();
        for (x, y, pixel) in edited.enumerate_pixels_mut() {
            if !mask.is_editable(x, y) {
                continue;
            }
            let Rgba([pr, pg, pb, _]) = *pixel;
            *pixel = Rgba([blend(pr, r), blend(pg, g), blend(pb, b), 255]);
        }
        Ok(ImageBytes::png(encode_png(&DynamicImage::ImageRgba8(edited))?))
    }
}

/// Solid field with a dark border and a lighter band across the lower third.
fn placeholder_image(width: u32, height: u32, [r, g, b]: [u8; 3]) -> RgbaImage {
    let width = width.max(1);
    let height = height.max(1);
    let band_top = height * 2 / 3;
    let band_bottom = (band_top + height / 8).min(height);
    RgbaImage::from_fn(width, height, |x, y| {
        let on_border = x < BORDER_PX
            || y < BORDER_PX
            || x + BORDER_PX >= width
            || y + BORDER_PX >= height;
        if on_border {
            Rgba([r / 3, g / 3, b / 3, 255])
        } else if (band_top..band_bottom).contains(&y) {
            Rgba([blend(r, 255), blend(g, 255), blend(b, 255), 255])
        } else {
            Rgba([r, g, b, 255])
        }
    })
}

fn blend(base: u8, tint: u8) -> u8 {
    let mixed = (base as u16 * (256 - TINT_WEIGHT) + tint as u16 * TINT_WEIGHT) / 256;
    mixed.min(255) as u8
}

#[cfg(test)]
mod tests {
    use billboard_contracts::layout::PixelRect;
    use image::{Rgba, RgbaImage};

    use super::PlaceholderBackend;
    use crate::mask::{EditMask, EDITABLE};
    use crate::providers::{GenerationRequest, ImageBackend};

    #[test]
    fn generate_is_deterministic_and_sized() -> anyhow::Result<()> {
        let mut request = GenerationRequest::text_to_image("sunlit kitchen", 40, 30);
        request.seed = Some(7);
        let first = PlaceholderBackend.generate(&request)?;
        let second = PlaceholderBackend.generate(&request)?;
        assert_eq!(first, second);
        let decoded = first.decode()?;
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
        Ok(())
    }

    #[test]
    fn edit_only_touches_editable_pixels() -> anyhow::Result<()> {
        let base = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
        let mut mask = EditMask::all_protected(8, 8);
        mask.fill(
            PixelRect {
                x: 0,
                y: 0,
                width: 4,
                height: 8,
            },
            EDITABLE,
        );
        let mut request = GenerationRequest::text_to_image("repaint", 8, 8);
        request.base_image = Some(base.clone());
        request.mask = Some(mask);
        let edited = PlaceholderBackend.edit(&request)?.decode()?.to_rgba8();
        assert_eq!(edited.get_pixel(6, 3), base.get_pixel(6, 3));
        assert_ne!(edited.get_pixel(1, 3), base.get_pixel(1, 3));
        Ok(())
    }
}
