use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, Rgba, RgbaImage};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use super::{GenerationRequest, ImageBackend, ImageBytes};
use crate::config::BackendCredentials;
use crate::mask::{EditMask, EDITABLE};
use crate::util::{encode_png, truncate_text};

const SUPPORTED_SIZES: [(u32, u32); 3] = [(1024, 1024), (1536, 1024), (1024, 1536)];

/// `/images/generations` + `/images/edits` speaking backends.
///
/// The edits endpoint repaints fully transparent mask pixels, so the
/// canonical mask is translated to an RGBA image with alpha 0 where editable.
pub struct OpenAiCompatibleBackend {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http: HttpClient,
}

impl OpenAiCompatibleBackend {
    pub fn new(credentials: &BackendCredentials, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_base: credentials.api_base.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            model: credentials.model.clone(),
            http: HttpClient::builder()
                .timeout(timeout)
                .build()
                .context("failed to build OpenAI HTTP client")?,
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .context("OPENAI_API_KEY not set")
    }

    fn first_image(&self, response_payload: &Value) -> Result<ImageBytes> {
        let rows = response_payload
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in rows {
            let Some(obj) = row.as_object() else {
                continue;
            };
            if let Some(b64) = obj.get("b64_json").and_then(Value::as_str) {
                let bytes = BASE64
                    .decode(b64.as_bytes())
                    .context("OpenAI image base64 decode failed")?;
                return Ok(ImageBytes {
                    bytes,
                    mime_type: None,
                });
            }
            if let Some(url) = obj.get("url").and_then(Value::as_str) {
                return self.download_image(url);
            }
        }
        bail!("OpenAI response returned no images")
    }

    fn download_image(&self, url: &str) -> Result<ImageBytes> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("failed downloading provider image ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "provider image download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .context("failed reading provider image bytes")?
            .to_vec();
        Ok(ImageBytes { bytes, mime_type })
    }
}

impl ImageBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn generate(&self, request: &GenerationRequest) -> Result<ImageBytes> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = json!({
            "model": self.model,
            "prompt": request.prompt_with_negative(),
            "n": 1,
            "size": nearest_size(request.width, request.height),
        });
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        let parsed = response_json_or_error("OpenAI generations", response)?;
        self.first_image(&parsed)
    }

    fn edit(&self, request: &GenerationRequest) -> Result<ImageBytes> {
        let api_key = self.api_key()?;
        let (base, mask) = request.edit_inputs()?;
        let endpoint = format!("{}/images/edits", self.api_base);
        let base_png = encode_png(&DynamicImage::ImageRgba8(base.clone()))?;
        let mask_png = encode_png(&DynamicImage::ImageRgba8(alpha_mask(mask)))?;
        let form = MultipartForm::new()
            .text("model", self.model.clone())
            .text("prompt", request.prompt_with_negative())
            .text("n", "1")
            .text("size", nearest_size(request.width, request.height))
            .part(
                "image",
                MultipartPart::bytes(base_png)
                    .file_name("frame.png")
                    .mime_str("image/png")?,
            )
            .part(
                "mask",
                MultipartPart::bytes(mask_png)
                    .file_name("mask.png")
                    .mime_str("image/png")?,
            );
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .context("OpenAI edits request failed")?;
        let parsed = response_json_or_error("OpenAI edits", response)?;
        self.first_image(&parsed)
    }
}

/// Editable pixels become fully transparent, protected ones opaque black.
pub(crate) fn alpha_mask(mask: &EditMask) -> RgbaImage {
    let gray = mask.as_gray();
    RgbaImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y).0[0] == EDITABLE {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

fn nearest_size(width: u32, height: u32) -> String {
    let ratio = width.max(1) as f64 / height.max(1) as f64;
    let (w, h) = SUPPORTED_SIZES
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = (a.0 as f64 / a.1 as f64 - ratio).abs();
            let db = (b.0 as f64 / b.1 as f64 - ratio).abs();
            da.total_cmp(&db)
        })
        .unwrap_or((1024, 1024));
    format!("{w}x{h}")
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    serde_json::from_str(&body).with_context(|| format!("{provider} returned invalid JSON payload"))
}

#[cfg(test)]
mod tests {
    use billboard_contracts::layout::PixelRect;

    use super::{alpha_mask, nearest_size};
    use crate::mask::{EditMask, EDITABLE};

    #[test]
    fn alpha_mask_inverts_into_transparency() {
        let mut mask = EditMask::all_protected(4, 4);
        mask.fill(
            PixelRect {
                x: 0,
                y: 0,
                width: 2,
                height: 4,
            },
            EDITABLE,
        );
        let translated = alpha_mask(&mask);
        assert_eq!(translated.get_pixel(1, 1)[3], 0);
        assert_eq!(translated.get_pixel(3, 1)[3], 255);
    }

    #[test]
    fn size_snaps_by_orientation() {
        assert_eq!(nearest_size(1024, 1024), "1024x1024");
        assert_eq!(nearest_size(1200, 800), "1536x1024");
        assert_eq!(nearest_size(800, 1000), "1024x1536");
    }
}
