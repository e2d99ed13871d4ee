use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::DynamicImage;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::{GenerationRequest, ImageBackend, ImageBytes};
use crate::config::BackendCredentials;
use crate::util::{encode_png, truncate_text};

const ASPECT_CANDIDATES: [(&str, f64); 5] = [
    ("1:1", 1.0),
    ("3:4", 3.0 / 4.0),
    ("4:3", 4.0 / 3.0),
    ("9:16", 9.0 / 16.0),
    ("16:9", 16.0 / 9.0),
];

/// Imagen on Vertex AI via the `:predict` endpoint.
///
/// Masks are sent as-is: Vertex treats white as the area to repaint, which is
/// already the engine's canonical polarity.
pub struct VertexBackend {
    api_base: String,
    api_key: Option<String>,
    model: String,
    project: Option<String>,
    location: String,
    http: HttpClient,
}

impl VertexBackend {
    pub fn new(
        credentials: &BackendCredentials,
        project: Option<String>,
        location: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            api_base: credentials.api_base.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            model: credentials.model.clone(),
            project,
            location: location.to_string(),
            http: HttpClient::builder()
                .timeout(timeout)
                .build()
                .context("failed to build Vertex HTTP client")?,
        })
    }

    fn endpoint(&self, project: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:predict",
            self.api_base, project, self.location, self.model
        )
    }

    fn parameters(request: &GenerationRequest) -> Map<String, Value> {
        let mut parameters = Map::new();
        parameters.insert("sampleCount".to_string(), json!(1));
        if let Some(negative) = request.negative_prompt.as_deref() {
            parameters.insert("negativePrompt".to_string(), json!(negative));
        }
        if let Some(seed) = request.seed {
            // Vertex rejects seeds while watermarking is on.
            parameters.insert("seed".to_string(), json!(seed));
            parameters.insert("addWatermark".to_string(), json!(false));
        }
        parameters
    }

    fn predict(&self, payload: &Value) -> Result<ImageBytes> {
        let (Some(api_key), Some(project)) = (self.api_key.as_deref(), self.project.as_deref())
        else {
            bail!("VERTEX_API_KEY and VERTEX_PROJECT must both be set");
        };
        let endpoint = self.endpoint(project);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(payload)
            .send()
            .with_context(|| format!("Vertex request failed ({endpoint})"))?;
        let status = response.status();
        let body = response
            .text()
            .context("Vertex response body read failed")?;
        if !status.is_success() {
            bail!(
                "Vertex request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }
        let parsed: Value =
            serde_json::from_str(&body).context("Vertex returned invalid JSON payload")?;
        extract_prediction(&parsed)?.context("Vertex returned no images")
    }
}

impl ImageBackend for VertexBackend {
    fn name(&self) -> &str {
        "vertex"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.project.is_some()
    }

    fn generate(&self, request: &GenerationRequest) -> Result<ImageBytes> {
        let mut parameters = Self::parameters(request);
        parameters.insert(
            "aspectRatio".to_string(),
            json!(nearest_aspect(request.width, request.height)),
        );
        let payload = json!({
            "instances": [{"prompt": request.prompt}],
            "parameters": parameters,
        });
        self.predict(&payload).context("Vertex generate failed")
    }

    fn edit(&self, request: &GenerationRequest) -> Result<ImageBytes> {
        let (base, mask) = request.edit_inputs()?;
        let base_png = encode_png(&DynamicImage::ImageRgba8(base.clone()))?;
        let mask_png = encode_png(&DynamicImage::ImageLuma8(mask.as_gray().clone()))?;
        let mut parameters = Self::parameters(request);
        parameters.insert("editMode".to_string(), json!("EDIT_MODE_INPAINT_INSERTION"));
        let payload = json!({
            "instances": [{
                "prompt": request.prompt,
                "referenceImages": [
                    {
                        "referenceType": "REFERENCE_TYPE_RAW",
                        "referenceId": 1,
                        "referenceImage": {"bytesBase64Encoded": BASE64.encode(base_png)},
                    },
                    {
                        "referenceType": "REFERENCE_TYPE_MASK",
                        "referenceId": 2,
                        "referenceImage": {"bytesBase64Encoded": BASE64.encode(mask_png)},
                        "maskImageConfig": {"maskMode": "MASK_MODE_USER_PROVIDED", "dilation": 0.0},
                    },
                ],
            }],
            "parameters": parameters,
        });
        self.predict(&payload).context("Vertex edit failed")
    }
}

fn nearest_aspect(width: u32, height: u32) -> &'static str {
    if width == 0 || height == 0 {
        return "1:1";
    }
    let ratio = width as f64 / height as f64;
    let mut best = "1:1";
    let mut best_delta = f64::MAX;
    for (name, value) in ASPECT_CANDIDATES {
        let delta = (ratio - value).abs();
        if delta < best_delta {
            best = name;
            best_delta = delta;
        }
    }
    best
}

fn extract_prediction(response: &Value) -> Result<Option<ImageBytes>> {
    let predictions = response
        .get("predictions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for row in predictions {
        let Some(obj) = row.as_object() else {
            continue;
        };
        let Some(encoded) = obj
            .get("bytesBase64Encoded")
            .or_else(|| obj.get("bytes_base64_encoded"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .context("Vertex image base64 decode failed")?;
        return Ok(Some(ImageBytes {
            bytes,
            mime_type: obj
                .get("mimeType")
                .and_then(Value::as_str)
                .map(str::to_string),
        }));
    }
    Ok(None)
}
