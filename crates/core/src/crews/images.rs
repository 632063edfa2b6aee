//! # Image Generation
//!
//! The design crew renders redesigned rooms through an [`ImageGenerator`].
//! [`GeminiImageGenerator`] sends the original photo plus an edit prompt to
//! a Gemini image model and returns the PNG it produces.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Redesign the room in `source_image_url`; returns encoded image bytes
    async fn redesign(&self, source_image_url: &str, prompt: &str) -> Result<Vec<u8>>;
}

pub struct GeminiImageGenerator {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl GeminiImageGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            http,
        })
    }

    /// Reads `GEMINI_API_KEY`; `HOMESCOUT_IMAGE_MODEL` overrides the model
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY environment variable is not set")?;
        let model = std::env::var("HOMESCOUT_IMAGE_MODEL")
            .unwrap_or_else(|_| DEFAULT_IMAGE_MODEL.to_string());
        Self::new(key, model)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn fetch_source(&self, url: &str) -> Result<(String, Vec<u8>)> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", url))?;
        if !response.status().is_success() {
            anyhow::bail!("Downloading {} returned {}", url, response.status());
        }
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        Ok((mime, bytes))
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageGenerator {
    async fn redesign(&self, source_image_url: &str, prompt: &str) -> Result<Vec<u8>> {
        let (mime, source) = self.fetch_source(source_image_url).await?;

        let body = json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inline_data": { "mime_type": mime, "data": B64.encode(&source) } }
                ]
            }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] }
        });

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Gemini image request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {}: {}", status, text);
        }

        let value: Value = response.json().await.context("Invalid Gemini response")?;
        decode_inline_image(&value)
    }
}

/// First inline image in a `generateContent` response
pub fn decode_inline_image(response: &Value) -> Result<Vec<u8>> {
    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .context("Gemini response has no content parts")?;

    let data = parts
        .iter()
        .find_map(|part| {
            part.get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(|d| d.get("data"))
                .and_then(Value::as_str)
        })
        .context("Gemini response contains no image")?;

    B64.decode(data).context("Image data is not valid base64")
}
