//! OpenAI image variation provider (dall-e-2).

use crate::error::{parse_retry_after, sanitize_error_message, Result, VaryError};
use crate::image::provider::VariationProvider;
use crate::image::types::{
    GeneratedImage, GenerationMetadata, ImageFormat, VariationProviderKind, VariationRequest,
};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Only dall-e-2 serves the variations endpoint.
const VARIATION_MODEL: &str = "dall-e-2";

/// Builder for OpenAiVariationProvider.
#[derive(Debug, Clone, Default)]
pub struct OpenAiVariationProviderBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl OpenAiVariationProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `OPENAI_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the API base URL. Falls back to `OPENAI_BASE_URL`, then the public endpoint.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the per-request timeout (default: 120s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the provider, resolving the API key.
    pub fn build(self) -> Result<OpenAiVariationProvider> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                VaryError::Auth("OPENAI_API_KEY not set and no API key provided".into())
            })?;

        let base_url = self
            .base_url
            .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(OpenAiVariationProvider {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

/// OpenAI image variation provider.
pub struct OpenAiVariationProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiVariationProvider {
    /// Creates a new `OpenAiVariationProviderBuilder`.
    pub fn builder() -> OpenAiVariationProviderBuilder {
        OpenAiVariationProviderBuilder::new()
    }

    fn variations_url(&self) -> String {
        format!("{}/images/variations", self.base_url)
    }

    fn build_form(request: &VariationRequest) -> Result<reqwest::multipart::Form> {
        let image_part = reqwest::multipart::Part::bytes(request.source.data().to_vec())
            .file_name(request.source.file_name().to_string())
            .mime_str(ImageFormat::Png.mime_type())
            .map_err(|e| VaryError::InvalidRequest(e.to_string()))?;

        Ok(reqwest::multipart::Form::new()
            .text("model", VARIATION_MODEL)
            .text("n", request.n.to_string())
            .text("size", request.size.as_str())
            .text("response_format", request.response_format.as_str())
            .part("image", image_part))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> VaryError {
        if err.is_timeout() {
            VaryError::Timeout(self.timeout)
        } else {
            VaryError::Network(err)
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        if !response.status().is_success() {
            return Err(VaryError::Api {
                status: response.status().as_u16(),
                message: "Failed to download image from URL".into(),
            });
        }
        Ok(response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?
            .to_vec())
    }

    async fn resolve_image(&self, item: OpenAiImageData) -> Result<Vec<u8>> {
        if let Some(b64) = item.b64_json {
            base64::engine::general_purpose::STANDARD
                .decode(&b64)
                .map_err(|e| VaryError::Decode(e.to_string()))
        } else if let Some(url) = item.url {
            self.download(&url).await
        } else {
            Err(VaryError::UnexpectedResponse(
                "OpenAI response contained no image data".into(),
            ))
        }
    }
}

fn parse_error(status: u16, body: &str, headers: &reqwest::header::HeaderMap) -> VaryError {
    let text = sanitize_error_message(body);
    if status == 402 {
        return VaryError::Billing(text);
    }
    if status == 413 {
        return VaryError::InvalidRequest(
            "Image too large. Reduce image size and try again.".into(),
        );
    }
    if status == 429 {
        // insufficient_quota comes back as 429 but never clears on its own
        if body.contains("insufficient_quota") || body.contains("exceeded your current quota") {
            return VaryError::Billing(text);
        }
        let retry_after = parse_retry_after(headers).map(Duration::from_secs);
        return VaryError::RateLimited { retry_after };
    }
    if status == 401 || status == 403 {
        return VaryError::Auth(text);
    }
    let lower = text.to_lowercase();
    if lower.contains("safety") || lower.contains("content_policy") {
        return VaryError::ContentBlocked(text);
    }
    VaryError::Api {
        status,
        message: text,
    }
}

#[async_trait]
impl VariationProvider for OpenAiVariationProvider {
    async fn vary(&self, request: &VariationRequest) -> Result<Vec<GeneratedImage>> {
        request.validate()?;
        let start = Instant::now();

        tracing::debug!(
            source = %request.source.path().display(),
            n = request.n,
            size = %request.size,
            "requesting variations"
        );

        let response = self
            .client
            .post(self.variations_url())
            .bearer_auth(&self.api_key)
            .multipart(Self::build_form(request)?)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let body: OpenAiImageResponse = response.json().await?;
        let requested = request.n as usize;
        if body.data.len() < requested {
            return Err(VaryError::UnexpectedResponse(format!(
                "asked for {requested} variations, got {}",
                body.data.len()
            )));
        }

        let mut images = Vec::with_capacity(requested);
        for item in body.data.into_iter().take(requested) {
            let data = self.resolve_image(item).await?;
            let format = ImageFormat::from_magic_bytes(&data).unwrap_or(ImageFormat::Png);
            images.push(GeneratedImage::new(
                data,
                format,
                VariationProviderKind::OpenAI,
                GenerationMetadata {
                    model: Some(VARIATION_MODEL.to_string()),
                    duration_ms: None,
                },
            ));
        }

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        for image in &mut images {
            image.metadata.duration_ms = Some(duration_ms);
        }

        tracing::debug!(count = images.len(), duration_ms, "variations received");
        Ok(images)
    }

    fn kind(&self) -> VariationProviderKind {
        VariationProviderKind::OpenAI
    }

    async fn health_check(&self) -> Result<()> {
        if self.api_key.starts_with("sk-") {
            Ok(())
        } else {
            Err(VaryError::Auth("Invalid API key format".into()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiImageResponse {
    data: Vec<OpenAiImageData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}
