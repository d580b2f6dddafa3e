//! Core types for image variation.

use crate::error::{Result, VaryError};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Largest source image the variation endpoint accepts (4 MB).
pub const MAX_SOURCE_BYTES: usize = 4 * 1024 * 1024;

/// Largest number of variations a single request may ask for.
pub const MAX_VARIATIONS_PER_REQUEST: u32 = 10;

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format (modern, efficient).
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }
}

/// Output sizes offered by the variation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VariationSize {
    /// 256x256 pixels.
    #[serde(rename = "256x256")]
    Small,
    /// 512x512 pixels.
    #[serde(rename = "512x512")]
    Medium,
    /// 1024x1024 pixels.
    #[default]
    #[serde(rename = "1024x1024")]
    Large,
}

impl VariationSize {
    /// Returns the size as the API expects it (e.g., "1024x1024").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "256x256",
            Self::Medium => "512x512",
            Self::Large => "1024x1024",
        }
    }
}

impl std::fmt::Display for VariationSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the API should hand back generated images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Short-lived URLs that must be downloaded.
    #[default]
    Url,
    /// Base64 payloads inline in the response.
    B64Json,
}

impl ResponseFormat {
    /// Returns the API identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::B64Json => "b64_json",
        }
    }
}

/// Image provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariationProviderKind {
    /// OpenAI image variations (DALL-E 2).
    OpenAI,
}

impl std::fmt::Display for VariationProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
        }
    }
}

/// A source image loaded from disk and checked against the endpoint limits.
#[derive(Debug, Clone)]
pub struct SourceImage {
    path: PathBuf,
    file_name: String,
    data: Vec<u8>,
}

impl SourceImage {
    /// Reads and validates the image at `path`.
    ///
    /// Fails with [`VaryError::SourceNotFound`] when the file is missing and
    /// with [`VaryError::InvalidRequest`] when it is not a PNG or is larger
    /// than [`MAX_SOURCE_BYTES`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VaryError::SourceNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_bytes(path, data)
    }

    /// Wraps bytes already in memory, applying the same checks as [`load`](Self::load).
    pub fn from_bytes(path: impl AsRef<Path>, data: Vec<u8>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                VaryError::InvalidRequest(format!("{} has no file name", path.display()))
            })?
            .to_string();

        if ImageFormat::from_magic_bytes(&data) != Some(ImageFormat::Png) {
            return Err(VaryError::InvalidRequest(format!(
                "{} is not a PNG image",
                path.display()
            )));
        }
        if data.len() > MAX_SOURCE_BYTES {
            return Err(VaryError::InvalidRequest(format!(
                "{} is {} bytes, the limit is {} bytes",
                path.display(),
                data.len(),
                MAX_SOURCE_BYTES
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            data,
        })
    }

    /// Path the image was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, used to name outputs.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Raw PNG bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the image in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Metadata about the generation process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationMetadata {
    /// Model used for generation.
    pub model: Option<String>,
    /// Duration of the request that produced the image, in milliseconds.
    pub duration_ms: Option<u64>,
}

/// A request for one batch of variations.
#[derive(Debug, Clone)]
pub struct VariationRequest {
    /// The image to vary.
    pub source: SourceImage,
    /// Number of variations to ask for.
    pub n: u32,
    /// Output size.
    pub size: VariationSize,
    /// How images come back from the API.
    pub response_format: ResponseFormat,
}

impl VariationRequest {
    /// Creates a request for a single 1024x1024 variation.
    pub fn new(source: SourceImage) -> Self {
        Self {
            source,
            n: 1,
            size: VariationSize::default(),
            response_format: ResponseFormat::default(),
        }
    }

    /// Sets the number of variations.
    pub fn with_count(mut self, n: u32) -> Self {
        self.n = n;
        self
    }

    /// Sets the output size.
    pub fn with_size(mut self, size: VariationSize) -> Self {
        self.size = size;
        self
    }

    /// Sets the response format.
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Checks the request against the endpoint's limits.
    pub fn validate(&self) -> Result<()> {
        if self.n == 0 || self.n > MAX_VARIATIONS_PER_REQUEST {
            return Err(VaryError::InvalidRequest(format!(
                "n must be between 1 and {MAX_VARIATIONS_PER_REQUEST}, got {}",
                self.n
            )));
        }
        Ok(())
    }
}

/// A generated image with its data and metadata.
#[derive(Debug, Clone)]
#[must_use = "generated image should be saved or processed"]
pub struct GeneratedImage {
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// Image format.
    pub format: ImageFormat,
    /// Provider that generated this image.
    pub provider: VariationProviderKind,
    /// Generation metadata.
    pub metadata: GenerationMetadata,
}

impl GeneratedImage {
    /// Creates a new generated image.
    pub fn new(
        data: Vec<u8>,
        format: ImageFormat,
        provider: VariationProviderKind,
        metadata: GenerationMetadata,
    ) -> Self {
        Self {
            data,
            format,
            provider,
            metadata,
        }
    }

    /// Returns the size of the image data in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Saves the image to the specified path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.data)?;
        Ok(())
    }
}
