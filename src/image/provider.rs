//! Variation provider trait and utilities.

use crate::error::Result;
use crate::image::types::{GeneratedImage, VariationProviderKind, VariationRequest};
use async_trait::async_trait;

/// Trait for image variation providers.
#[async_trait]
pub trait VariationProvider: Send + Sync {
    /// Requests `request.n` variations of the source image.
    async fn vary(&self, request: &VariationRequest) -> Result<Vec<GeneratedImage>>;

    /// Returns the kind of this provider.
    fn kind(&self) -> VariationProviderKind;

    /// Returns the name of this provider for display.
    fn name(&self) -> &str {
        match self.kind() {
            VariationProviderKind::OpenAI => "OpenAI (dall-e-2)",
        }
    }

    /// Checks if the provider is configured well enough to be called.
    async fn health_check(&self) -> Result<()>;
}

/// Extension trait for providers with retry logic.
#[async_trait]
pub trait VariationProviderExt: VariationProvider {
    /// Requests variations, retrying up to `max_retries` times on transient failures.
    async fn vary_with_retries(
        &self,
        request: &VariationRequest,
        max_retries: u32,
    ) -> Result<Vec<GeneratedImage>> {
        let mut attempt = 0;
        loop {
            match self.vary(request).await {
                Ok(images) => return Ok(images),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = e.retry_after().unwrap_or(std::time::Duration::from_secs(1));
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient error: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<T: VariationProvider + ?Sized> VariationProviderExt for T {}
