//! Image variation module.

mod provider;
pub mod providers;
mod types;

pub use provider::{VariationProvider, VariationProviderExt};
pub use types::{
    GeneratedImage, GenerationMetadata, ImageFormat, ResponseFormat, SourceImage,
    VariationProviderKind, VariationRequest, VariationSize, MAX_SOURCE_BYTES,
    MAX_VARIATIONS_PER_REQUEST,
};
