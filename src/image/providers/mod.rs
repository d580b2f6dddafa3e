//! Image variation providers.

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "openai")]
pub use openai::{OpenAiVariationProvider, OpenAiVariationProviderBuilder};
