#![warn(missing_docs)]
//! imgvary - generate variations of an image through a hosted AI API.
//!
//! # Quick Start
//!
//! ```no_run
//! use imgvary::{OpenAiVariationProvider, SourceImage, VariationJob};
//!
//! #[tokio::main]
//! async fn main() -> imgvary::Result<()> {
//!     let provider = OpenAiVariationProvider::builder().build()?;
//!     let source = SourceImage::load("cat.png")?;
//!     let report = VariationJob::new(source, "out", 3).run(&provider).await?;
//!     println!("wrote {} images", report.outputs.len());
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `openai`: OpenAI image variations (dall-e-2)
//! - `cli`: the `imgvary` command-line tool

pub mod batch;
mod error;
pub mod image;

pub use batch::{BatchPlan, SavedVariation, VariationJob, VariationReport};
pub use error::{Result, VaryError};
pub use image::{
    GeneratedImage, GenerationMetadata, ImageFormat, ResponseFormat, SourceImage,
    VariationProvider, VariationProviderExt, VariationProviderKind, VariationRequest,
    VariationSize,
};

#[cfg(feature = "openai")]
pub use image::providers::{OpenAiVariationProvider, OpenAiVariationProviderBuilder};
