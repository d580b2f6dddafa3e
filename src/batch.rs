//! Splitting a variation run into rate-limited batches and writing the results.
//!
//! The variations endpoint caps both the images per request and the images
//! per minute. A [`VariationJob`] asks for at most `batch_size` images at a
//! time and sleeps for `batch_pause` after every full batch that is followed
//! by another one. Images are written as `regen{k}_{source name}` with `k`
//! counting from 1 across the whole run.

use crate::error::{Result, VaryError};
use crate::image::{
    ResponseFormat, SourceImage, VariationProvider, VariationProviderExt, VariationRequest,
    VariationSize, MAX_VARIATIONS_PER_REQUEST,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Images requested per call unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: u32 = 5;

/// Pause after a full batch, sized for the images-per-minute limit.
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_secs(60);

/// How a total count is divided into requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    total: u32,
    batch_size: u32,
}

impl BatchPlan {
    /// Creates a plan for `total` images in batches of at most `batch_size`.
    pub fn new(total: u32, batch_size: u32) -> Result<Self> {
        if total == 0 {
            return Err(VaryError::InvalidRequest(
                "number of variations must be at least 1".into(),
            ));
        }
        if batch_size == 0 || batch_size > MAX_VARIATIONS_PER_REQUEST {
            return Err(VaryError::InvalidRequest(format!(
                "batch size must be between 1 and {MAX_VARIATIONS_PER_REQUEST}, got {batch_size}"
            )));
        }
        Ok(Self { total, batch_size })
    }

    /// Total number of images.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Batch sizes in request order.
    pub fn batches(&self) -> Vec<u32> {
        let mut remaining = self.total;
        let mut batches = Vec::new();
        while remaining > 0 {
            let n = remaining.min(self.batch_size);
            batches.push(n);
            remaining -= n;
        }
        batches
    }

    /// Whether the run pauses after the batch at `index`.
    pub fn pauses_after(&self, index: usize) -> bool {
        let full_batches = (self.total / self.batch_size) as usize;
        let batch_count = self.total.div_ceil(self.batch_size) as usize;
        index < full_batches && index + 1 < batch_count
    }
}

/// One written variation.
#[derive(Debug, Clone, Serialize)]
pub struct SavedVariation {
    /// 1-based position across the run.
    pub index: u32,
    /// Where the image was written.
    pub path: PathBuf,
    /// Size of the written file.
    pub size_bytes: usize,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct VariationReport {
    /// Source image the variations were made from.
    pub source: PathBuf,
    /// Files written, in order.
    pub outputs: Vec<SavedVariation>,
    /// Number of API requests made (retries not counted).
    pub requests: u32,
    /// Wall time for the whole run, pauses included.
    pub duration_ms: u64,
}

/// A complete variation run: source image, destination and batching policy.
#[derive(Debug, Clone)]
pub struct VariationJob {
    source: SourceImage,
    output_dir: PathBuf,
    count: u32,
    size: VariationSize,
    response_format: ResponseFormat,
    batch_size: u32,
    batch_pause: Duration,
    retries: u32,
}

impl VariationJob {
    /// Creates a job producing `count` variations of `source` in `output_dir`.
    pub fn new(source: SourceImage, output_dir: impl Into<PathBuf>, count: u32) -> Self {
        Self {
            source,
            output_dir: output_dir.into(),
            count,
            size: VariationSize::default(),
            response_format: ResponseFormat::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
            retries: 0,
        }
    }

    /// Sets the output size.
    pub fn with_size(mut self, size: VariationSize) -> Self {
        self.size = size;
        self
    }

    /// Sets how images come back from the API.
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Sets the maximum images per request.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the pause after a full batch.
    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    /// Sets how often a failed batch is retried on transient errors.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Path of the `index`-th output (1-based).
    pub fn output_path(&self, index: u32) -> PathBuf {
        self.output_dir
            .join(format!("regen{index}_{}", self.source.file_name()))
    }

    /// Checks everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<BatchPlan> {
        let plan = BatchPlan::new(self.count, self.batch_size)?;
        ensure_directory(&self.output_dir)?;
        Ok(plan)
    }

    /// Runs every batch against `provider` and writes the results.
    pub async fn run<P>(&self, provider: &P) -> Result<VariationReport>
    where
        P: VariationProvider + ?Sized,
    {
        let plan = self.validate()?;
        let start = Instant::now();
        let mut outputs = Vec::with_capacity(plan.total() as usize);
        let mut requests = 0;

        for (batch_index, n) in plan.batches().into_iter().enumerate() {
            let request = VariationRequest::new(self.source.clone())
                .with_count(n)
                .with_size(self.size)
                .with_response_format(self.response_format);

            let images = provider.vary_with_retries(&request, self.retries).await?;
            requests += 1;
            if images.len() < n as usize {
                return Err(VaryError::UnexpectedResponse(format!(
                    "asked {} for {n} variations, got {}",
                    provider.name(),
                    images.len()
                )));
            }
            if images.len() > n as usize {
                tracing::warn!(
                    requested = n,
                    received = images.len(),
                    "provider returned extra variations, keeping the first {n}"
                );
            }

            for image in images.into_iter().take(n as usize) {
                let index = outputs.len() as u32 + 1;
                let path = self.output_path(index);
                image.save(&path)?;
                tracing::info!(index, path = %path.display(), bytes = image.size(), "variation saved");
                outputs.push(SavedVariation {
                    index,
                    path,
                    size_bytes: image.size(),
                });
            }

            if plan.pauses_after(batch_index) && !self.batch_pause.is_zero() {
                tracing::info!(
                    pause_secs = self.batch_pause.as_secs(),
                    "image per minute limit reached, pausing"
                );
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        Ok(VariationReport {
            source: self.source.path().to_path_buf(),
            outputs,
            requests,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

fn ensure_directory(dir: &Path) -> Result<()> {
    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(VaryError::InvalidRequest(format!(
            "output path {} is not a directory",
            dir.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(VaryError::InvalidRequest(
            format!("output directory {} does not exist", dir.display()),
        )),
        Err(e) => Err(e.into()),
    }
}
