//! CLI for imgvary - image variations via the OpenAI API.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use imgvary::batch::{DEFAULT_BATCH_PAUSE, DEFAULT_BATCH_SIZE};
use imgvary::{
    OpenAiVariationProvider, ResponseFormat, SourceImage, VariationJob, VariationProvider,
    VariationSize,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "imgvary")]
#[command(about = "Generate variations of a PNG image via the OpenAI image API")]
#[command(version)]
struct Cli {
    /// PNG image to make variations of (square, under 4 MB)
    image: PathBuf,

    /// Number of variations to generate
    #[arg(short = 'n', long, default_value_t = 1)]
    count: u32,

    /// Directory the variations are written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Output image size
    #[arg(short, long, value_enum, default_value = "1024x1024")]
    size: SizeArg,

    /// Images requested per API call (1-10)
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: u32,

    /// Seconds to wait after each full batch
    #[arg(long, default_value_t = DEFAULT_BATCH_PAUSE.as_secs())]
    batch_pause: u64,

    /// How the API returns images
    #[arg(long, value_enum, default_value = "url")]
    response_format: ResponseFormatArg,

    /// Retries per batch on rate limits and network errors
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SizeArg {
    #[value(name = "256x256")]
    Small,
    #[value(name = "512x512")]
    Medium,
    #[value(name = "1024x1024")]
    Large,
}

impl From<SizeArg> for VariationSize {
    fn from(arg: SizeArg) -> Self {
        match arg {
            SizeArg::Small => VariationSize::Small,
            SizeArg::Medium => VariationSize::Medium,
            SizeArg::Large => VariationSize::Large,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ResponseFormatArg {
    Url,
    B64Json,
}

impl From<ResponseFormatArg> for ResponseFormat {
    fn from(arg: ResponseFormatArg) -> Self {
        match arg {
            ResponseFormatArg::Url => ResponseFormat::Url,
            ResponseFormatArg::B64Json => ResponseFormat::B64Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("imgvary=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let provider = OpenAiVariationProvider::builder()
        .build()
        .context("could not set up the OpenAI client")?;

    let source = SourceImage::load(&cli.image)
        .with_context(|| format!("could not read {}", cli.image.display()))?;
    tracing::info!(
        source = %source.path().display(),
        bytes = source.size(),
        provider = provider.name(),
        "loaded source image"
    );

    let job = VariationJob::new(source, &cli.output_dir, cli.count)
        .with_size(cli.size.into())
        .with_response_format(cli.response_format.into())
        .with_batch_size(cli.batch_size)
        .with_batch_pause(Duration::from_secs(cli.batch_pause))
        .with_retries(cli.retries);

    let report = job.run(&provider).await.context("variation run failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for saved in &report.outputs {
            println!("Image {} created: {}", saved.index, saved.path.display());
        }
        println!(
            "Generated {} variation(s) of {} in {}ms",
            report.outputs.len(),
            report.source.display(),
            report.duration_ms
        );
    }

    Ok(())
}
