use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use moodboard::config::{init_tracing, DatabaseArgs, EncoderArgs};
use moodboard::embedding_job::DEFAULT_BATCH_SIZE;
use moodboard::fetch::HttpFetcher;
use moodboard::{EmbeddingCoverage, EmbeddingGenerator};

#[derive(Parser, Debug)]
#[command(
    name = "moodboard-embedder",
    about = "Generate CLIP embeddings for every stored image that lacks one"
)]
struct EmbedCli {
    /// Images fetched and encoded per batch
    #[arg(long, env = "MOODBOARD_EMBED_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Delete embeddings produced by other models before running
    #[arg(long, default_value_t = false)]
    purge_stale: bool,

    /// Only print coverage, do not embed anything
    #[arg(long, default_value_t = false)]
    status: bool,

    /// Seconds before a derivative download times out
    #[arg(long, env = "MOODBOARD_DOWNLOAD_TIMEOUT_SECS", default_value_t = 10)]
    download_timeout_secs: u64,

    #[command(flatten)]
    database: DatabaseArgs,

    #[command(flatten)]
    encoder: EncoderArgs,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = EmbedCli::parse();
    let encoder = cli.encoder.build()?;
    let catalog = cli.database.connect(cli.encoder.encoder_dimensions)?;
    let fetcher = HttpFetcher::new(Duration::from_secs(cli.download_timeout_secs.max(1)))?;
    let generator = EmbeddingGenerator::new(&catalog, &fetcher, &encoder);

    if cli.purge_stale {
        let removed = generator.purge_stale()?;
        eprintln!("Removed {removed} embeddings from other models");
    }

    let before = generator.coverage()?;
    eprintln!("Current status: {}", describe(&before));
    if cli.status {
        return Ok(());
    }
    if before.stale_embeddings > 0 {
        eprintln!(
            "note: {} embeddings belong to another model (rerun with --purge-stale to regenerate)",
            before.stale_embeddings
        );
    }

    let drain = generator.run_until_drained(cli.batch_size.max(1))?;
    eprintln!(
        "Embedded {} image{} in {} batch{} ({} failed)",
        drain.succeeded,
        if drain.succeeded == 1 { "" } else { "s" },
        drain.batches,
        if drain.batches == 1 { "" } else { "es" },
        drain.failed
    );
    let after = generator.coverage()?;
    eprintln!("Final status: {}", describe(&after));
    Ok(())
}

fn describe(coverage: &EmbeddingCoverage) -> String {
    format!(
        "{}/{} images have embeddings ({:.2}%)",
        coverage.images_with_embeddings, coverage.total_images, coverage.completion_percentage
    )
}
