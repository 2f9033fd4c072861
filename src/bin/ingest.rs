use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use moodboard::config::{init_tracing, DatabaseArgs, StorageArgs};
use moodboard::encoder::DEFAULT_DIMENSIONS;
use moodboard::fetch::HttpFetcher;
use moodboard::model::SubcategoryCount;
use moodboard::processor::TracingSkipSink;
use moodboard::search::{DEFAULT_BASE_URL, DEFAULT_CALLS_PER_HOUR};
use moodboard::{
    AllocationPlan, CatalogStore, ImageProcessor, IngestArgs, IngestScheduler, SeededRandom,
    UnsplashClient,
};

#[derive(Parser, Debug)]
#[command(
    name = "moodboard-ingest",
    about = "Fill the image corpus according to the allocation plan"
)]
struct IngestCli {
    /// Print stored counts per domain and subcategory, then exit
    #[arg(long, default_value_t = false)]
    check: bool,

    /// JSON allocation plan (defaults to the built-in taxonomy)
    #[arg(long, env = "MOODBOARD_ALLOCATION")]
    allocation: Option<PathBuf>,

    /// Seed for query randomisation (OS entropy when omitted)
    #[arg(long, env = "MOODBOARD_SEED")]
    seed: Option<u64>,

    /// Unsplash access key
    #[arg(long, env = "UNSPLASH_ACCESS_KEY")]
    unsplash_access_key: Option<String>,

    /// Base URL of the Unsplash API
    #[arg(long, env = "MOODBOARD_UNSPLASH_BASE", default_value = DEFAULT_BASE_URL)]
    unsplash_base_url: String,

    /// Search calls allowed per rolling hour
    #[arg(long, env = "MOODBOARD_CALLS_PER_HOUR", default_value_t = DEFAULT_CALLS_PER_HOUR)]
    calls_per_hour: usize,

    /// Seconds before an image download times out
    #[arg(long, env = "MOODBOARD_DOWNLOAD_TIMEOUT_SECS", default_value_t = 10)]
    download_timeout_secs: u64,

    /// Embedding width used when bootstrapping the schema
    #[arg(long, env = "MOODBOARD_ENCODER_DIMENSIONS", default_value_t = DEFAULT_DIMENSIONS)]
    embedding_dimensions: usize,

    #[command(flatten)]
    ingest: IngestArgs,

    #[command(flatten)]
    database: DatabaseArgs,

    #[command(flatten)]
    storage: StorageArgs,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = IngestCli::parse();
    let catalog = cli.database.connect(cli.embedding_dimensions)?;

    if cli.check {
        print_breakdown(&catalog)?;
        return Ok(());
    }

    let plan = match &cli.allocation {
        Some(path) => AllocationPlan::from_json_file(path)?,
        None => AllocationPlan::default(),
    };
    let access_key = cli
        .unsplash_access_key
        .clone()
        .context("UNSPLASH_ACCESS_KEY (or --unsplash-access-key) is required to ingest")?;
    let mut search = UnsplashClient::new(access_key, &cli.unsplash_base_url, cli.calls_per_hour)?;
    let fetcher = HttpFetcher::new(Duration::from_secs(cli.download_timeout_secs.max(1)))?;
    let store = cli.storage.build()?;
    let mut processor = ImageProcessor::new(&catalog, &fetcher, store.as_ref());
    let mut rng = SeededRandom::new(cli.seed);
    let controls = cli.ingest.build_controls();

    eprintln!(
        "Starting with {} images already processed (target {})",
        catalog.total_images()?,
        controls.global_target()
    );
    let scheduler = IngestScheduler::new(&plan, controls);
    let summary = scheduler.run(
        &catalog,
        &mut search,
        &mut processor,
        &mut rng,
        &mut TracingSkipSink,
    )?;
    eprintln!(
        "{}: stored {} image{} ({} skipped) over {} search{}; catalog now holds {}",
        summary.stop,
        summary.stored,
        if summary.stored == 1 { "" } else { "s" },
        summary.skipped,
        summary.searches,
        if summary.searches == 1 { "" } else { "es" },
        summary.total_images
    );
    Ok(())
}

fn print_breakdown(catalog: &dyn CatalogStore) -> Result<()> {
    let total = catalog.total_images()?;
    let counts = catalog.subcategory_counts()?;
    print!("{}", render_breakdown(total, &counts));
    Ok(())
}

fn render_breakdown(total: u64, counts: &[SubcategoryCount]) -> String {
    let mut out = format!("Total images: {total}\n\nBreakdown by domain and subcategory:\n");
    let mut current: Option<&str> = None;
    let mut domain_total = 0u64;
    for row in counts {
        if current != Some(row.domain.as_str()) {
            if current.is_some() {
                out.push_str(&format!("  TOTAL: {domain_total}\n"));
            }
            out.push_str(&format!("\n{}:\n", row.domain));
            current = Some(row.domain.as_str());
            domain_total = 0;
        }
        domain_total += row.count;
        out.push_str(&format!("  {}: {}\n", row.subcategory, row.count));
    }
    if current.is_some() {
        out.push_str(&format!("  TOTAL: {domain_total}\n"));
    }
    out
}
