use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use moodboard::config::{init_tracing, DatabaseArgs, EncoderArgs};
use moodboard::retrieval::DEFAULT_NUM_IMAGES;
use moodboard::{ImageFilter, Retriever};

#[derive(Parser, Debug)]
#[command(
    name = "moodboard-query",
    about = "Print the moodboard images for one prompt as JSON"
)]
struct QueryCli {
    /// Free-text moodboard prompt
    prompt: String,

    /// Restrict results to one domain
    #[arg(long)]
    domain: Option<String>,

    /// Restrict results to one subcategory
    #[arg(long)]
    subcategory: Option<String>,

    /// Number of images to return
    #[arg(long, default_value_t = DEFAULT_NUM_IMAGES)]
    num_images: usize,

    #[command(flatten)]
    database: DatabaseArgs,

    #[command(flatten)]
    encoder: EncoderArgs,
}

fn main() -> ExitCode {
    init_tracing();
    let outcome = match QueryCli::try_parse() {
        Ok(cli) => run(&cli),
        // --help / --version
        Err(err) if !err.use_stderr() => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => Err(anyhow::anyhow!(err.kind().to_string())),
    };
    match outcome {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("{}", error_json(&err));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &QueryCli) -> Result<String> {
    let encoder = cli.encoder.build()?;
    let catalog = cli.database.connect_existing(cli.encoder.encoder_dimensions)?;
    let retriever = Retriever::new(Arc::new(catalog), Arc::new(encoder));
    let filter = ImageFilter::new(cli.domain.as_deref(), cli.subcategory.as_deref());
    let board = retriever.create_moodboard(&cli.prompt, &filter, cli.num_images)?;
    Ok(serde_json::to_string(&board.images)?)
}

fn error_json(err: &anyhow::Error) -> serde_json::Value {
    serde_json::json!({ "error": format!("{err:#}") })
}
