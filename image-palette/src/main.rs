use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use image::GenericImageView;
use image_palette::{PaletteColor, PALETTE_SIZE, THUMBNAIL_BOUND};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "image-palette",
    version,
    about = "Print the dimensions and dominant colors of an image as JSON"
)]
struct PaletteCli {
    /// Image file to analyse ("-" or omitted reads stdin)
    image: Option<PathBuf>,

    /// Maximum number of colors to report
    #[arg(long, default_value_t = PALETTE_SIZE)]
    count: usize,

    /// Longest side of the thumbnail the palette is computed on
    #[arg(long, default_value_t = THUMBNAIL_BOUND)]
    max_side: u32,

    /// Emit single-line JSON
    #[arg(long, default_value_t = false)]
    compact: bool,
}

#[derive(Serialize)]
struct PaletteReport {
    width: u32,
    height: u32,
    aspect_ratio: f64,
    colors: Vec<PaletteColor>,
}

fn main() -> Result<()> {
    let cli = PaletteCli::parse();
    let bytes = match cli.image.as_deref() {
        Some(path) if path.as_os_str() != "-" => {
            fs::read(path).with_context(|| format!("failed to read {:?}", path))?
        }
        _ => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let image = image_palette::decode(&bytes).context("failed to decode image")?;
    let (width, height) = image.dimensions();
    let report = PaletteReport {
        width,
        height,
        aspect_ratio: image_palette::aspect_ratio(&image),
        colors: image_palette::palette(&image, cli.count, cli.max_side),
    };
    let json = if cli.compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    }
    .context("failed to serialize report")?;
    println!("{json}");
    Ok(())
}
