mod collage;
mod config;
mod lastfm;
mod models;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;

use config::LastfmCredentials;

const JPEG_QUALITY: u8 = 40;

/// Fetches the 9 albums the listener has been obsessed with over the last
/// 30 days and creates a pretty picture of them.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path for the saved collage image (JPEG)
    target_path: PathBuf,

    /// Outline font (TTF/OTF) used for the caption overlays
    font_path: PathBuf,
}

fn main() {
    colog::init();
    let args = Args::parse();

    let creds = match LastfmCredentials::from_env() {
        Ok(creds) => creds,
        Err(e) => {
            eprintln!("{e}");
            process::exit(2);
        }
    };

    if let Err(e) = run(&args, creds) {
        eprintln!("Error: {e:?}");
        process::exit(1);
    }
}

fn run(args: &Args, creds: LastfmCredentials) -> Result<()> {
    let font_bytes = fs::read(&args.font_path)
        .with_context(|| format!("Failed to read font file: {}", args.font_path.display()))?;

    let client = lastfm::LastfmClient::new(creds)?;
    let albums = lastfm::fetch_albums(&client)?;
    let img = collage::generate_collage(albums, &font_bytes, true)?;

    save_jpeg(img, &args.target_path)
        .with_context(|| format!("Failed to write collage to {}", args.target_path.display()))?;

    Ok(())
}

fn save_jpeg(img: image::RgbImage, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
    encoder.encode_image(&DynamicImage::ImageRgb8(img))?;
    writer.flush()?;

    Ok(())
}
