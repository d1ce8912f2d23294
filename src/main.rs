//! Native inspector: validate and normalize one DICOM file,
//! then print its metadata report.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use dicom_raster_viewer::{format_report, is_valid_container, normalize};
use log::{error, info};

/// Inspect the image of a DICOM Part-10 file
#[derive(Debug, Parser)]
#[command(name = "dicom-inspect", version)]
struct App {
    /// The DICOM file to open
    file: Option<PathBuf>,

    /// Render monochrome images with 16 bits per sample
    #[arg(long)]
    want_16bit: bool,
}

const EXIT_CANCELLED: u8 = 2;
const EXIT_FORMAT_ERROR: u8 = 3;
const EXIT_CONTENT_ERROR: u8 = 4;

fn main() -> ExitCode {
    env_logger::init();

    let App { file, want_16bit } = App::parse();

    let file = match file {
        Some(file) => file,
        None => {
            error!("No file was selected");
            return ExitCode::from(EXIT_CANCELLED);
        }
    };

    if !is_valid_container(&file) {
        error!("{} is not a valid DICOM file", file.display());
        return ExitCode::from(EXIT_FORMAT_ERROR);
    }

    let image = normalize(&file, want_16bit);
    if !image.is_valid() {
        error!("Could not read an image from {}", file.display());
        return ExitCode::from(EXIT_CONTENT_ERROR);
    }

    info!("Loaded {:?}", image);
    print!("{}", format_report(&image));
    ExitCode::SUCCESS
}
