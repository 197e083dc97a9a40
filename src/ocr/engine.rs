use image::GrayImage;
use std::path::Path;
use std::process::Command;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use super::setup::find_tesseract;
use crate::vision::region::Region;

/// Failures of the recognition step itself, as opposed to unreadable text.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Tesseract is not installed or not where it was configured
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("Tesseract failed: {0}")]
    EngineFailed(String),
    #[error("OCR region is empty ({0})")]
    EmptyRegion(Region),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Runs Tesseract on a preprocessed image as a single line of text.
///
/// Only characters in `whitelist` can be recognized. Returns the raw
/// recognized text with surrounding whitespace trimmed.
pub fn recognize_line(
    img: &GrayImage,
    whitelist: &str,
    tesseract_path: Option<&Path>,
) -> Result<String, OcrError> {
    let tesseract = find_tesseract(tesseract_path)?;

    // Save image to temporary file
    let temp_input = NamedTempFile::with_suffix(".png")?;
    img.save(temp_input.path())?;

    let mut command = Command::new(&tesseract.executable);
    command.arg(temp_input.path()).arg("stdout");
    if let Some(tessdata) = &tesseract.tessdata {
        command.arg("--tessdata-dir").arg(tessdata);
    }
    command
        .args(["-l", "eng", "--psm", "7", "--oem", "3", "-c"])
        .arg(format!("tessedit_char_whitelist={whitelist}"));

    let output = command.output().map_err(|e| {
        OcrError::EngineUnavailable(format!(
            "unable to start {}: {}",
            tesseract.executable.display(),
            e
        ))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OcrError::EngineFailed(stderr.trim().to_string()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!("Tesseract output: {:?}", text);
    Ok(text)
}
