//! Screen reading for the control loop.
//!
//! The loop asks questions about screenshots ("is the inventory open?",
//! "what level is shown?") through [`ScreenReader`]. [`VisionPipeline`]
//! answers them with the template detectors and the OCR pipeline, writing
//! their diagnostic images into the run directory.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::automation::config::TrainerConfig;
use crate::ocr::{read_from_screenshot, OcrError, OcrField, OcrKind, OcrOutputs};
use crate::vision::{crop_centered, detect, DetectorOutputs, VisionSearchConfig};

/// The four configured detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Detector {
    Ingame,
    Dialog,
    Inventory,
    Character,
}

impl Detector {
    pub fn config(self, config: &TrainerConfig) -> &VisionSearchConfig {
        match self {
            Detector::Ingame => &config.detectors.ingame,
            Detector::Dialog => &config.detectors.dialog,
            Detector::Inventory => &config.detectors.inventory,
            Detector::Character => &config.detectors.character,
        }
    }
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Detector::Ingame => write!(f, "in-game"),
            Detector::Dialog => write!(f, "dialog"),
            Detector::Inventory => write!(f, "inventory"),
            Detector::Character => write!(f, "character menu"),
        }
    }
}

/// Vision and OCR queries against a screenshot file.
pub trait ScreenReader {
    /// True if the detector's needle is visible.
    fn detect(&self, screenshot: &Path, detector: Detector) -> bool;

    /// Reads a numeric field. `Ok(None)` means text was read but did not validate.
    fn read(&self, screenshot: &Path, kind: OcrKind) -> Result<Option<u64>, OcrError>;

    /// Crops the screenshot for an error notification.
    fn error_attachment(&self, screenshot: &Path) -> Option<PathBuf>;
}

/// The real detectors and OCR, configured from [`TrainerConfig`].
pub struct VisionPipeline<'a> {
    config: &'a TrainerConfig,
}

impl<'a> VisionPipeline<'a> {
    pub fn new(config: &'a TrainerConfig) -> Self {
        Self { config }
    }

    fn field(&self, kind: OcrKind) -> &OcrField {
        match kind {
            OcrKind::Level => &self.config.level_field,
            OcrKind::Currency => &self.config.currency_field,
        }
    }
}

impl ScreenReader for VisionPipeline<'_> {
    fn detect(&self, screenshot: &Path, detector: Detector) -> bool {
        let search = detector.config(self.config);
        let outputs = DetectorOutputs::in_dir(&self.config.run_dir, &search.label);
        detect(screenshot, search, &outputs, self.config.match_threshold).found
    }

    fn read(&self, screenshot: &Path, kind: OcrKind) -> Result<Option<u64>, OcrError> {
        let outputs = OcrOutputs::in_dir(&self.config.run_dir, kind);
        let result = read_from_screenshot(
            screenshot,
            kind,
            self.field(kind),
            &outputs,
            self.config.tesseract_path.as_deref(),
        )?;
        Ok(result.parsed_value)
    }

    fn error_attachment(&self, screenshot: &Path) -> Option<PathBuf> {
        let crop = &self.config.error_attachment;
        crop_centered(
            screenshot,
            crop.width,
            crop.height,
            crop.offset_x,
            crop.offset_y,
            &self.config.run_dir.join("error_attachment.png"),
        )
    }
}
