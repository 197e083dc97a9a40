use image::DynamicImage;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{error, info};

use super::engine::{recognize_line, OcrError};
use super::preprocess::prepare_for_ocr;
use crate::vision::overlay::{self, MATCH_COLOR};
use crate::vision::region::centered_region;

/// Highest level a character can have
pub const LEVEL_MAX: u64 = 400;
/// Highest currency amount the game can display
pub const CURRENCY_MAX: u64 = 2_000_000_000;

/// Integer following `Level:` and preceding `/400`
const LEVEL_PATTERN: &str = r"(?i)Level:\s*(\d+)\s*/\s*400";
/// Digits with optional thousands separators and nothing else
const CURRENCY_PATTERN: &str = r"^\s*([0-9][0-9,]*)\s*$";

static LEVEL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| compile(LEVEL_PATTERN));
static CURRENCY_RE: LazyLock<Option<Regex>> = LazyLock::new(|| compile(CURRENCY_PATTERN));

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|e| error!("Invalid OCR pattern {:?}: {}", pattern, e))
        .ok()
}

/// Which on-screen field is being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrKind {
    Level,
    Currency,
}

impl OcrKind {
    /// Characters the engine may recognize for this field
    pub fn whitelist(self) -> &'static str {
        match self {
            OcrKind::Level => "Level:/0123456789",
            OcrKind::Currency => "0123456789,",
        }
    }

    pub fn upscale_factor(self) -> u32 {
        match self {
            OcrKind::Level => 3,
            OcrKind::Currency => 2,
        }
    }

    pub fn clip_limit(self) -> f32 {
        match self {
            OcrKind::Level => 2.0,
            OcrKind::Currency => 2.5,
        }
    }

    /// Validates recognized text, returning the value only if it is in range.
    pub fn parse(self, text: &str) -> Option<u64> {
        match self {
            OcrKind::Level => parse_level(text),
            OcrKind::Currency => parse_currency(text),
        }
    }
}

impl std::fmt::Display for OcrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcrKind::Level => write!(f, "level"),
            OcrKind::Currency => write!(f, "zen"),
        }
    }
}

/// Placement of an OCR field relative to the screenshot center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OcrField {
    pub region_width: u32,
    pub region_height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
}

/// Diagnostic file locations for one OCR read.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutputs {
    /// Raw crop of the field
    pub region: PathBuf,
    /// Full screenshot with the field outlined
    pub debug: PathBuf,
}

impl OcrOutputs {
    /// `<dir>/<kind>_region.png` and `<dir>/<kind>_debug.png`
    pub fn in_dir(dir: &Path, kind: OcrKind) -> Self {
        Self {
            region: dir.join(format!("{kind}_region.png")),
            debug: dir.join(format!("{kind}_debug.png")),
        }
    }

    /// `<dir>/<kind>_region.png` and `<dir>/screenshot_<kind>_debug.png`
    pub fn for_sample(dir: &Path, kind: OcrKind) -> Self {
        Self {
            region: dir.join(format!("{kind}_region.png")),
            debug: dir.join(format!("screenshot_{kind}_debug.png")),
        }
    }
}

/// Recognized text and, if it validated, the parsed value.
///
/// `parsed_value` is `None` when the text was empty, malformed or out of
/// range. That is a normal outcome; callers retry with a fresh capture.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrResult {
    pub raw_text: String,
    pub parsed_value: Option<u64>,
    pub region_path: Option<PathBuf>,
    pub debug_path: Option<PathBuf>,
}

/// Extracts the level from text like `Level: 245/400`.
pub fn parse_level(text: &str) -> Option<u64> {
    let re = LEVEL_RE.as_ref()?;
    let value: u64 = re.captures(text)?.get(1)?.as_str().parse().ok()?;
    (value <= LEVEL_MAX).then_some(value)
}

/// Parses a currency amount like `1,234,567`.
pub fn parse_currency(text: &str) -> Option<u64> {
    let re = CURRENCY_RE.as_ref()?;
    let digits = re.captures(text)?.get(1)?.as_str().replace(',', "");
    let value: u64 = digits.parse().ok()?;
    (value <= CURRENCY_MAX).then_some(value)
}

/// Preprocesses an already-cropped field and recognizes it.
pub fn extract(
    region_image: &DynamicImage,
    kind: OcrKind,
    tesseract_path: Option<&Path>,
) -> Result<OcrResult, OcrError> {
    let prepared = prepare_for_ocr(region_image, kind.upscale_factor(), kind.clip_limit());
    let raw_text = recognize_line(&prepared, kind.whitelist(), tesseract_path)?;

    if raw_text.is_empty() {
        info!("{} OCR detected no text", kind);
    } else {
        info!("{} OCR detected text: {}", kind, raw_text);
    }

    let parsed_value = kind.parse(&raw_text);
    Ok(OcrResult {
        raw_text,
        parsed_value,
        region_path: None,
        debug_path: None,
    })
}

/// Reads a field from a screenshot file.
///
/// Writes the outlined screenshot and the field crop before recognition, so
/// both exist even when the engine fails.
pub fn read_from_screenshot(
    screenshot_path: &Path,
    kind: OcrKind,
    field: &OcrField,
    outputs: &OcrOutputs,
    tesseract_path: Option<&Path>,
) -> Result<OcrResult, OcrError> {
    if !screenshot_path.exists() {
        return Err(OcrError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} screenshot not found: {}", kind, screenshot_path.display()),
        )));
    }
    let screenshot = image::open(screenshot_path)?;

    let region = centered_region(
        screenshot.width(),
        screenshot.height(),
        field.region_width,
        field.region_height,
        field.offset_x,
        field.offset_y,
    );
    if region.is_empty() {
        error!("{} OCR region is empty ({})", kind, region);
        return Err(OcrError::EmptyRegion(region));
    }

    let mut debug = screenshot.to_rgb8();
    overlay::draw_region(&mut debug, &region, MATCH_COLOR);
    save_png(&DynamicImage::ImageRgb8(debug), &outputs.debug)?;
    info!("{} debug screenshot saved to {}", kind, outputs.debug.display());

    let cropped = overlay::crop(&screenshot, &region);
    save_png(&cropped, &outputs.region)?;

    let mut result = extract(&cropped, kind, tesseract_path)?;
    result.region_path = Some(outputs.region.clone());
    result.debug_path = Some(outputs.debug.clone());
    Ok(result)
}

fn save_png(img: &DynamicImage, path: &Path) -> Result<(), OcrError> {
    crate::paths::ensure_parent(path)?;
    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};

    #[test]
    fn test_patterns_compile_once() {
        assert!(LEVEL_RE.is_some());
        assert!(CURRENCY_RE.is_some());
        assert!(std::ptr::eq(LEVEL_RE.as_ref().unwrap(), LEVEL_RE.as_ref().unwrap()));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("Level: 245/400"), Some(245));
        assert_eq!(parse_level("level:12 / 400"), Some(12));
        assert_eq!(parse_level("Level: 400/400"), Some(400));
        assert_eq!(parse_level("Level: 0/400"), Some(0));
    }

    #[test]
    fn test_parse_level_rejects() {
        assert_eq!(parse_level("Level: 999/400"), None);
        assert_eq!(parse_level(""), None);
        assert_eq!(parse_level("Level: /400"), None);
        assert_eq!(parse_level("245/400"), None);
        assert_eq!(parse_level("Level: 245/300"), None);
        assert_eq!(parse_level("Level: 99999999999999999999999/400"), None);
    }

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("1,234,567"), Some(1_234_567));
        assert_eq!(parse_currency("  42 "), Some(42));
        assert_eq!(parse_currency("2000000000"), Some(2_000_000_000));
    }

    #[test]
    fn test_parse_currency_rejects() {
        assert_eq!(parse_currency("12a34"), None);
        assert_eq!(parse_currency("2000000001"), None);
        assert_eq!(parse_currency(""), None);
        assert_eq!(parse_currency(",123"), None);
        assert_eq!(parse_currency("1 234"), None);
    }

    #[test]
    fn test_kind_parse_dispatch() {
        assert_eq!(OcrKind::Level.parse("Level: 150/400"), Some(150));
        assert_eq!(OcrKind::Currency.parse("Level: 150/400"), None);
        assert_eq!(OcrKind::Currency.parse("1,900"), Some(1900));
    }

    #[test]
    fn test_outputs_named_after_kind() {
        let outputs = OcrOutputs::in_dir(Path::new("run"), OcrKind::Currency);
        assert_eq!(outputs.region, Path::new("run").join("zen_region.png"));
        assert_eq!(outputs.debug, Path::new("run").join("zen_debug.png"));

        let sample = OcrOutputs::for_sample(Path::new("vision"), OcrKind::Level);
        assert_eq!(sample.region, Path::new("vision").join("level_region.png"));
        assert_eq!(sample.debug, Path::new("vision").join("screenshot_level_debug.png"));
    }

    #[test]
    fn test_read_missing_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let field = OcrField { region_width: 20, region_height: 10, offset_x: 0, offset_y: 0 };
        let outputs = OcrOutputs::in_dir(dir.path(), OcrKind::Level);
        let err = read_from_screenshot(
            &dir.path().join("missing.png"),
            OcrKind::Level,
            &field,
            &outputs,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, OcrError::Io(_)));
        assert!(!outputs.debug.exists());
    }

    #[test]
    fn test_read_writes_diagnostics_before_recognition() {
        let dir = tempfile::tempdir().unwrap();
        let shot: RgbImage = ImageBuffer::from_pixel(80, 60, Rgb([10, 10, 10]));
        let shot_path = dir.path().join("shot.png");
        DynamicImage::ImageRgb8(shot).save(&shot_path).unwrap();

        let field = OcrField { region_width: 20, region_height: 10, offset_x: 10, offset_y: -5 };
        let outputs = OcrOutputs::in_dir(&dir.path().join("run"), OcrKind::Level);
        // Engine deliberately missing: the crop and debug image still exist.
        let missing_engine = dir.path().join("no-tesseract");
        let err = read_from_screenshot(
            &shot_path,
            OcrKind::Level,
            &field,
            &outputs,
            Some(&missing_engine),
        )
        .unwrap_err();

        assert!(matches!(err, OcrError::EngineUnavailable(_)));
        let region = image::open(&outputs.region).unwrap();
        assert_eq!((region.width(), region.height()), (20, 10));
        assert!(outputs.debug.exists());
    }
}
