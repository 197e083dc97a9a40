//! One-shot diagnostic modes.
//!
//! Each mode runs a single detector, OCR read or notification against the
//! sample files in the vision directory, prints the outcome and returns the
//! process exit code: 0 success, 1 precondition or read failure, 2 ran but
//! nothing was found.

use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::automation::config::TrainerConfig;
use crate::automation::detection::Detector;
use crate::notify::{self, Notifier};
use crate::ocr::{read_from_screenshot, OcrKind, OcrOutputs};
use crate::vision::{crop_centered, detect, Detection, DetectorOutputs, VisionSearchConfig};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_NOT_FOUND: u8 = 2;

/// Side of the square searched by the image-find mode.
const IMAGE_FIND_REGION: u32 = 800;

/// A diagnostic mode selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    Notification,
    NotificationImage,
    Level,
    Dialog,
    Ingame,
    Inventory,
    Character,
    ImageFind,
    Zen,
}

/// Runs `diagnostic` and returns its exit code.
pub fn run(diagnostic: Diagnostic, config: &TrainerConfig, notifier: &dyn Notifier) -> u8 {
    info!("Running {:?} diagnostic", diagnostic);
    match diagnostic {
        Diagnostic::Notification => test_notification(config, notifier),
        Diagnostic::NotificationImage => test_notification_image(config, notifier),
        Diagnostic::Level => test_ocr(config, OcrKind::Level),
        Diagnostic::Zen => test_ocr(config, OcrKind::Currency),
        Diagnostic::Dialog => test_detector(config, Detector::Dialog),
        Diagnostic::Ingame => test_detector(config, Detector::Ingame),
        Diagnostic::Inventory => test_detector(config, Detector::Inventory),
        Diagnostic::Character => test_detector(config, Detector::Character),
        Diagnostic::ImageFind => test_image_find(config),
    }
}

/// Prints to stdout and the log.
fn report(message: &str) {
    println!("{message}");
    info!("{}", message);
}

fn test_notification(config: &TrainerConfig, notifier: &dyn Notifier) -> u8 {
    let message = notify::test_message(&config.notification);
    if notifier.send(&message, None) {
        report("Test notification sent.");
        EXIT_SUCCESS
    } else {
        error!("Test notification failed");
        EXIT_FAILURE
    }
}

fn test_notification_image(config: &TrainerConfig, notifier: &dyn Notifier) -> u8 {
    let source = config.vision_dir.join("screenshot_level.png");
    if !source.exists() {
        error!("Notification sample not found: {}", source.display());
        return EXIT_FAILURE;
    }

    let crop = &config.test_attachment;
    let output = config.vision_dir.join("notification_issue.png");
    let Some(attachment) = crop_centered(
        &source,
        crop.width,
        crop.height,
        crop.offset_x,
        crop.offset_y,
        &output,
    ) else {
        return EXIT_FAILURE;
    };

    let message = notify::issue_message(&config.notification);
    if notifier.send(&message, Some(&attachment)) {
        report(&format!("Image notification sent with {}", attachment.display()));
        EXIT_SUCCESS
    } else {
        error!("Image notification failed");
        EXIT_FAILURE
    }
}

/// Sample screenshot each detector is checked against.
fn detector_sample(config: &TrainerConfig, detector: Detector) -> PathBuf {
    let name = match detector {
        Detector::Ingame | Detector::Character => "screenshot_level.png",
        Detector::Dialog => "screenshot_dialog.png",
        Detector::Inventory => "screenshot_inventory.png",
    };
    config.vision_dir.join(name)
}

fn test_detector(config: &TrainerConfig, detector: Detector) -> u8 {
    let search = detector.config(config);
    let outputs = DetectorOutputs::for_sample(&config.vision_dir, &search.label);
    let screenshot = detector_sample(config, detector);
    run_search(&screenshot, search, &outputs, config.match_threshold)
}

fn test_image_find(config: &TrainerConfig) -> u8 {
    let dir = &config.image_find_dir;
    let search = VisionSearchConfig {
        label: "image-find".to_string(),
        needle: dir.join("needle.png"),
        region_width: IMAGE_FIND_REGION,
        region_height: IMAGE_FIND_REGION,
        offset_x: 0,
        offset_y: 0,
    };
    let outputs = DetectorOutputs {
        region: dir.join("screenshot_region.png"),
        marked: dir.join("screenshot_region_marked.png"),
        debug: dir.join("screenshot_debug.png"),
    };
    run_search(&dir.join("screenshot.png"), &search, &outputs, config.match_threshold)
}

fn run_search(
    screenshot: &Path,
    search: &VisionSearchConfig,
    outputs: &DetectorOutputs,
    threshold: f32,
) -> u8 {
    if !search.needle.exists() {
        error!("Needle image not found: {}", search.needle.display());
        return EXIT_FAILURE;
    }
    if !screenshot.exists() {
        error!("Screenshot not found: {}", screenshot.display());
        return EXIT_FAILURE;
    }

    let detection = detect(screenshot, search, outputs, threshold);
    if !detection.ran() {
        return EXIT_FAILURE;
    }
    report(&describe(&search.label, &detection));
    info!("Annotated screenshot saved to {}", outputs.debug.display());
    if detection.found {
        EXIT_SUCCESS
    } else {
        EXIT_NOT_FOUND
    }
}

fn describe(label: &str, detection: &Detection) -> String {
    match (detection.screen_center(), detection.match_result) {
        (Some((x, y)), Some(result)) if detection.found => format!(
            "{} FOUND at (center={}, {}) confidence={:.3} in {:.3}s",
            label,
            x,
            y,
            result.confidence,
            result.elapsed.as_secs_f64()
        ),
        _ => format!("{} NOT found in the specified region.", label),
    }
}

fn test_ocr(config: &TrainerConfig, kind: OcrKind) -> u8 {
    let (sample, field) = match kind {
        OcrKind::Level => ("screenshot_level.png", &config.level_field),
        OcrKind::Currency => ("screenshot_inventory.png", &config.currency_field),
    };
    let screenshot = config.vision_dir.join(sample);
    let outputs = OcrOutputs::for_sample(&config.vision_dir, kind);

    let result = match read_from_screenshot(
        &screenshot,
        kind,
        field,
        &outputs,
        config.tesseract_path.as_deref(),
    ) {
        Ok(result) => result,
        Err(e) => {
            error!("{} OCR failed: {}", kind, e);
            return EXIT_FAILURE;
        }
    };

    info!("{} region saved to {}", kind, outputs.region.display());
    info!("Debug screenshot saved to {}", outputs.debug.display());
    match result.parsed_value {
        Some(value) => {
            report(&format!("Detected {kind}: {value}"));
            EXIT_SUCCESS
        }
        None => {
            report(&format!("Unable to parse {} from text: {:?}", kind, result.raw_text));
            EXIT_NOT_FOUND
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};
    use std::cell::RefCell;

    struct RecordingNotifier {
        accept: bool,
        sent: RefCell<Vec<(String, Option<PathBuf>)>>,
    }

    impl RecordingNotifier {
        fn new(accept: bool) -> Self {
            Self { accept, sent: RefCell::new(Vec::new()) }
        }
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, message: &str, attachment: Option<&Path>) -> bool {
            self.sent
                .borrow_mut()
                .push((message.to_string(), attachment.map(Path::to_path_buf)));
            self.accept
        }
    }

    fn textured(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            let v = ((x * 37 + y * 91 + (x * y) % 23 + (x ^ y) * 7) % 251) as u8;
            Rgb([v, v.wrapping_mul(3), 255 - v])
        })
    }

    fn config_in(dir: &Path) -> TrainerConfig {
        let mut config = TrainerConfig::default();
        config.vision_dir = dir.join("vision");
        config.run_dir = dir.join("vision_run");
        config.image_find_dir = dir.join("image-find-test");
        config.tesseract_path = Some(dir.join("no-tesseract"));
        config.notification.user_id = "42".to_string();
        config.notification.character_name = "Hero".to_string();
        config.resolve_paths(dir);
        std::fs::create_dir_all(&config.vision_dir).unwrap();
        std::fs::create_dir_all(&config.image_find_dir).unwrap();
        config
    }

    /// Writes a 200x160 sample and a needle cut from the centre of the
    /// ingame detector's search region.
    fn ingame_fixture(config: &mut TrainerConfig, flat_needle: bool) {
        config.detectors.ingame.region_width = 60;
        config.detectors.ingame.region_height = 60;
        config.detectors.ingame.offset_x = 0;
        config.detectors.ingame.offset_y = 0;

        let shot = textured(200, 160);
        shot.save(config.vision_dir.join("screenshot_level.png")).unwrap();
        let needle: RgbImage = if flat_needle {
            RgbImage::from_pixel(16, 16, Rgb([80, 80, 80]))
        } else {
            image::imageops::crop_imm(&shot, 80, 60, 16, 16).to_image()
        };
        needle.save(&config.detectors.ingame.needle).unwrap();
    }

    #[test]
    fn test_detector_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        ingame_fixture(&mut config, false);

        assert_eq!(test_detector(&config, Detector::Ingame), EXIT_SUCCESS);
        let vision = &config.vision_dir;
        assert!(vision.join("ingame_region.png").exists());
        assert!(vision.join("ingame_region_marked.png").exists());
        assert!(vision.join("screenshot_ingame_debug.png").exists());
    }

    #[test]
    fn test_detector_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        ingame_fixture(&mut config, true);

        assert_eq!(test_detector(&config, Detector::Ingame), EXIT_NOT_FOUND);
        assert!(config.vision_dir.join("screenshot_ingame_debug.png").exists());
    }

    #[test]
    fn test_detector_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        assert_eq!(test_detector(&config, Detector::Dialog), EXIT_FAILURE);
    }

    #[test]
    fn test_image_find_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let find_dir = &config.image_find_dir;

        assert_eq!(test_image_find(&config), EXIT_FAILURE);

        let shot = textured(300, 200);
        shot.save(find_dir.join("screenshot.png")).unwrap();
        image::imageops::crop_imm(&shot, 200, 40, 24, 24)
            .to_image()
            .save(find_dir.join("needle.png"))
            .unwrap();

        assert_eq!(test_image_find(&config), EXIT_SUCCESS);
        assert!(find_dir.join("screenshot_region.png").exists());
        assert!(find_dir.join("screenshot_region_marked.png").exists());
        assert!(find_dir.join("screenshot_debug.png").exists());
    }

    #[test]
    fn test_ocr_missing_sample() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        assert_eq!(test_ocr(&config, OcrKind::Level), EXIT_FAILURE);
    }

    #[test]
    fn test_ocr_without_engine_fails_but_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        textured(1920, 1080)
            .save(config.vision_dir.join("screenshot_inventory.png"))
            .unwrap();

        assert_eq!(test_ocr(&config, OcrKind::Currency), EXIT_FAILURE);
        assert!(config.vision_dir.join("zen_region.png").exists());
        assert!(config.vision_dir.join("screenshot_zen_debug.png").exists());
    }

    #[test]
    fn test_plain_notification() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let notifier = RecordingNotifier::new(true);
        assert_eq!(run(Diagnostic::Notification, &config, &notifier), EXIT_SUCCESS);
        assert_eq!(
            *notifier.sent.borrow(),
            vec![("<@42> Hero has reached level 000 ⭐".to_string(), None)]
        );

        let refusing = RecordingNotifier::new(false);
        assert_eq!(run(Diagnostic::Notification, &config, &refusing), EXIT_FAILURE);
    }

    #[test]
    fn test_image_notification() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let notifier = RecordingNotifier::new(true);

        assert_eq!(
            run(Diagnostic::NotificationImage, &config, &notifier),
            EXIT_FAILURE
        );
        assert!(notifier.sent.borrow().is_empty());

        textured(1920, 1104)
            .save(config.vision_dir.join("screenshot_level.png"))
            .unwrap();
        assert_eq!(
            run(Diagnostic::NotificationImage, &config, &notifier),
            EXIT_SUCCESS
        );

        let attachment = config.vision_dir.join("notification_issue.png");
        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.as_deref(), Some(attachment.as_path()));
        let img = image::open(&attachment).unwrap();
        assert_eq!((img.width(), img.height()), (1920, 1080));
    }
}
