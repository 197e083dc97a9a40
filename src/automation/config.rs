//! Configuration types for the trainer.
//!
//! Loaded once at startup from config.json and passed by reference to the
//! state machine, detectors and diagnostics. Every field has a default, so a
//! partial file (or none at all) is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::ocr::OcrField;
use crate::paths;
use crate::vision::{VisionSearchConfig, DEFAULT_MATCH_THRESHOLD};

/// The four named detectors.
///
/// Each detector in the file may set any subset of its fields; the rest keep
/// that detector's defaults.
#[derive(Clone, Debug, Serialize)]
pub struct DetectorsConfig {
    /// Indicator only visible while the character is in game
    pub ingame: VisionSearchConfig,
    /// Modal dialog that blocks the routine
    pub dialog: VisionSearchConfig,
    pub inventory: VisionSearchConfig,
    /// Character menu, where the level is shown
    pub character: VisionSearchConfig,
}

fn detector(label: &str, w: u32, h: u32, offset_x: i32, offset_y: i32) -> VisionSearchConfig {
    VisionSearchConfig {
        label: label.to_string(),
        needle: PathBuf::from(format!("{label}_needle.png")),
        region_width: w,
        region_height: h,
        offset_x,
        offset_y,
    }
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            ingame: detector("ingame", 100, 100, -470, 490),
            dialog: detector("dialog", 300, 300, 0, -100),
            inventory: detector("inventory", 100, 100, 305, 515),
            character: detector("character", 100, 100, 210, 515),
        }
    }
}

/// Detector settings as written in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchOverride {
    label: Option<String>,
    needle: Option<PathBuf>,
    region_width: Option<u32>,
    region_height: Option<u32>,
    offset_x: Option<i32>,
    offset_y: Option<i32>,
}

impl SearchOverride {
    fn apply(self, base: VisionSearchConfig) -> VisionSearchConfig {
        VisionSearchConfig {
            label: self.label.unwrap_or(base.label),
            needle: self.needle.unwrap_or(base.needle),
            region_width: self.region_width.unwrap_or(base.region_width),
            region_height: self.region_height.unwrap_or(base.region_height),
            offset_x: self.offset_x.unwrap_or(base.offset_x),
            offset_y: self.offset_y.unwrap_or(base.offset_y),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetectorsOverride {
    ingame: SearchOverride,
    dialog: SearchOverride,
    inventory: SearchOverride,
    character: SearchOverride,
}

impl<'de> Deserialize<'de> for DetectorsConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let file = DetectorsOverride::deserialize(deserializer)?;
        let base = DetectorsConfig::default();
        Ok(Self {
            ingame: file.ingame.apply(base.ingame),
            dialog: file.dialog.apply(base.dialog),
            inventory: file.inventory.apply(base.inventory),
            character: file.character.apply(base.character),
        })
    }
}

/// Retry budgets and delays of the control loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub starting_attempts: u32,
    pub starting_retry_delay_secs: f64,
    /// Cycle period, measured from cycle start
    pub healthcheck_interval_secs: f64,
    pub menu_open_retries: u32,
    pub menu_close_retries: u32,
    pub level_attempts: u32,
    pub currency_attempts: u32,
    /// Pause after each key press
    pub key_delay_secs: f64,
    /// Uniform random spread applied to `key_delay_secs`
    pub key_delay_jitter_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            starting_attempts: 5,
            starting_retry_delay_secs: 5.0,
            healthcheck_interval_secs: 180.0,
            menu_open_retries: 10,
            menu_close_retries: 10,
            level_attempts: 3,
            currency_attempts: 3,
            key_delay_secs: 2.0,
            key_delay_jitter_secs: 0.5,
        }
    }
}

impl TimingConfig {
    pub fn starting_retry_delay(&self) -> Duration {
        secs(self.starting_retry_delay_secs)
    }

    pub fn healthcheck_interval(&self) -> Duration {
        secs(self.healthcheck_interval_secs)
    }
}

/// Converts configured seconds, treating negative or invalid values as zero.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}

/// Game key bindings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Toggles the character menu
    pub character_menu: String,
    /// Toggles the inventory
    pub inventory: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            character_menu: "C".to_string(),
            inventory: "I".to_string(),
        }
    }
}

/// Which window to bring to the foreground.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Substring of the game window title, ignoring case; empty disables focusing
    pub title_substring: String,
    pub focus_each_cycle: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title_substring: "99B".to_string(),
            focus_each_cycle: true,
        }
    }
}

/// Discord webhook settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Empty disables delivery
    pub webhook_url: String,
    /// Discord user id mentioned in every message
    pub user_id: String,
    pub character_name: String,
    /// Overrides the webhook's display name
    pub username: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            user_id: String::new(),
            character_name: String::new(),
            username: None,
            timeout_secs: 10,
        }
    }
}

/// A centered crop of a screenshot, used for notification images.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CropConfig {
    pub width: u32,
    pub height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
}

/// OCR field settings as written in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FieldOverride {
    region_width: Option<u32>,
    region_height: Option<u32>,
    offset_x: Option<i32>,
    offset_y: Option<i32>,
}

impl FieldOverride {
    fn apply(self, base: OcrField) -> OcrField {
        OcrField {
            region_width: self.region_width.unwrap_or(base.region_width),
            region_height: self.region_height.unwrap_or(base.region_height),
            offset_x: self.offset_x.unwrap_or(base.offset_x),
            offset_y: self.offset_y.unwrap_or(base.offset_y),
        }
    }
}

/// Crop settings as written in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CropOverride {
    width: Option<u32>,
    height: Option<u32>,
    offset_x: Option<i32>,
    offset_y: Option<i32>,
}

impl CropOverride {
    fn apply(self, base: CropConfig) -> CropConfig {
        CropConfig {
            width: self.width.unwrap_or(base.width),
            height: self.height.unwrap_or(base.height),
            offset_x: self.offset_x.unwrap_or(base.offset_x),
            offset_y: self.offset_y.unwrap_or(base.offset_y),
        }
    }
}

fn level_field_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<OcrField, D::Error> {
    Ok(FieldOverride::deserialize(d)?.apply(default_level_field()))
}

fn currency_field_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<OcrField, D::Error> {
    Ok(FieldOverride::deserialize(d)?.apply(default_currency_field()))
}

fn error_attachment_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<CropConfig, D::Error> {
    Ok(CropOverride::deserialize(d)?.apply(default_error_attachment()))
}

fn test_attachment_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<CropConfig, D::Error> {
    Ok(CropOverride::deserialize(d)?.apply(default_test_attachment()))
}

/// Complete trainer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Default tracing level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Minimum template match confidence (0.0-1.0)
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    /// Needles and sample screenshots for the diagnostic modes
    #[serde(default = "default_vision_dir")]
    pub vision_dir: PathBuf,
    /// Live screenshots and diagnostic images written by the loop
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,
    #[serde(default = "default_image_find_dir")]
    pub image_find_dir: PathBuf,
    #[serde(default = "default_start_sound")]
    pub start_sound: PathBuf,
    /// Explicit Tesseract executable; searched for when absent
    #[serde(default)]
    pub tesseract_path: Option<PathBuf>,
    #[serde(default)]
    pub detectors: DetectorsConfig,
    #[serde(default = "default_level_field", deserialize_with = "level_field_or_default")]
    pub level_field: OcrField,
    #[serde(default = "default_currency_field", deserialize_with = "currency_field_or_default")]
    pub currency_field: OcrField,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Levels that trigger an informational message when crossed
    #[serde(default = "default_level_milestones")]
    pub level_milestones: Vec<u64>,
    /// Currency amount above which a warning is sent every cycle
    #[serde(default = "default_currency_high_water")]
    pub currency_high_water: u64,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    /// Crop attached to error notifications
    #[serde(
        default = "default_error_attachment",
        deserialize_with = "error_attachment_or_default"
    )]
    pub error_attachment: CropConfig,
    /// Crop used by the image notification test
    #[serde(
        default = "default_test_attachment",
        deserialize_with = "test_attachment_or_default"
    )]
    pub test_attachment: CropConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_match_threshold() -> f32 {
    DEFAULT_MATCH_THRESHOLD
}

fn default_vision_dir() -> PathBuf {
    PathBuf::from("vision")
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("vision_run")
}

fn default_image_find_dir() -> PathBuf {
    PathBuf::from("image-find-test")
}

fn default_start_sound() -> PathBuf {
    PathBuf::from("sounds").join("start.mp3")
}

fn default_level_field() -> OcrField {
    OcrField { region_width: 200, region_height: 45, offset_x: 555, offset_y: -370 }
}

fn default_currency_field() -> OcrField {
    OcrField { region_width: 120, region_height: 30, offset_x: 545, offset_y: 309 }
}

fn default_level_milestones() -> Vec<u64> {
    vec![150, 280, 380]
}

fn default_currency_high_water() -> u64 {
    1_900_000_000
}

fn default_error_attachment() -> CropConfig {
    CropConfig { width: 1920, height: 1080, offset_x: 0, offset_y: 0 }
}

fn default_test_attachment() -> CropConfig {
    CropConfig { width: 1920, height: 1080, offset_x: 0, offset_y: 12 }
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            match_threshold: default_match_threshold(),
            vision_dir: default_vision_dir(),
            run_dir: default_run_dir(),
            image_find_dir: default_image_find_dir(),
            start_sound: default_start_sound(),
            tesseract_path: None,
            detectors: DetectorsConfig::default(),
            level_field: default_level_field(),
            currency_field: default_currency_field(),
            timing: TimingConfig::default(),
            level_milestones: default_level_milestones(),
            currency_high_water: default_currency_high_water(),
            keys: KeysConfig::default(),
            window: WindowConfig::default(),
            notification: NotificationConfig::default(),
            error_attachment: default_error_attachment(),
            test_attachment: default_test_attachment(),
        }
    }
}

impl TrainerConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("Failed to parse config")
    }

    /// Makes every relative path absolute, relative to `base`. Detector
    /// needles are relative to `vision_dir` instead.
    pub fn resolve_paths(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        fix(&mut self.vision_dir);
        fix(&mut self.run_dir);
        fix(&mut self.image_find_dir);
        fix(&mut self.start_sound);
        if let Some(path) = self.tesseract_path.as_mut() {
            fix(path);
        }
        for detector in self.detectors.all_mut() {
            if detector.needle.is_relative() {
                detector.needle = self.vision_dir.join(&detector.needle);
            }
        }
    }

    /// Directories the program writes into.
    pub fn output_dirs(&self) -> [&Path; 2] {
        [&self.vision_dir, &self.run_dir]
    }
}

impl DetectorsConfig {
    fn all_mut(&mut self) -> [&mut VisionSearchConfig; 4] {
        [
            &mut self.ingame,
            &mut self.dialog,
            &mut self.inventory,
            &mut self.character,
        ]
    }
}

/// Loads configuration from `path`, or config.json next to the executable.
///
/// A missing or unreadable file falls back to defaults. Relative paths are
/// resolved against the executable directory.
pub fn load_config(path: Option<&Path>) -> TrainerConfig {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(paths::get_config_path);

    info!("Looking for config at: {}", config_path.display());

    let mut config = if config_path.exists() {
        match fs::read_to_string(&config_path) {
            Ok(contents) => match TrainerConfig::from_json(&contents) {
                Ok(config) => {
                    info!("Config loaded from {}", config_path.display());
                    config
                }
                Err(e) => {
                    warn!("{:#}. Using defaults.", e);
                    TrainerConfig::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}. Using defaults.", config_path.display(), e);
                TrainerConfig::default()
            }
        }
    } else {
        info!("{} not found. Using default config.", config_path.display());
        TrainerConfig::default()
    };

    config.resolve_paths(paths::get_exe_dir());
    config
}
