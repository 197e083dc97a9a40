//! Named "is X visible" checks built on region geometry and template matching.
//!
//! All detectors share one algorithm and differ only in their
//! [`VisionSearchConfig`]. Each call writes three diagnostic images, found or
//! not: the cropped search region, the region with the match marked, and the
//! full screenshot with the search area (and match) drawn on it.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::vision::matcher::{match_template, MatchResult};
use crate::vision::overlay::{self, SEARCH_COLOR};
use crate::vision::region::{centered_region, Region};

/// Where and what to search for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisionSearchConfig {
    /// Short name used in logs and output file names
    pub label: String,
    /// Reference image to find
    pub needle: PathBuf,
    pub region_width: u32,
    pub region_height: u32,
    /// Horizontal offset of the region center from the screenshot center
    pub offset_x: i32,
    /// Vertical offset of the region center from the screenshot center
    pub offset_y: i32,
}

/// Diagnostic file locations for one detector.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorOutputs {
    pub region: PathBuf,
    pub marked: PathBuf,
    pub debug: PathBuf,
}

impl DetectorOutputs {
    /// `<dir>/<label>_region.png`, `<dir>/<label>_region_marked.png`, `<dir>/<label>_debug.png`
    pub fn in_dir(dir: &Path, label: &str) -> Self {
        Self {
            region: dir.join(format!("{label}_region.png")),
            marked: dir.join(format!("{label}_region_marked.png")),
            debug: dir.join(format!("{label}_debug.png")),
        }
    }

    /// Like [`DetectorOutputs::in_dir`], but the debug image is named after
    /// the sample screenshot: `<dir>/screenshot_<label>_debug.png`.
    pub fn for_sample(dir: &Path, label: &str) -> Self {
        Self {
            debug: dir.join(format!("screenshot_{label}_debug.png")),
            ..Self::in_dir(dir, label)
        }
    }
}

/// Outcome of one detection.
///
/// `region_path` and `debug_path` are `None` when the search could not run
/// (missing or unreadable input, empty region).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detection {
    pub found: bool,
    pub region_path: Option<PathBuf>,
    pub debug_path: Option<PathBuf>,
    pub match_result: Option<MatchResult>,
    /// Search region in screenshot coordinates
    pub search_region: Option<Region>,
}

impl Detection {
    /// True if the search ran, whether or not the needle was found.
    pub fn ran(&self) -> bool {
        self.region_path.is_some()
    }

    /// Center of the match in screenshot coordinates.
    pub fn screen_center(&self) -> Option<(u32, u32)> {
        let region = self.search_region?;
        let result = self.match_result?;
        Some((region.left + result.center.0, region.top + result.center.1))
    }
}

/// Runs `config` against the screenshot at `screenshot_path`.
///
/// Never fails: problems are logged and reported as `found == false`
/// without output paths.
pub fn detect(
    screenshot_path: &Path,
    config: &VisionSearchConfig,
    outputs: &DetectorOutputs,
    threshold: f32,
) -> Detection {
    match run_search(screenshot_path, config, outputs, threshold) {
        Ok(detection) => detection,
        Err(e) => {
            error!("{} search failed: {:#}", config.label, e);
            Detection::default()
        }
    }
}

fn run_search(
    screenshot_path: &Path,
    config: &VisionSearchConfig,
    outputs: &DetectorOutputs,
    threshold: f32,
) -> Result<Detection> {
    if !screenshot_path.exists() {
        return Err(anyhow!("screenshot not found: {}", screenshot_path.display()));
    }
    if !config.needle.exists() {
        return Err(anyhow!("needle not found: {}", config.needle.display()));
    }

    let screenshot = overlay::load_image(screenshot_path)?;
    let needle = overlay::load_image(&config.needle)?;

    let region = centered_region(
        screenshot.width(),
        screenshot.height(),
        config.region_width,
        config.region_height,
        config.offset_x,
        config.offset_y,
    );
    if region.is_empty() {
        return Err(anyhow!("search region evaluated to empty bounds ({})", region));
    }

    let cropped = overlay::crop(&screenshot, &region);
    overlay::save_image(&cropped, &outputs.region)?;

    let result = match_template(&needle, &cropped, threshold);

    let mut marked = cropped.to_rgb8();
    if let Some(result) = &result {
        overlay::draw_match(&mut marked, result, (0, 0));
    }
    overlay::save_image(&DynamicImage::ImageRgb8(marked), &outputs.marked)?;

    let mut debug = screenshot.to_rgb8();
    overlay::draw_region(&mut debug, &region, SEARCH_COLOR);
    if let Some(result) = &result {
        overlay::draw_match(&mut debug, result, (region.left, region.top));
    }
    overlay::save_image(&DynamicImage::ImageRgb8(debug), &outputs.debug)?;

    match &result {
        Some(r) => info!(
            "{} needle FOUND at (center={}, {}) confidence={:.3}",
            config.label,
            region.left + r.center.0,
            region.top + r.center.1,
            r.confidence
        ),
        None => info!("{} needle NOT found in the specified region", config.label),
    }

    Ok(Detection {
        found: result.is_some(),
        region_path: Some(outputs.region.clone()),
        debug_path: Some(outputs.debug.clone()),
        match_result: result,
        search_region: Some(region),
    })
}

/// Crops a centered region of a screenshot to `output` without searching.
///
/// Used for notification attachments. Returns `None` (logged) if the
/// screenshot cannot be read or the region is empty.
pub fn crop_centered(
    screenshot_path: &Path,
    width: u32,
    height: u32,
    offset_x: i32,
    offset_y: i32,
    output: &Path,
) -> Option<PathBuf> {
    let result = (|| -> Result<PathBuf> {
        let screenshot = overlay::load_image(screenshot_path)?;
        let region = centered_region(
            screenshot.width(),
            screenshot.height(),
            width,
            height,
            offset_x,
            offset_y,
        );
        if region.is_empty() {
            return Err(anyhow!("center crop produced an empty region ({})", region));
        }
        overlay::save_image(&overlay::crop(&screenshot, &region), output)?;
        Ok(output.to_path_buf())
    })();

    match result {
        Ok(path) => Some(path),
        Err(e) => {
            error!("Failed to crop {}: {:#}", screenshot_path.display(), e);
            None
        }
    }
}
