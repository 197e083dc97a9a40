//! Locating reference images inside screenshots.
//!
//! This module provides:
//! - Centered, clamped search regions (`region`)
//! - Normalized cross-correlation template matching (`matcher`)
//! - Named detectors with diagnostic output images (`detector`)

pub mod detector;
pub mod matcher;
pub mod overlay;
pub mod region;

pub use detector::{crop_centered, detect, Detection, DetectorOutputs, VisionSearchConfig};
pub use matcher::DEFAULT_MATCH_THRESHOLD;
