//! Diagnostic drawing and image file helpers.

use anyhow::{Context, Result};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::vision::matcher::MatchResult;
use crate::vision::region::Region;

/// Search area outline.
pub const SEARCH_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
/// Match box and OCR field outline.
pub const MATCH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Match center dot.
pub const CENTER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

const LINE_THICKNESS: u32 = 2;
const CENTER_RADIUS: i32 = 5;

/// Loads an image from disk.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("Unable to read image at {}", path.display()))
}

/// Saves an image, creating the parent directory first. Existing files are overwritten.
pub fn save_image(img: &DynamicImage, path: &Path) -> Result<()> {
    crate::paths::ensure_parent(path)
        .with_context(|| format!("Failed to create directory for {}", path.display()))?;
    img.save(path)
        .with_context(|| format!("Failed to write image {}", path.display()))
}

/// Copies `region` out of `img`. The region must be non-empty and inside the image.
pub fn crop(img: &DynamicImage, region: &Region) -> DynamicImage {
    img.crop_imm(region.left, region.top, region.width(), region.height())
}

/// Draws an outline with corners at `(left, top)` and `(right, bottom)`, both inclusive.
pub fn draw_box(img: &mut RgbImage, left: u32, top: u32, right: u32, bottom: u32, color: Rgb<u8>) {
    let right = right.max(left);
    let bottom = bottom.max(top);
    for inset in 0..LINE_THICKNESS {
        let x0 = left + inset;
        let y0 = top + inset;
        if x0 > right.saturating_sub(inset) || y0 > bottom.saturating_sub(inset) {
            break;
        }
        let w = right - inset - x0 + 1;
        let h = bottom - inset - y0 + 1;
        draw_hollow_rect_mut(img, Rect::at(x0 as i32, y0 as i32).of_size(w, h), color);
    }
}

/// Outlines a search region; `right`/`bottom` are exclusive bounds.
pub fn draw_region(img: &mut RgbImage, region: &Region, color: Rgb<u8>) {
    draw_box(
        img,
        region.left,
        region.top,
        region.right.saturating_sub(1).max(region.left),
        region.bottom.saturating_sub(1).max(region.top),
        color,
    );
}

/// Draws a match box and its center dot, shifted by `origin`.
pub fn draw_match(img: &mut RgbImage, result: &MatchResult, origin: (u32, u32)) {
    let (ox, oy) = origin;
    draw_box(
        img,
        ox + result.top_left.0,
        oy + result.top_left.1,
        ox + result.bottom_right.0,
        oy + result.bottom_right.1,
        MATCH_COLOR,
    );
    draw_filled_circle_mut(
        img,
        ((ox + result.center.0) as i32, (oy + result.center.1) as i32),
        CENTER_RADIUS,
        CENTER_COLOR,
    );
}
