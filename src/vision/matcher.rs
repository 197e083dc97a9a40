//! Template matching via zero-mean normalized cross-correlation.
//!
//! The score at an offset is the Pearson correlation between the needle and
//! the haystack window under it, so it lies in `[-1, 1]` and is insensitive
//! to uniform brightness and contrast changes. Sums are accumulated in
//! integers, which keeps a pixel-exact match at a score of 1.

use image::{DynamicImage, GrayImage};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default confidence required for a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.78;

/// Location of a needle inside a haystack, in haystack pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub top_left: (u32, u32),
    pub bottom_right: (u32, u32),
    pub center: (u32, u32),
    pub confidence: f32,
    pub elapsed: Duration,
}

/// Best-scoring offset and its score, regardless of any threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestScore {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// Finds `needle` in `haystack`, converting both to grayscale first.
///
/// Returns `None` if the best score is below `threshold` or the needle does
/// not fit inside the haystack.
pub fn match_template(
    needle: &DynamicImage,
    haystack: &DynamicImage,
    threshold: f32,
) -> Option<MatchResult> {
    find_template(&needle.to_luma8(), &haystack.to_luma8(), threshold)
}

/// Grayscale variant of [`match_template`].
pub fn find_template(needle: &GrayImage, haystack: &GrayImage, threshold: f32) -> Option<MatchResult> {
    let start = Instant::now();

    let Some(best) = best_score(needle, haystack) else {
        info!(
            "Needle {}x{} does not fit in haystack {}x{}",
            needle.width(),
            needle.height(),
            haystack.width(),
            haystack.height()
        );
        return None;
    };

    if best.score < threshold {
        info!(
            "Needle not found (score={:.3}, threshold={:.3})",
            best.score, threshold
        );
        return None;
    }

    let (nw, nh) = needle.dimensions();
    let result = MatchResult {
        top_left: (best.x, best.y),
        bottom_right: (best.x + nw, best.y + nh),
        center: (best.x + nw / 2, best.y + nh / 2),
        confidence: best.score,
        elapsed: start.elapsed(),
    };

    info!(
        "Needle center at ({}, {}) with confidence {:.3} in {:.3}s",
        result.center.0,
        result.center.1,
        result.confidence,
        result.elapsed.as_secs_f32()
    );

    Some(result)
}

/// Scans every valid offset and returns the global maximum.
///
/// Ties resolve to the first offset in row-major order. Windows or needles
/// with no intensity variation score 0. Returns `None` when the needle is
/// empty or larger than the haystack in either dimension.
pub fn best_score(needle: &GrayImage, haystack: &GrayImage) -> Option<BestScore> {
    let (nw, nh) = needle.dimensions();
    let (hw, hh) = haystack.dimensions();
    if nw == 0 || nh == 0 || nw > hw || nh > hh {
        return None;
    }

    let n = (nw as i128) * (nh as i128);
    let needle_px: Vec<u64> = needle.as_raw().iter().map(|&v| v as u64).collect();
    let needle_sum: u64 = needle_px.iter().sum();
    let needle_sq: u64 = needle_px.iter().map(|v| v * v).sum();
    let needle_var_n = n * needle_sq as i128 - (needle_sum as i128) * (needle_sum as i128);

    let integral = Integral::new(haystack);
    let hay = haystack.as_raw();
    let stride = hw as usize;

    let mut best = BestScore { x: 0, y: 0, score: f32::NEG_INFINITY };

    for y in 0..=(hh - nh) {
        for x in 0..=(hw - nw) {
            let (win_sum, win_sq) = integral.window(x, y, nw, nh);
            let win_var_n = n * win_sq as i128 - (win_sum as i128) * (win_sum as i128);

            let score = if needle_var_n <= 0 || win_var_n <= 0 {
                0.0
            } else {
                let mut dot: u64 = 0;
                for j in 0..nh as usize {
                    let row = (y as usize + j) * stride + x as usize;
                    let hay_row = &hay[row..row + nw as usize];
                    let needle_row = &needle_px[j * nw as usize..(j + 1) * nw as usize];
                    for (&t, &v) in needle_row.iter().zip(hay_row) {
                        dot += t * v as u64;
                    }
                }
                let dot_n = n * dot as i128 - (needle_sum as i128) * (win_sum as i128);
                let denom = ((needle_var_n as f64) * (win_var_n as f64)).sqrt();
                (dot_n as f64 / denom).clamp(-1.0, 1.0) as f32
            };

            if score > best.score {
                best = BestScore { x, y, score };
            }
        }
    }

    debug!("Best correlation {:.4} at ({}, {})", best.score, best.x, best.y);
    Some(best)
}

/// Summed-area tables of pixel values and squared pixel values.
struct Integral {
    width: usize,
    sum: Vec<u64>,
    sq: Vec<u64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let width = w + 1;
        let mut sum = vec![0u64; width * (h + 1)];
        let mut sq = vec![0u64; width * (h + 1)];

        for y in 0..h {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = img.as_raw()[y * w + x] as u64;
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * width + x + 1;
                sum[idx] = sum[y * width + x + 1] + row_sum;
                sq[idx] = sq[y * width + x + 1] + row_sq;
            }
        }

        Self { width, sum, sq }
    }

    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (u64, u64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let at = |table: &[u64], xx: usize, yy: usize| table[yy * self.width + xx];
        let total = |table: &[u64]| {
            at(table, x1, y1) + at(table, x0, y0) - at(table, x0, y1) - at(table, x1, y0)
        };
        (total(&self.sum), total(&self.sq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb, RgbImage};

    /// Deterministic textured image so every window is distinct.
    fn textured(width: u32, height: u32) -> GrayImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            let v = (x * 37 + y * 91 + (x * y) % 23 + (x ^ y) * 7) % 251;
            Luma([v as u8])
        })
    }

    #[test]
    fn test_verbatim_crop_found_at_offset() {
        let haystack = textured(120, 90);
        let needle = image::imageops::crop_imm(&haystack, 37, 21, 25, 18).to_image();

        let result = find_template(&needle, &haystack, DEFAULT_MATCH_THRESHOLD).unwrap();
        assert_eq!(result.top_left, (37, 21));
        assert_eq!(result.bottom_right, (62, 39));
        assert_eq!(result.center, (37 + 12, 21 + 9));
        assert!((result.confidence - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_threshold_above_one_never_matches() {
        let haystack = textured(60, 60);
        let needle = image::imageops::crop_imm(&haystack, 10, 10, 12, 12).to_image();
        assert!(find_template(&needle, &haystack, 1.01).is_none());
    }

    #[test]
    fn test_needle_larger_than_haystack() {
        let haystack = textured(20, 20);
        let wide = textured(21, 5);
        let tall = textured(5, 21);
        assert!(find_template(&wide, &haystack, 0.0).is_none());
        assert!(find_template(&tall, &haystack, 0.0).is_none());
        assert!(best_score(&wide, &haystack).is_none());
    }

    #[test]
    fn test_flat_haystack_scores_zero() {
        let haystack: GrayImage = ImageBuffer::from_pixel(30, 30, Luma([128]));
        let needle = textured(8, 8);
        let best = best_score(&needle, &haystack).unwrap();
        assert_eq!(best.score, 0.0);
        assert!(find_template(&needle, &haystack, DEFAULT_MATCH_THRESHOLD).is_none());
    }

    #[test]
    fn test_brightness_shift_still_matches() {
        let haystack = textured(80, 60);
        let needle: GrayImage = image::imageops::crop_imm(&haystack, 30, 12, 20, 20).to_image();
        // Darken the needle uniformly; correlation ignores the offset.
        let darker = ImageBuffer::from_fn(20, 20, |x, y| {
            Luma([needle.get_pixel(x, y)[0] / 2])
        });
        let result = find_template(&darker, &haystack, 0.9).unwrap();
        assert_eq!(result.top_left, (30, 12));
    }

    #[test]
    fn test_color_images_are_compared_in_grayscale() {
        let gray = textured(50, 40);
        let rgb: RgbImage = ImageBuffer::from_fn(50, 40, |x, y| {
            let v = gray.get_pixel(x, y)[0];
            Rgb([v, v, v])
        });
        let haystack = DynamicImage::ImageRgb8(rgb);
        let needle = haystack.crop_imm(5, 7, 16, 12);

        let result = match_template(&needle, &haystack, DEFAULT_MATCH_THRESHOLD).unwrap();
        assert_eq!(result.top_left, (5, 7));
    }
}
