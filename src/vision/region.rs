//! Geometry for the search windows cut out of a screenshot.
//!
//! Every detector and OCR field is described as a fixed-size box whose
//! center sits at an offset from the image center. The box is shifted (not
//! shrunk) to stay inside the image, and only shrinks when the image itself
//! is smaller than the box.

/// Integer bounds within an image, `left..right` by `top..bottom`.
///
/// A region with `left == right` or `top == bottom` is empty; callers must
/// check [`Region::is_empty`] before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Region {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.left == self.right || self.top == self.bottom
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "left={}, right={}, top={}, bottom={}",
            self.left, self.right, self.top, self.bottom
        )
    }
}

/// Returns `(start, end)` of a window of `region_size` centered on
/// `desired_center`, clamped so it lies inside `[0, total_size)`.
///
/// Returns `(0, 0)` when `total_size <= 0`.
pub fn compute_bounds(total_size: i64, region_size: i64, desired_center: i64) -> (i64, i64) {
    if total_size <= 0 {
        return (0, 0);
    }
    if region_size <= 0 {
        let start = desired_center.clamp(0, total_size);
        return (start, start);
    }

    let half_size = region_size / 2;
    let max_start = (total_size - region_size).max(0);
    let start = (desired_center - half_size).clamp(0, max_start);
    let end = (start + region_size).min(total_size);
    (start, end)
}

/// Computes a `region_w` x `region_h` box centered at
/// `(image_w / 2 + offset_x, image_h / 2 + offset_y)`.
///
/// Offsets can be negative (left of / above the image center) or larger than
/// half the image; the box is clamped back inside in both cases.
pub fn centered_region(
    image_w: u32,
    image_h: u32,
    region_w: u32,
    region_h: u32,
    offset_x: i32,
    offset_y: i32,
) -> Region {
    let desired_x = (image_w / 2) as i64 + offset_x as i64;
    let desired_y = (image_h / 2) as i64 + offset_y as i64;
    let (left, right) = compute_bounds(image_w as i64, region_w as i64, desired_x);
    let (top, bottom) = compute_bounds(image_h as i64, region_h as i64, desired_y);

    Region {
        left: left as u32,
        top: top as u32,
        right: right as u32,
        bottom: bottom as u32,
    }
}
