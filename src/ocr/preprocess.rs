//! Image preparation for single-line text recognition.
//!
//! The pipeline is fixed: grayscale, cubic upscale, local contrast
//! enhancement (CLAHE), then Otsu binarization. Nothing branches on content.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::contrast::otsu_level;

/// Tiles per axis for contrast enhancement.
pub const CLAHE_GRID: u32 = 8;

/// Runs the full pipeline on an OCR field crop.
pub fn prepare_for_ocr(img: &DynamicImage, scale: u32, clip_limit: f32) -> GrayImage {
    let gray = img.to_luma8();
    let upscaled = upscale(&gray, scale);
    let equalized = clahe(&upscaled, clip_limit, CLAHE_GRID);
    binarize_otsu(&equalized)
}

/// Enlarges by an integer factor with cubic (Catmull-Rom) interpolation.
pub fn upscale(img: &GrayImage, factor: u32) -> GrayImage {
    if factor <= 1 || img.width() == 0 || img.height() == 0 {
        return img.clone();
    }
    image::imageops::resize(
        img,
        img.width() * factor,
        img.height() * factor,
        FilterType::CatmullRom,
    )
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into a `grid` x `grid` layout of tiles (fewer when the
/// image is smaller than the grid). Each tile gets an equalization table
/// built from its histogram, with every bin capped at
/// `clip_limit * tile_area / 256` and the excess spread evenly over all bins.
/// Output pixels blend the tables of the four nearest tile centers.
/// A `clip_limit` of zero or less disables clipping.
pub fn clahe(img: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }

    let tiles_x = grid.clamp(1, w);
    let tiles_y = grid.clamp(1, h);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        let (y0, y1) = (ty * h / tiles_y, (ty + 1) * h / tiles_y);
        for tx in 0..tiles_x {
            let (x0, x1) = (tx * w / tiles_x, (tx + 1) * w / tiles_x);
            luts.push(tile_lut(img, x0, y0, x1, y1, clip_limit));
        }
    }

    let tile_w = w as f32 / tiles_x as f32;
    let tile_h = h as f32 / tiles_y as f32;

    ImageBuffer::from_fn(w, h, |x, y| {
        let (tx0, tx1, ax) = neighbours(x, tile_w, tiles_x);
        let (ty0, ty1, ay) = neighbours(y, tile_h, tiles_y);
        let v = img.get_pixel(x, y)[0] as usize;

        let lut = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][v] as f32;
        let top = lut(tx0, ty0) * (1.0 - ax) + lut(tx1, ty0) * ax;
        let bottom = lut(tx0, ty1) * (1.0 - ax) + lut(tx1, ty1) * ax;
        let value = top * (1.0 - ay) + bottom * ay;

        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

/// Tiles whose centers bracket `pos`, and the weight of the second one.
fn neighbours(pos: u32, tile_size: f32, tiles: u32) -> (u32, u32, f32) {
    let f = (pos as f32 + 0.5) / tile_size - 0.5;
    if f <= 0.0 {
        return (0, 0, 0.0);
    }
    let first = (f.floor() as u32).min(tiles - 1);
    let second = (first + 1).min(tiles - 1);
    let weight = if first == second { 0.0 } else { f - first as f32 };
    (first, second, weight)
}

fn tile_lut(img: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[img.get_pixel(x, y)[0] as usize] += 1;
        }
    }

    let area = (x1 - x0) * (y1 - y0);

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }

        let batch = excess / 256;
        let residual = excess % 256;
        for bin in hist.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (256 / residual).max(1) as usize;
            for bin in hist.iter_mut().step_by(step).take(residual as usize) {
                *bin += 1;
            }
        }
    }

    let mut lut = [0u8; 256];
    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (i, count) in hist.iter().enumerate() {
        cdf += count;
        lut[i] = (cdf as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Global Otsu threshold: pixels above the level become white, the rest black.
pub fn binarize_otsu(img: &GrayImage) -> GrayImage {
    let level = otsu_level(img);
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        if img.get_pixel(x, y)[0] > level {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}
