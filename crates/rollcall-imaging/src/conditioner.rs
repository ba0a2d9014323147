//! Luminance equalization: CLAHE on the HSV value channel.
//!
//! Only brightness changes: every pixel's RGB is scaled by `V'/V`, which
//! leaves hue and saturation exactly where they were.

use image::{Rgb, RgbImage};

/// Default CLAHE clip limit (histogram bin cap, in multiples of the mean bin).
pub const DEFAULT_CLIP_LIMIT: f32 = 2.0;
/// Default CLAHE grid: 8×8 tiles.
pub const DEFAULT_TILES: u32 = 8;

/// Brightness/contrast pass run on attendance photos before detection.
///
/// Pure transform: never fails, never changes dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conditioner {
    pub clip_limit: f32,
    pub tiles: u32,
}

impl Default for Conditioner {
    fn default() -> Self {
        Self {
            clip_limit: DEFAULT_CLIP_LIMIT,
            tiles: DEFAULT_TILES,
        }
    }
}

impl Conditioner {
    pub fn new(clip_limit: f32, tiles: u32) -> Self {
        Self { clip_limit, tiles }
    }

    /// Return an equalized copy of `image`.
    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return image.clone();
        }

        let mut value: Vec<u8> = image.pixels().map(|p| p.0[0].max(p.0[1]).max(p.0[2])).collect();
        let original = value.clone();
        clahe_enhance(&mut value, width, height, self.tiles, self.clip_limit);

        let mut out = image.clone();
        for ((pixel, &v), &v_new) in out.pixels_mut().zip(&original).zip(&value) {
            *pixel = rescale_value(*pixel, v, v_new);
        }
        out
    }
}

/// Move a pixel from value `v` to `v_new` keeping hue and saturation.
fn rescale_value(pixel: Rgb<u8>, v: u8, v_new: u8) -> Rgb<u8> {
    if v == 0 {
        // Black has no hue; lift it to neutral grey.
        return Rgb([v_new, v_new, v_new]);
    }
    let ratio = v_new as f32 / v as f32;
    Rgb(pixel.0.map(|c| (c as f32 * ratio).round().clamp(0.0, 255.0) as u8))
}

/// Contrast-limited adaptive histogram equalization of an 8-bit plane, in place.
///
/// The plane is split into a `tiles`×`tiles` grid (fewer when the image is
/// smaller than the grid). Each tile's histogram is capped at
/// `clip_limit × tile_pixels / 256` per bin with the excess spread evenly,
/// and pixels are mapped by bilinear interpolation between the four
/// nearest tile lookup tables. A non-finite or non-positive `clip_limit`
/// disables clipping.
pub fn clahe_enhance(plane: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || plane.len() < w * h {
        return;
    }

    let tx = (tiles.max(1) as usize).min(w);
    let ty = (tiles.max(1) as usize).min(h);
    let col_start = |c: usize| c * w / tx;
    let row_start = |r: usize| r * h / ty;

    let mut luts: Vec<[u8; 256]> = Vec::with_capacity(tx * ty);
    for row in 0..ty {
        for col in 0..tx {
            let (x0, x1) = (col_start(col), col_start(col + 1));
            let (y0, y1) = (row_start(row), row_start(row + 1));

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for &p in &plane[y * w + x0..y * w + x1] {
                    hist[p as usize] += 1;
                }
            }
            let tile_pixels = ((x1 - x0) * (y1 - y0)) as u32;

            if clip_limit.is_finite() && clip_limit > 0.0 {
                let cap = ((clip_limit * tile_pixels as f32 / 256.0) as u32).max(1);
                clip_histogram(&mut hist, cap);
            }

            luts.push(build_lut(&hist, tile_pixels));
        }
    }

    // Tile centres sit at half a tile from each edge.
    let tile_w = w as f32 / tx as f32;
    let tile_h = h as f32 / ty as f32;

    for y in 0..h {
        let fy = (y as f32 + 0.5) / tile_h - 0.5;
        let (r0, r1, dy) = neighbours(fy, ty);
        for x in 0..w {
            let fx = (x as f32 + 0.5) / tile_w - 0.5;
            let (c0, c1, dx) = neighbours(fx, tx);

            let p = plane[y * w + x] as usize;
            let top = luts[r0 * tx + c0][p] as f32 * (1.0 - dx) + luts[r0 * tx + c1][p] as f32 * dx;
            let bot = luts[r1 * tx + c0][p] as f32 * (1.0 - dx) + luts[r1 * tx + c1][p] as f32 * dx;
            plane[y * w + x] = (top * (1.0 - dy) + bot * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Cap every bin at `cap` and spread the excess evenly across all bins.
fn clip_histogram(hist: &mut [u32; 256], cap: u32) {
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > cap {
            excess += *bin - cap;
            *bin = cap;
        }
    }
    let per_bin = excess / 256;
    let leftover = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += per_bin + u32::from(i < leftover);
    }
}

/// Cumulative histogram scaled to 0–255.
fn build_lut(hist: &[u32; 256], tile_pixels: u32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if tile_pixels == 0 {
        return lut;
    }
    let scale = 255.0 / tile_pixels as f32;
    let mut cumulative = 0u32;
    for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
        cumulative += count;
        *entry = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Neighbouring tile indices and the interpolation weight toward the second.
fn neighbours(f: f32, count: usize) -> (usize, usize, f32) {
    let last = (count - 1) as f32;
    let f = f.clamp(0.0, last);
    let i0 = f.floor() as usize;
    let i1 = (i0 + 1).min(count - 1);
    (i0, i1, f - i0 as f32)
}
