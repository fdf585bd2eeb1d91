//! Pixel-level filters used by the preprocessing pipeline.
//!
//! Every filter works on 8-bit single channel buffers and is fully
//! deterministic: integer paths use exact fixed-point arithmetic and float
//! paths use a fixed evaluation order, so the same input always yields the
//! same bytes.

use image::{DynamicImage, GrayImage};

/// Fixed-point BT.601 luma weights, 14 fractional bits
const LUMA_SHIFT: u32 = 14;
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;

/// Fixed-point precision of the linear resize coefficients
const RESIZE_COEF_BITS: u32 = 11;
const RESIZE_COEF_SCALE: f64 = (1 << RESIZE_COEF_BITS) as f64;

/// Binomial 5-tap kernel, sums to 16
const GAUSS_5: [u32; 5] = [1, 4, 6, 4, 1];

const HIST_SIZE: usize = 256;

/// Convert any decoded image to 8-bit luminance.
///
/// Single channel images keep their values (alpha is dropped and 16-bit
/// samples are scaled to 8 bits). Colour images are reduced with the
/// BT.601 weights in 14-bit fixed point.
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    match image {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_) => image.to_luma8(),
        _ => {
            let rgb = image.to_rgb8();
            let (width, height) = rgb.dimensions();
            let mut out = GrayImage::new(width, height);
            for (src, dst) in rgb.pixels().zip(out.pixels_mut()) {
                let [r, g, b] = src.0;
                let y = (LUMA_R * r as u32 + LUMA_G * g as u32 + LUMA_B * b as u32
                    + (1 << (LUMA_SHIFT - 1)))
                    >> LUMA_SHIFT;
                dst.0[0] = y.min(255) as u8;
            }
            out
        }
    }
}

/// Resize with area interpolation.
///
/// When neither axis grows, each output pixel is the coverage-weighted mean
/// of the source pixels under its footprint. Otherwise both axes use the
/// area-mode linear fallback.
pub fn resize_area(src: &GrayImage, dst_width: u32, dst_height: u32) -> GrayImage {
    let (src_width, src_height) = src.dimensions();
    if src_width == dst_width && src_height == dst_height {
        return src.clone();
    }

    let scale_x = src_width as f64 / dst_width as f64;
    let scale_y = src_height as f64 / dst_height as f64;

    if scale_x >= 1.0 && scale_y >= 1.0 {
        let int_x = scale_x.fract() == 0.0;
        let int_y = scale_y.fract() == 0.0;
        if int_x && int_y {
            resize_area_integer(src, scale_x as u32, scale_y as u32, dst_width, dst_height)
        } else {
            resize_area_fractional(src, dst_width, dst_height)
        }
    } else {
        resize_linear_area_mode(src, dst_width, dst_height)
    }
}

/// Block average for whole-number shrink factors
fn resize_area_integer(
    src: &GrayImage,
    factor_x: u32,
    factor_y: u32,
    dst_width: u32,
    dst_height: u32,
) -> GrayImage {
    let area = factor_x * factor_y;
    let inv_area = 1.0f32 / area as f32;
    let mut out = GrayImage::new(dst_width, dst_height);

    for dy in 0..dst_height {
        for dx in 0..dst_width {
            let mut sum = 0u32;
            for ky in 0..factor_y {
                for kx in 0..factor_x {
                    sum += src.get_pixel(dx * factor_x + kx, dy * factor_y + ky).0[0] as u32;
                }
            }
            let value = if area == 4 {
                (sum + 2) >> 2
            } else {
                round_half_even(sum as f32 * inv_area) as u32
            };
            out.put_pixel(dx, dy, image::Luma([value.min(255) as u8]));
        }
    }
    out
}

/// One source tap of an area resize: (destination index, source index, weight)
#[derive(Debug, Clone, Copy)]
struct AreaTap {
    dst: usize,
    src: usize,
    weight: f32,
}

/// Coverage table of one axis for a fractional shrink
fn area_taps(src_len: usize, dst_len: usize) -> Vec<AreaTap> {
    let scale = src_len as f64 / dst_len as f64;
    let mut taps = Vec::with_capacity(src_len * 2);

    for dst in 0..dst_len {
        let fsx1 = dst as f64 * scale;
        let fsx2 = fsx1 + scale;
        let cell = scale.min(src_len as f64 - fsx1);

        let mut sx1 = fsx1.ceil() as usize;
        let sx2 = (fsx2.floor() as usize).min(src_len - 1);
        sx1 = sx1.min(sx2);

        if sx1 as f64 - fsx1 > 1e-3 {
            taps.push(AreaTap {
                dst,
                src: sx1 - 1,
                weight: ((sx1 as f64 - fsx1) / cell) as f32,
            });
        }
        for src in sx1..sx2 {
            taps.push(AreaTap {
                dst,
                src,
                weight: (1.0 / cell) as f32,
            });
        }
        if fsx2 - sx2 as f64 > 1e-3 {
            taps.push(AreaTap {
                dst,
                src: sx2,
                weight: ((fsx2 - sx2 as f64).min(1.0).min(cell) / cell) as f32,
            });
        }
    }
    taps
}

fn resize_area_fractional(src: &GrayImage, dst_width: u32, dst_height: u32) -> GrayImage {
    let (src_width, src_height) = src.dimensions();
    let x_taps = area_taps(src_width as usize, dst_width as usize);
    let y_taps = area_taps(src_height as usize, dst_height as usize);

    let raw = src.as_raw();
    let row_stride = src_width as usize;
    let mut row_buf = vec![0f32; dst_width as usize];
    let mut acc = vec![vec![0f32; dst_width as usize]; dst_height as usize];

    // Horizontal pass per source row, then weighted accumulation into rows
    let mut last_row = usize::MAX;
    for tap_y in &y_taps {
        if tap_y.src != last_row {
            row_buf.iter_mut().for_each(|v| *v = 0.0);
            let row = &raw[tap_y.src * row_stride..(tap_y.src + 1) * row_stride];
            for tap_x in &x_taps {
                row_buf[tap_x.dst] += row[tap_x.src] as f32 * tap_x.weight;
            }
            last_row = tap_y.src;
        }
        let dst_row = &mut acc[tap_y.dst];
        for (d, v) in dst_row.iter_mut().zip(row_buf.iter()) {
            *d += tap_y.weight * *v;
        }
    }

    let mut out = GrayImage::new(dst_width, dst_height);
    for (dy, row) in acc.iter().enumerate() {
        for (dx, v) in row.iter().enumerate() {
            out.put_pixel(dx as u32, dy as u32, image::Luma([saturate_u8(*v)]));
        }
    }
    out
}

/// Source index and fixed-point weights `(1-f, f)` of one axis
fn linear_area_coeffs(src_len: usize, dst_len: usize) -> Vec<(usize, [i32; 2])> {
    let scale = src_len as f64 / dst_len as f64;
    let inv_scale = dst_len as f64 / src_len as f64;

    (0..dst_len)
        .map(|d| {
            let mut sx = (d as f64 * scale).floor() as i64;
            let mut fx = ((d + 1) as f64 - (sx + 1) as f64 * inv_scale) as f32;
            fx = if fx <= 0.0 { 0.0 } else { fx - fx.floor() };

            if sx < 0 {
                sx = 0;
                fx = 0.0;
            }
            if sx as usize >= src_len - 1 {
                sx = src_len as i64 - 1;
                fx = 0.0;
            }

            let w0 = round_half_even(((1.0 - fx) as f64 * RESIZE_COEF_SCALE) as f32) as i32;
            let w1 = RESIZE_COEF_SCALE as i32 - w0;
            (sx as usize, [w0, w1])
        })
        .collect()
}

fn resize_linear_area_mode(src: &GrayImage, dst_width: u32, dst_height: u32) -> GrayImage {
    let (src_width, src_height) = src.dimensions();
    let (sw, sh) = (src_width as usize, src_height as usize);
    let x_coeffs = linear_area_coeffs(sw, dst_width as usize);
    let y_coeffs = linear_area_coeffs(sh, dst_height as usize);
    let raw = src.as_raw();

    // Horizontal pass for every source row, kept at 11-bit precision
    let hrow = |y: usize| -> Vec<i32> {
        let row = &raw[y * sw..(y + 1) * sw];
        x_coeffs
            .iter()
            .map(|&(sx, [a0, a1])| {
                let s1 = (sx + 1).min(sw - 1);
                row[sx] as i32 * a0 + row[s1] as i32 * a1
            })
            .collect()
    };
    let rows: Vec<Vec<i32>> = (0..sh).map(hrow).collect();

    let mut out = GrayImage::new(dst_width, dst_height);
    for (dy, &(sy, [b0, b1])) in y_coeffs.iter().enumerate() {
        let r0 = &rows[sy];
        let r1 = &rows[(sy + 1).min(sh - 1)];
        for dx in 0..dst_width as usize {
            let v = (((b0 * (r0[dx] >> 4)) >> 16) + ((b1 * (r1[dx] >> 4)) >> 16) + 2) >> 2;
            out.put_pixel(dx as u32, dy as u32, image::Luma([v.clamp(0, 255) as u8]));
        }
    }
    out
}

/// Reflect-101 index: `-1 -> 1`, `len -> len - 2`
fn reflect_101(i: i64, len: usize) -> usize {
    let len = len as i64;
    if len == 1 {
        return 0;
    }
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= len {
            i = 2 * len - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// 5x5 Gaussian blur with the binomial kernel and reflect-101 borders.
pub fn gaussian_blur_5x5(src: &GrayImage) -> GrayImage {
    let (width, height) = src.dimensions();
    let (w, h) = (width as usize, height as usize);
    let raw = src.as_raw();

    // Row pass, exact integers scaled by 16
    let mut horiz = vec![0u32; w * h];
    for y in 0..h {
        let row = &raw[y * w..(y + 1) * w];
        for x in 0..w {
            horiz[y * w + x] = GAUSS_5
                .iter()
                .enumerate()
                .map(|(k, &kw)| kw * row[reflect_101(x as i64 + k as i64 - 2, w)] as u32)
                .sum();
        }
    }

    // Column pass, total scale 256, rounded half up
    let mut out = GrayImage::new(width, height);
    for y in 0..h {
        for x in 0..w {
            let sum: u32 = GAUSS_5
                .iter()
                .enumerate()
                .map(|(k, &kw)| kw * horiz[reflect_101(y as i64 + k as i64 - 2, h) * w + x])
                .sum();
            out.put_pixel(x as u32, y as u32, image::Luma([((sum + 128) >> 8).min(255) as u8]));
        }
    }
    out
}

/// Contrast limited adaptive histogram equalization.
///
/// `clip_limit` is relative to a uniform histogram; `grid` is the number of
/// tiles along (x, y). Sizes that do not divide evenly are padded with
/// reflect-101 borders before the tile histograms are taken.
pub fn clahe(src: &GrayImage, clip_limit: f32, grid: (u32, u32)) -> GrayImage {
    let (width, height) = src.dimensions();
    let (tiles_x, tiles_y) = (grid.0.max(1) as usize, grid.1.max(1) as usize);
    let (w, h) = (width as usize, height as usize);

    let pad_w = if w % tiles_x == 0 { w } else { w + tiles_x - w % tiles_x };
    let pad_h = if h % tiles_y == 0 { h } else { h + tiles_y - h % tiles_y };
    let raw = src.as_raw();
    let pixel = |x: usize, y: usize| -> u8 { raw[reflect_101(y as i64, h) * w + reflect_101(x as i64, w)] };

    let tile_w = pad_w / tiles_x;
    let tile_h = pad_h / tiles_y;
    let tile_area = tile_w * tile_h;
    let clip = if clip_limit > 0.0 {
        ((clip_limit * tile_area as f32 / HIST_SIZE as f32) as usize).max(1)
    } else {
        0
    };
    let lut_scale = (HIST_SIZE - 1) as f32 / tile_area as f32;

    let mut luts = vec![[0u8; HIST_SIZE]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut hist = [0usize; HIST_SIZE];
            for y in ty * tile_h..(ty + 1) * tile_h {
                for x in tx * tile_w..(tx + 1) * tile_w {
                    hist[pixel(x, y) as usize] += 1;
                }
            }
            if clip > 0 {
                clip_histogram(&mut hist, clip);
            }

            let lut = &mut luts[ty * tiles_x + tx];
            let mut sum = 0usize;
            for (entry, count) in lut.iter_mut().zip(hist.iter()) {
                sum += count;
                *entry = saturate_u8(sum as f32 * lut_scale);
            }
        }
    }

    let inv_tw = 1.0f32 / tile_w as f32;
    let inv_th = 1.0f32 / tile_h as f32;
    let mut out = GrayImage::new(width, height);

    for y in 0..h {
        let tyf = y as f32 * inv_th - 0.5;
        let ty1f = tyf.floor();
        let ya = tyf - ty1f;
        let ty1 = (ty1f as i64).max(0) as usize;
        let ty2 = ((ty1f as i64 + 1) as usize).min(tiles_y - 1);

        for x in 0..w {
            let txf = x as f32 * inv_tw - 0.5;
            let tx1f = txf.floor();
            let xa = txf - tx1f;
            let xa1 = 1.0 - xa;
            let tx1 = (tx1f as i64).max(0) as usize;
            let tx2 = ((tx1f as i64 + 1).max(0) as usize).min(tiles_x - 1);

            let v = raw[y * w + x] as usize;
            let top = luts[ty1 * tiles_x + tx1][v] as f32 * xa1 + luts[ty1 * tiles_x + tx2][v] as f32 * xa;
            let bottom =
                luts[ty2 * tiles_x + tx1][v] as f32 * xa1 + luts[ty2 * tiles_x + tx2][v] as f32 * xa;
            let res = top * (1.0 - ya) + bottom * ya;
            out.put_pixel(x as u32, y as u32, image::Luma([saturate_u8(res)]));
        }
    }
    out
}

/// Clip every bin to `limit` and hand the excess back out evenly
fn clip_histogram(hist: &mut [usize; HIST_SIZE], limit: usize) {
    let mut clipped = 0usize;
    for bin in hist.iter_mut() {
        if *bin > limit {
            clipped += *bin - limit;
            *bin = limit;
        }
    }

    let batch = clipped / HIST_SIZE;
    let mut residual = clipped - batch * HIST_SIZE;
    for bin in hist.iter_mut() {
        *bin += batch;
    }

    if residual != 0 {
        let step = (HIST_SIZE / residual).max(1);
        let mut i = 0;
        while i < HIST_SIZE && residual > 0 {
            hist[i] += 1;
            i += step;
            residual -= 1;
        }
    }
}

fn round_half_even(v: f32) -> f32 {
    v.round_ties_even()
}

fn saturate_u8(v: f32) -> u8 {
    round_half_even(v).clamp(0.0, 255.0) as u8
}
