//! Synthetic scans for unit tests

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Draw a fake axial slice: an elliptical head, plus a bright blob for tumors
pub fn synthetic_scan(width: u32, height: u32, tumor: bool, seed: u64) -> DynamicImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let (rx, ry) = (width as f32 * 0.4, height as f32 * 0.45);
    let blob = (
        cx + rng.gen_range(-0.15..0.15) * width as f32,
        cy + rng.gen_range(-0.15..0.15) * height as f32,
        width.min(height) as f32 * rng.gen_range(0.08..0.14),
    );

    let img = RgbImage::from_fn(width, height, |x, y| {
        let (fx, fy) = (x as f32, y as f32);
        let inside = ((fx - cx) / rx).powi(2) + ((fy - cy) / ry).powi(2) <= 1.0;
        let mut v: f32 = if inside { 110.0 } else { 8.0 };
        if tumor && inside {
            let d = ((fx - blob.0).powi(2) + (fy - blob.1).powi(2)).sqrt();
            if d < blob.2 {
                v = 230.0;
            }
        }
        v += rng.gen_range(-12.0..12.0);
        let v = v.clamp(0.0, 255.0) as u8;
        Rgb([v, v, v])
    });
    DynamicImage::ImageRgb8(img)
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), format)
        .expect("encode synthetic image");
    buf
}

/// Lay out `per_class` PNG scans under `root/no-tumor` and `root/tumor`
pub fn write_dataset(root: &Path, per_class: usize, size: u32) {
    for (dir, tumor) in [("no-tumor", false), ("tumor", true)] {
        let class_dir = root.join(dir);
        std::fs::create_dir_all(&class_dir).expect("create class dir");
        for i in 0..per_class {
            let seed = i as u64 * 2 + tumor as u64;
            synthetic_scan(size, size, tumor, seed)
                .save(class_dir.join(format!("scan_{:03}.png", i)))
                .expect("save synthetic scan");
        }
    }
}
