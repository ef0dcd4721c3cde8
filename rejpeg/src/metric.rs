// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Fidelity metrics between an original and a re-encoded image.
//!
//! The three pixel-error metrics (MSE, PSNR, SSIM) sample the pixel grid at
//! a configurable stride; the perceptual metric delegates to butteraugli and
//! bounds its cost by downscaling instead. Polarity differs: butteraugli
//! scores are better when *smaller*, the rest when *larger*, which
//! [`MetricKind::is_better`] encapsulates so the search loop stays
//! metric-agnostic.

use butteraugli::{ButteraugliParams, compute_butteraugli};

use crate::raster::RasterImage;

/// Pixel budget above which butteraugli inputs are downscaled first.
pub const BUTTERAUGLI_PIXEL_BUDGET: u64 = 500_000;

/// Pixel count above which adaptive sampling gives up entirely and the file
/// must be skipped.
pub const ADAPTIVE_SAMPLING_CEILING: u64 = 128_000_000;

const SSIM_C1: f64 = 6.5025;
const SSIM_C2: f64 = 58.5225;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Mse,
    Psnr,
    Ssim,
    Butteraugli,
}

impl MetricKind {
    /// Default acceptance threshold when the caller pins none.
    pub fn default_threshold(self) -> f64 {
        match self {
            MetricKind::Mse => 0.99995,
            MetricKind::Psnr => 38.5,
            MetricKind::Ssim => 0.99,
            MetricKind::Butteraugli => 1.0,
        }
    }

    /// Whether `score` satisfies `threshold` under this metric's polarity.
    pub fn is_better(self, score: f64, threshold: f64) -> bool {
        match self {
            MetricKind::Butteraugli => score <= threshold,
            _ => score >= threshold,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Mse => "mse",
            MetricKind::Psnr => "psnr",
            MetricKind::Ssim => "ssim",
            MetricKind::Butteraugli => "butteraugli",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mse" => Ok(MetricKind::Mse),
            "psnr" => Ok(MetricKind::Psnr),
            "ssim" => Ok(MetricKind::Ssim),
            "butteraugli" => Ok(MetricKind::Butteraugli),
            _ => Err(format!(
                "unknown metric '{s}' (use psnr, ssim, mse or butteraugli)"
            )),
        }
    }
}

/// One candidate evaluation.
#[derive(Debug, Clone, Copy)]
pub struct MetricResult {
    pub kind: MetricKind,
    pub score: f64,
    pub sample_stride: u32,
}

impl MetricResult {
    pub fn passes(&self, threshold: f64) -> bool {
        self.kind.is_better(self.score, threshold)
    }
}

/// Scores one candidate and records the stride it was sampled at.
pub fn evaluate(
    kind: MetricKind,
    original: &RasterImage,
    candidate: &RasterImage,
    stride: u32,
) -> MetricResult {
    MetricResult {
        kind,
        score: score(kind, original, candidate, stride),
        sample_stride: stride,
    }
}

/// Stride for spatially subsampling the metric loops, by pixel count.
/// `None` means even subsampled evaluation is deemed prohibitive.
pub fn adaptive_stride(pixels: u64) -> Option<u32> {
    if pixels > ADAPTIVE_SAMPLING_CEILING {
        return None;
    }
    Some(match pixels {
        0..=1_000_000 => 1,
        1_000_001..=4_000_000 => 2,
        4_000_001..=16_000_000 => 4,
        16_000_001..=64_000_000 => 8,
        _ => 16,
    })
}

/// Similarity score of `candidate` against `original` under `kind`, sampled
/// at `stride`. For MSE this is the similarity `1 - mse`, so that all
/// higher-is-better metrics threshold the same way.
pub fn score(
    kind: MetricKind,
    original: &RasterImage,
    candidate: &RasterImage,
    stride: u32,
) -> f64 {
    match kind {
        MetricKind::Mse => 1.0 - mse(original, candidate, stride),
        MetricKind::Psnr => psnr(original, candidate, stride),
        MetricKind::Ssim => ssim(original, candidate, stride),
        MetricKind::Butteraugli => butteraugli_distance(original, candidate),
    }
}

/// Mean squared channel difference on the 8-bit scale, before
/// normalization. Shared by MSE and PSNR.
fn mean_squared_error_raw(a: &RasterImage, b: &RasterImage, stride: u32) -> f64 {
    let stride = stride.max(1);
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());
    let mut sum = 0.0;
    let mut count = 0.0;
    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            let pa = a.rgb(x, y);
            let pb = b.rgb(x, y);
            let dr = f64::from(pa[0]) - f64::from(pb[0]);
            let dg = f64::from(pa[1]) - f64::from(pb[1]);
            let db = f64::from(pa[2]) - f64::from(pb[2]);
            sum += (dr * dr + dg * dg + db * db) / 3.0;
            count += 1.0;
            x += stride;
        }
        y += stride;
    }
    if count == 0.0 { 0.0 } else { sum / count }
}

/// MSE normalized to [0, 1] by the squared 8-bit range.
pub fn mse(a: &RasterImage, b: &RasterImage, stride: u32) -> f64 {
    mean_squared_error_raw(a, b, stride) / (255.0 * 255.0)
}

/// PSNR in dB; identical images return the 100.0 ceiling instead of +inf.
pub fn psnr(a: &RasterImage, b: &RasterImage, stride: u32) -> f64 {
    let raw = mean_squared_error_raw(a, b, stride);
    if raw == 0.0 {
        return 100.0;
    }
    20.0 * 255.0_f64.log10() - 10.0 * raw.log10()
}

/// Mean SSIM over non-overlapping 8x8 luma blocks. Block stride is
/// `8 * stride` so subsampling skips whole blocks rather than thinning them.
pub fn ssim(a: &RasterImage, b: &RasterImage, stride: u32) -> f64 {
    let stride = stride.max(1);
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());
    let step = 8 * stride;
    let mut total = 0.0;
    let mut blocks = 0.0;
    let mut by = 0;
    while by < height {
        let mut bx = 0;
        while bx < width {
            let mut mean_a = 0.0;
            let mut mean_b = 0.0;
            let mut n = 0.0;
            for y in by..(by + 8).min(height) {
                for x in bx..(bx + 8).min(width) {
                    mean_a += a.luminance(x, y);
                    mean_b += b.luminance(x, y);
                    n += 1.0;
                }
            }
            mean_a /= n;
            mean_b /= n;
            let mut var_a = 0.0;
            let mut var_b = 0.0;
            let mut covar = 0.0;
            for y in by..(by + 8).min(height) {
                for x in bx..(bx + 8).min(width) {
                    let da = a.luminance(x, y) - mean_a;
                    let db = b.luminance(x, y) - mean_b;
                    var_a += da * da;
                    var_b += db * db;
                    covar += da * db;
                }
            }
            if n > 1.0 {
                // Sample variance.
                var_a /= n - 1.0;
                var_b /= n - 1.0;
                covar /= n - 1.0;
            } else {
                var_a = 0.0;
                var_b = 0.0;
                covar = 0.0;
            }
            total += ((2.0 * mean_a * mean_b + SSIM_C1) * (2.0 * covar + SSIM_C2))
                / ((mean_a * mean_a + mean_b * mean_b + SSIM_C1) * (var_a + var_b + SSIM_C2));
            blocks += 1.0;
            bx += step;
        }
        by += step;
    }
    if blocks == 0.0 { 1.0 } else { total / blocks }
}

/// Butteraugli perceptual distance; smaller is better. Inputs above the
/// pixel budget are bilinearly downscaled to a common size first, trading
/// fidelity for bounded evaluation cost.
pub fn butteraugli_distance(a: &RasterImage, b: &RasterImage) -> f64 {
    let params = ButteraugliParams::default();
    let pixels = a.pixel_count();
    if pixels <= BUTTERAUGLI_PIXEL_BUDGET {
        let result = compute_butteraugli(
            a.as_raw(),
            b.as_raw(),
            a.width() as usize,
            a.height() as usize,
            &params,
        );
        return result.unwrap().score as f64;
    }
    let scale = (BUTTERAUGLI_PIXEL_BUDGET as f64 / pixels as f64).sqrt();
    let width = (f64::from(a.width()) * scale) as u32;
    let height = (f64::from(a.height()) * scale) as u32;
    let small_a = a.downscale_bilinear(width, height);
    let small_b = b.downscale_bilinear(width, height);
    let result = compute_butteraugli(
        small_a.as_raw(),
        small_b.as_raw(),
        small_a.width() as usize,
        small_a.height() as usize,
        &params,
    );
    result.unwrap().score as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> RasterImage {
        RasterImage::from_rgb(RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                ((x + y) % 256) as u8,
            ])
        }))
    }

    #[test]
    fn identity_scores() {
        let img = gradient(32, 32);
        assert_eq!(mse(&img, &img, 1), 0.0);
        assert_eq!(psnr(&img, &img, 1), 100.0);
        assert!((ssim(&img, &img, 1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mse_normalization_bounds() {
        let black = RasterImage::from_rgb(RgbImage::from_pixel(8, 8, Rgb([0, 0, 0])));
        let white = RasterImage::from_rgb(RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])));
        assert!((mse(&black, &white, 1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn psnr_drops_with_distortion() {
        let img = gradient(32, 32);
        let noisy = RasterImage::from_rgb(RgbImage::from_fn(32, 32, |x, y| {
            let [r, g, b] = img.rgb(x, y);
            Rgb([r.saturating_add(2), g, b])
        }));
        let heavy = RasterImage::from_rgb(RgbImage::from_fn(32, 32, |x, y| {
            let [r, g, b] = img.rgb(x, y);
            Rgb([r.saturating_add(30), g.saturating_add(30), b])
        }));
        assert!(psnr(&img, &noisy, 1) > psnr(&img, &heavy, 1));
    }

    #[test]
    fn ssim_penalizes_structure_loss() {
        let img = gradient(64, 64);
        let flat = RasterImage::from_rgb(RgbImage::from_pixel(64, 64, Rgb([128, 128, 128])));
        assert!(ssim(&img, &img, 1) > ssim(&img, &flat, 1));
    }

    #[test]
    fn polarity_flip_for_butteraugli() {
        assert!(MetricKind::Psnr.is_better(40.0, 38.5));
        assert!(!MetricKind::Psnr.is_better(30.0, 38.5));
        assert!(MetricKind::Butteraugli.is_better(0.8, 1.0));
        assert!(!MetricKind::Butteraugli.is_better(1.2, 1.0));
    }

    #[test]
    fn adaptive_stride_bands() {
        assert_eq!(adaptive_stride(1), Some(1));
        assert_eq!(adaptive_stride(1_000_000), Some(1));
        assert_eq!(adaptive_stride(1_000_001), Some(2));
        assert_eq!(adaptive_stride(4_000_001), Some(4));
        assert_eq!(adaptive_stride(16_000_001), Some(8));
        assert_eq!(adaptive_stride(64_000_001), Some(16));
        assert_eq!(adaptive_stride(128_000_000), Some(16));
        assert_eq!(adaptive_stride(128_000_001), None);
    }

    #[test]
    fn subsampled_mse_tracks_full_evaluation() {
        let img = gradient(64, 64);
        let heavy = RasterImage::from_rgb(RgbImage::from_fn(64, 64, |x, y| {
            let [r, g, b] = img.rgb(x, y);
            Rgb([r.saturating_add(20), g, b])
        }));
        let full = mse(&img, &heavy, 1);
        let sampled = mse(&img, &heavy, 4);
        assert!((full - sampled).abs() < full * 0.5);
    }

    #[test]
    fn metric_kind_parses() {
        assert_eq!("PSNR".parse::<MetricKind>().unwrap(), MetricKind::Psnr);
        assert_eq!(
            "butteraugli".parse::<MetricKind>().unwrap(),
            MetricKind::Butteraugli
        );
        assert!("dssim".parse::<MetricKind>().is_err());
    }
}
