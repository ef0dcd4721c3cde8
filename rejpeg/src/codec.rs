// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Codec services behind a common trait.
//!
//! The quality search always probes with [`BaselineCodec`] for speed and
//! threshold consistency; [`MozjpegCodec`] is the higher-efficiency backend
//! used, at a recalibrated quality, for the final artifact only.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;

use crate::error::{Error, Result};
use crate::raster::RasterImage;

/// Chroma subsampling mode passed to encoders that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaMode {
    /// Full-resolution chroma.
    C444,
    /// Half-horizontal chroma.
    C422,
    /// Quarter-resolution chroma.
    C420,
}

impl std::str::FromStr for ChromaMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "444" => Ok(ChromaMode::C444),
            "422" => Ok(ChromaMode::C422),
            "420" => Ok(ChromaMode::C420),
            _ => Err(format!(
                "invalid chroma subsampling '{s}' (use 444, 422 or 420)"
            )),
        }
    }
}

impl std::fmt::Display for ChromaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChromaMode::C444 => "444",
            ChromaMode::C422 => "422",
            ChromaMode::C420 => "420",
        })
    }
}

/// JPEG encode/decode service. An `Ok` result with empty bytes is still a
/// failure for callers; implementations must not produce it for valid input.
pub trait Codec {
    fn name(&self) -> &'static str;

    fn encode(&self, image: &RasterImage, quality: u8, chroma: ChromaMode) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<RasterImage> {
        RasterImage::decode(bytes)
    }
}

/// Baseline encoder backed by the `image` crate. Chroma subsampling is not
/// configurable here; the mode only applies to [`MozjpegCodec`].
pub struct BaselineCodec;

impl Codec for BaselineCodec {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn encode(&self, image: &RasterImage, quality: u8, _chroma: ChromaMode) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| Error::Encode(quality, e.to_string()))?;
        Ok(out.into_inner())
    }
}

/// mozjpeg encoder with trellis optimization and chroma subsampling control.
pub struct MozjpegCodec;

impl Codec for MozjpegCodec {
    fn name(&self) -> &'static str {
        "mozjpeg"
    }

    fn encode(&self, image: &RasterImage, quality: u8, chroma: ChromaMode) -> Result<Vec<u8>> {
        let width = image.width() as usize;
        let height = image.height() as usize;
        // Pixel size of one chroma sample, (horizontal, vertical).
        let size = match chroma {
            ChromaMode::C444 => (1, 1),
            ChromaMode::C422 => (2, 1),
            ChromaMode::C420 => (2, 2),
        };

        let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
        comp.set_size(width, height);
        comp.set_quality(f32::from(quality));
        comp.set_chroma_sampling_pixel_sizes(size, size);

        let mut out = Vec::with_capacity(width * height / 4);
        let mut started = comp
            .start_compress(&mut out)
            .map_err(|e| Error::Encode(quality, e.to_string()))?;
        for row in image.as_raw().chunks(width * 3) {
            started
                .write_scanlines(row)
                .map_err(|e| Error::Encode(quality, e.to_string()))?;
        }
        started
            .finish()
            .map_err(|e| Error::Encode(quality, e.to_string()))?;
        Ok(out)
    }
}

/// Empirical baseline-to-mozjpeg quality mapping, as (low, high, adjust)
/// bands over the baseline quality. mozjpeg reaches visual parity with the
/// baseline encoder at a lower setting, and the required correction grows as
/// baseline quality drops; this encodes a calibration, not a law, hence the
/// explicit table.
const QUALITY_CALIBRATION: [(u8, u8, i8); 5] = [
    (90, 100, -2),
    (80, 89, -3),
    (70, 79, -5),
    (60, 69, -7),
    (1, 59, -9),
];

/// Maps a baseline quality chosen by the search to the visually equivalent
/// mozjpeg quality, clamped to [1, 100].
pub fn calibrate_quality(baseline_quality: u8) -> u8 {
    for (low, high, adjust) in QUALITY_CALIBRATION {
        if (low..=high).contains(&baseline_quality) {
            return (i16::from(baseline_quality) + i16::from(adjust)).clamp(1, 100) as u8;
        }
    }
    baseline_quality
}
