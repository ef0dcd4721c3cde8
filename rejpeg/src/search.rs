// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Binary search for the lowest encoder quality that still satisfies the
//! metric threshold.
//!
//! Each iteration encodes the original at a candidate quality, decodes the
//! result and scores it against the original. A passing candidate narrows
//! the search downward (an even lower quality might still pass); a failing
//! candidate, including one whose encode or decode fails, narrows upward.
//! Encode/decode failures mid-search are therefore never fatal.

use tracing::{debug, warn};

use crate::codec::{ChromaMode, Codec};
use crate::metric::{self, MetricKind};
use crate::raster::RasterImage;

/// Search interval and step configuration.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub min_quality: u8,
    pub max_quality: u8,
    /// Candidate qualities are floor-aligned to this step; 2 in fast mode.
    pub step: u8,
}

impl SearchParams {
    pub fn new(min_quality: u8, max_quality: u8, fast: bool) -> Self {
        Self {
            min_quality,
            max_quality,
            step: if fast { 2 } else { 1 },
        }
    }
}

/// The lowest quality that satisfied the threshold, with its encoded bytes.
pub struct SearchOutcome {
    pub quality: u8,
    pub bytes: Vec<u8>,
}

/// Runs the quality search. Returns `None` when no candidate in the
/// interval satisfies the threshold.
pub fn find_lowest_passing_quality(
    codec: &dyn Codec,
    original: &RasterImage,
    metric: MetricKind,
    threshold: f64,
    stride: u32,
    chroma: ChromaMode,
    params: &SearchParams,
) -> Option<SearchOutcome> {
    let step = i32::from(params.step.max(1));
    let mut low = i32::from(params.min_quality);
    let mut high = i32::from(params.max_quality);
    let mut best: Option<SearchOutcome> = None;

    while low <= high {
        let mut candidate = (low + high) / 2;
        if step > 1 {
            // Floor-align to the step, but never below the current lower
            // bound: the chosen quality must stay inside the interval.
            candidate = ((candidate / step) * step).max(low);
        }
        let quality = candidate.clamp(1, 100) as u8;

        let bytes = match codec.encode(original, quality, chroma) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                warn!(quality, codec = codec.name(), "encoder produced no bytes");
                low = candidate + step;
                continue;
            }
            Err(err) => {
                warn!(quality, codec = codec.name(), %err, "encode failed, trying higher quality");
                low = candidate + step;
                continue;
            }
        };
        let decoded = match codec.decode(&bytes) {
            Ok(img) => img,
            Err(err) => {
                warn!(quality, codec = codec.name(), %err, "decode failed, trying higher quality");
                low = candidate + step;
                continue;
            }
        };

        let result = metric::evaluate(metric, original, &decoded, stride);
        let passed = result.passes(threshold);
        debug!(
            quality,
            metric = %metric,
            score = result.score,
            threshold,
            size = bytes.len(),
            passed,
            "search probe"
        );

        if passed {
            best = Some(SearchOutcome { quality, bytes });
            high = candidate - step;
        } else {
            low = candidate + step;
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use image::{Rgb, RgbImage};

    fn flat(value: u8) -> RasterImage {
        RasterImage::from_rgb(RgbImage::from_pixel(16, 16, Rgb([value, value, value])))
    }

    /// Fake codec: qualities at or above `clean_from` decode back to the
    /// original; lower ones decode to a visibly shifted image.
    struct StepCodec {
        clean_from: u8,
    }

    impl Codec for StepCodec {
        fn name(&self) -> &'static str {
            "step"
        }

        fn encode(&self, _image: &RasterImage, quality: u8, _chroma: ChromaMode) -> Result<Vec<u8>> {
            Ok(vec![quality; 8])
        }

        fn decode(&self, bytes: &[u8]) -> Result<RasterImage> {
            let quality = bytes[0];
            if quality >= self.clean_from {
                Ok(flat(128))
            } else {
                Ok(flat(120))
            }
        }
    }

    /// Codec whose encoder fails below a given quality.
    struct FlakyCodec {
        works_from: u8,
    }

    impl Codec for FlakyCodec {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn encode(&self, _image: &RasterImage, quality: u8, _chroma: ChromaMode) -> Result<Vec<u8>> {
            if quality >= self.works_from {
                Ok(vec![quality; 8])
            } else {
                Err(Error::Encode(quality, "synthetic failure".to_string()))
            }
        }

        fn decode(&self, _bytes: &[u8]) -> Result<RasterImage> {
            Ok(flat(128))
        }
    }

    fn run(codec: &dyn Codec, threshold: f64) -> Option<SearchOutcome> {
        find_lowest_passing_quality(
            codec,
            &flat(128),
            MetricKind::Psnr,
            threshold,
            1,
            ChromaMode::C444,
            &SearchParams::new(70, 90, false),
        )
    }

    #[test]
    fn converges_on_the_lowest_passing_quality() {
        // PSNR of the shifted image is ~30 dB, the clean one 100 dB; a
        // threshold of 50 passes exactly at clean_from and above.
        let outcome = run(&StepCodec { clean_from: 80 }, 50.0).unwrap();
        assert_eq!(outcome.quality, 80);
    }

    #[test]
    fn everything_passing_converges_on_min_quality() {
        let outcome = run(&StepCodec { clean_from: 80 }, 20.0).unwrap();
        assert_eq!(outcome.quality, 70);
    }

    #[test]
    fn impossible_threshold_yields_none() {
        // Even a bit-exact round trip scores the 100.0 PSNR ceiling, so
        // nothing can reach 100.5.
        assert!(run(&StepCodec { clean_from: 80 }, 100.5).is_none());
    }

    #[test]
    fn threshold_monotonicity() {
        // Raising the threshold must never decrease the chosen quality.
        let codec = StepCodec { clean_from: 80 };
        let lenient = run(&codec, 20.0).unwrap().quality;
        let strict = run(&codec, 50.0).unwrap().quality;
        assert!(strict >= lenient);
    }

    #[test]
    fn encode_failures_narrow_toward_higher_quality() {
        let outcome = run(&FlakyCodec { works_from: 85 }, 50.0).unwrap();
        assert_eq!(outcome.quality, 85);
    }

    #[test]
    fn fast_mode_aligns_candidates_to_step() {
        let outcome = find_lowest_passing_quality(
            &StepCodec { clean_from: 1 },
            &flat(128),
            MetricKind::Psnr,
            50.0,
            1,
            ChromaMode::C444,
            &SearchParams::new(70, 90, true),
        )
        .unwrap();
        assert_eq!(outcome.quality % 2, 0);
        assert_eq!(outcome.quality, 70);
    }

    #[test]
    fn fast_mode_never_probes_below_an_odd_min_quality() {
        let outcome = find_lowest_passing_quality(
            &StepCodec { clean_from: 1 },
            &flat(128),
            MetricKind::Psnr,
            50.0,
            1,
            ChromaMode::C444,
            &SearchParams::new(71, 91, true),
        )
        .unwrap();
        // Step alignment would land on 70; the interval floor wins.
        assert_eq!(outcome.quality, 71);
    }
}
