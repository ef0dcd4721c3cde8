// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! One recompression run over one file.
//!
//! The controller decodes the source once, short-circuits files that
//! already carry the idempotency signature, drives the quality search, and
//! commits the winning bytes through the transplant and publish stages. A
//! run that cannot improve on the original is a defined terminal outcome
//! (skip or copy-through), never an error and never a larger artifact.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info};

use crate::codec::{BaselineCodec, ChromaMode, Codec, MozjpegCodec, calibrate_quality};
use crate::error::{Error, Result};
use crate::metadata::{self, TransplantOptions};
use crate::metric::{self, MetricKind};
use crate::publish;
use crate::raster::RasterImage;
use crate::search::{self, SearchParams};

/// Configuration for one run. Thresholds and the signature are injected, so
/// nothing in the pipeline depends on process-wide state.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub metric: MetricKind,
    /// Acceptance threshold; `None` uses the metric's default.
    pub threshold: Option<f64>,
    /// Fixed sampling stride; `None` or 0 selects adaptively by pixel count.
    pub sample_stride: Option<u32>,
    pub min_quality: u8,
    pub max_quality: u8,
    pub chroma: ChromaMode,
    /// Fast mode: search with step 2.
    pub fast: bool,
    /// Produce the final artifact with mozjpeg at a recalibrated quality.
    /// Search iterations always use the baseline codec.
    pub use_mozjpeg: bool,
    pub transplant: TransplantOptions,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            metric: MetricKind::Psnr,
            threshold: None,
            sample_stride: None,
            min_quality: 70,
            max_quality: 90,
            chroma: ChromaMode::C444,
            fast: false,
            use_mozjpeg: false,
            transplant: TransplantOptions::default(),
        }
    }
}

/// Post-publish checks reported to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verification {
    pub is_smaller_or_equal: bool,
    pub same_permissions: bool,
    pub same_mod_time: bool,
}

/// Outcome record for one run.
#[derive(Debug)]
pub struct RunReport {
    pub size_before: u64,
    pub size_after: u64,
    /// Quality of the written artifact; `None` when nothing was written.
    pub best_quality: Option<u8>,
    /// Source already carried the signature, or no candidate improved on it,
    /// and no explicit output path was given.
    pub skipped: bool,
    /// Same terminal outcomes, but with an explicit output path: the source
    /// bytes were copied through unchanged.
    pub copied: bool,
    pub mse: f64,
    pub ssim: f64,
    pub psnr: f64,
    pub butteraugli: f64,
    pub sample_stride: u32,
    pub elapsed: Duration,
    pub verification: Verification,
}

/// Removes the temporary file on every failure path; disarmed once the
/// artifact has been renamed away.
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl TempGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn sibling_temp(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(".tmp_recompress");
    PathBuf::from(name)
}

fn create_parent_dirs(dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::CreateDir(parent.to_path_buf(), e))?;
        }
    }
    Ok(())
}

fn verify(size_before: u64, mtime: SystemTime, permissions: &fs::Permissions, path: &Path) -> Verification {
    let Ok(meta) = fs::metadata(path) else {
        return Verification::default();
    };
    Verification {
        is_smaller_or_equal: meta.len() <= size_before,
        same_permissions: meta.permissions() == *permissions,
        same_mod_time: meta.modified().is_ok_and(|m| {
            filetime::FileTime::from_system_time(m) == filetime::FileTime::from_system_time(mtime)
        }),
    }
}

/// Terminal no-work outcome: skip in place, or copy the source bytes
/// through when an explicit output path was given.
#[allow(clippy::too_many_arguments)]
fn finish_no_work(
    output: Option<&Path>,
    src_data: &[u8],
    size_before: u64,
    mtime: SystemTime,
    permissions: &fs::Permissions,
    stride: u32,
    input: &Path,
    start: Instant,
) -> Result<RunReport> {
    let mut report = RunReport {
        size_before,
        size_after: size_before,
        best_quality: None,
        skipped: false,
        copied: false,
        mse: 0.0,
        ssim: 0.0,
        psnr: 0.0,
        butteraugli: 0.0,
        sample_stride: stride,
        elapsed: Duration::ZERO,
        verification: Verification::default(),
    };
    match output {
        Some(dest) => {
            create_parent_dirs(dest)?;
            fs::write(dest, src_data).map_err(|e| Error::Publish(dest.to_path_buf(), e))?;
            publish::restore_attributes(dest, mtime, permissions.clone())
                .map_err(|e| Error::Publish(dest.to_path_buf(), e))?;
            report.copied = true;
            report.verification = verify(size_before, mtime, permissions, dest);
        }
        None => {
            report.skipped = true;
            report.verification = verify(size_before, mtime, permissions, input);
        }
    }
    report.elapsed = start.elapsed();
    Ok(report)
}

/// Recompresses `input`, writing the result to `output` (or over `input`
/// when `output` is `None`).
pub fn process_file(
    input: &Path,
    output: Option<&Path>,
    opts: &ProcessOptions,
) -> Result<RunReport> {
    let start = Instant::now();

    let src_meta = fs::metadata(input).map_err(|e| Error::SourceStat(input.to_path_buf(), e))?;
    let size_before = src_meta.len();
    let mtime = src_meta
        .modified()
        .map_err(|e| Error::SourceStat(input.to_path_buf(), e))?;
    let permissions = src_meta.permissions();

    let src_data = fs::read(input).map_err(|e| Error::SourceRead(input.to_path_buf(), e))?;

    if metadata::is_already_processed(&src_data, &opts.transplant.signature) {
        debug!(path = %input.display(), "signature present, already processed");
        return finish_no_work(
            output,
            &src_data,
            size_before,
            mtime,
            &permissions,
            0,
            input,
            start,
        );
    }

    let original = RasterImage::decode(&src_data)?;

    let stride = match opts.sample_stride.filter(|s| *s > 0) {
        Some(fixed) => fixed,
        None => match metric::adaptive_stride(original.pixel_count()) {
            Some(adaptive) => adaptive,
            None => {
                info!(
                    pixels = original.pixel_count(),
                    "image above the sampling ceiling, skipping"
                );
                // Skipped even when an explicit output path was given; the
                // caller gets a skip outcome with no bytes written.
                return finish_no_work(
                    None,
                    &src_data,
                    size_before,
                    mtime,
                    &permissions,
                    0,
                    input,
                    start,
                );
            }
        },
    };

    let threshold = opts
        .threshold
        .unwrap_or_else(|| opts.metric.default_threshold());
    let params = SearchParams::new(opts.min_quality, opts.max_quality, opts.fast);
    let baseline = BaselineCodec;

    debug!(
        metric = %opts.metric,
        threshold,
        stride,
        min_quality = params.min_quality,
        max_quality = params.max_quality,
        "starting quality search"
    );
    let outcome = search::find_lowest_passing_quality(
        &baseline,
        &original,
        opts.metric,
        threshold,
        stride,
        opts.chroma,
        &params,
    );

    let Some(outcome) = outcome else {
        debug!("no candidate satisfied the threshold");
        return finish_no_work(
            output,
            &src_data,
            size_before,
            mtime,
            &permissions,
            stride,
            input,
            start,
        );
    };

    // Recalibration: one extra encode with the alternate codec at the
    // mapped quality. A failure here is fatal, unlike mid-search failures.
    let (best_quality, winning_bytes) = if opts.use_mozjpeg {
        let mapped = calibrate_quality(outcome.quality);
        debug!(
            baseline_quality = outcome.quality,
            mapped, "re-encoding with mozjpeg at recalibrated quality"
        );
        let bytes = MozjpegCodec.encode(&original, mapped, opts.chroma)?;
        (mapped, bytes)
    } else {
        (outcome.quality, outcome.bytes)
    };

    let merged = metadata::transplant(&src_data, &winning_bytes, &opts.transplant)?;

    if merged.len() as u64 > size_before {
        debug!(
            merged = merged.len(),
            size_before, "result larger than source, no gain"
        );
        return finish_no_work(
            output,
            &src_data,
            size_before,
            mtime,
            &permissions,
            stride,
            input,
            start,
        );
    }

    // Final scores of the winning image, for the report.
    let (mse, ssim, psnr, butteraugli) = match baseline.decode(&winning_bytes) {
        Ok(winner) => (
            metric::mse(&original, &winner, stride),
            metric::ssim(&original, &winner, stride),
            metric::psnr(&original, &winner, stride),
            metric::butteraugli_distance(&original, &winner),
        ),
        Err(_) => (0.0, 0.0, 0.0, 0.0),
    };

    // Guard first: a write that fails partway must not leave the partial
    // temporary file behind.
    let temp_path = sibling_temp(input);
    let mut guard = TempGuard::new(temp_path.clone());
    fs::write(&temp_path, &merged).map_err(|e| Error::TempWrite(temp_path.clone(), e))?;

    let target = output.unwrap_or(input);
    if output.is_some() {
        create_parent_dirs(target)?;
    }
    publish::publish(&temp_path, target)?;
    guard.disarm();
    publish::restore_attributes(target, mtime, permissions.clone())
        .map_err(|e| Error::Publish(target.to_path_buf(), e))?;

    let size_after = fs::metadata(target)
        .map_err(|e| Error::Publish(target.to_path_buf(), e))?
        .len();
    let verification = verify(size_before, mtime, &permissions, target);

    info!(
        quality = best_quality,
        size_before, size_after, "recompressed"
    );

    Ok(RunReport {
        size_before,
        size_after,
        best_quality: Some(best_quality),
        skipped: false,
        copied: false,
        mse,
        ssim,
        psnr,
        butteraugli,
        sample_stride: stride,
        elapsed: start.elapsed(),
        verification,
    })
}
