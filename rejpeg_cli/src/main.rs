// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;

use rejpeg::codec::ChromaMode;
use rejpeg::metadata::TransplantOptions;
use rejpeg::metric::MetricKind;
use rejpeg::pipeline::{ProcessOptions, RunReport, process_file};

#[derive(Parser)]
#[command(name = "rejpeg", version, about = "Recompress a JPEG within a perceptual-quality bound")]
struct Opt {
    /// Source file
    #[clap(long)]
    input: PathBuf,

    /// Destination file; the source is overwritten when omitted
    #[clap(long)]
    output: Option<PathBuf>,

    /// Metric: psnr, ssim, mse or butteraugli
    #[clap(long, default_value = "psnr")]
    metric: MetricKind,

    /// Threshold (defaults: PSNR=38.5, SSIM=0.99, MSE=0.99995, butteraugli=1.0)
    #[clap(long)]
    threshold: Option<f64>,

    /// Sub-sampling stride (0 = auto by pixel count)
    #[clap(long, default_value_t = 0)]
    sample: u32,

    /// Minimum quality
    #[clap(long, default_value_t = 70, value_parser = clap::value_parser!(u8).range(1..=100))]
    min_quality: u8,

    /// Maximum quality
    #[clap(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
    max_quality: u8,

    /// Chroma subsampling for the mozjpeg encoder: 444, 422, 420
    #[clap(long, default_value = "444")]
    chroma_subsampling: ChromaMode,

    /// Keep all metadata, including bulky extended-XMP/Photoshop/FlashPix blobs
    #[clap(long)]
    keep_all_metadata: bool,

    /// Strip all metadata
    #[clap(long)]
    skip_metadata: bool,

    /// Suppress the JSON report
    #[clap(long)]
    quiet: bool,

    /// Verbose search diagnostics on stderr
    #[clap(long)]
    debug: bool,

    /// Fast mode: search with quality step 2
    #[clap(long)]
    fast: bool,

    /// Write the final artifact with mozjpeg at a recalibrated quality
    /// (implies the butteraugli metric)
    #[clap(long)]
    mozjpeg: bool,
}

#[derive(Serialize)]
struct VerificationOut {
    is_smaller_or_equal: bool,
    same_permissions: bool,
    same_mod_time: bool,
}

#[derive(Serialize)]
struct FinalOutput {
    status: &'static str,
    input: String,
    output: String,
    size_before_bytes: u64,
    size_after_bytes: u64,
    gain_percent: f64,
    best_q: u8,
    metric_used: String,
    threshold: f64,
    sample: u32,
    mse: f64,
    ssim: f64,
    psnr_db: f64,
    butteraugli_score: f64,
    execution_time: String,
    test_results: VerificationOut,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: &'static str,
    file: String,
    details: String,
}

fn format_duration(elapsed: Duration) -> String {
    if elapsed.as_secs() >= 1 {
        format!("{:.3}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn status_of(report: &RunReport) -> &'static str {
    if report.skipped {
        "SKIPPED"
    } else if report.copied {
        "COPIED_NO_GAIN"
    } else {
        "SUCCESS"
    }
}

fn main() -> ExitCode {
    let mut opt = Opt::parse();

    {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};
        let filter = if opt.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::from_default_env()
        };
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    if opt.mozjpeg {
        opt.metric = MetricKind::Butteraugli;
    }

    let options = ProcessOptions {
        metric: opt.metric,
        threshold: opt.threshold,
        sample_stride: (opt.sample > 0).then_some(opt.sample),
        min_quality: opt.min_quality,
        max_quality: opt.max_quality,
        chroma: opt.chroma_subsampling,
        fast: opt.fast,
        use_mozjpeg: opt.mozjpeg,
        transplant: TransplantOptions {
            keep_all: opt.keep_all_metadata,
            skip_all: opt.skip_metadata,
            ..TransplantOptions::default()
        },
    };

    let report = match process_file(&opt.input, opt.output.as_deref(), &options) {
        Ok(report) => report,
        Err(err) => {
            let out = ErrorOutput {
                error: "Processing failed",
                file: opt.input.display().to_string(),
                details: err.to_string(),
            };
            eprintln!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| err.to_string())
            );
            return ExitCode::FAILURE;
        }
    };

    let status = status_of(&report);
    let gain = if report.size_before > 0 {
        100.0 - (report.size_after as f64 / report.size_before as f64 * 100.0)
    } else {
        0.0
    };
    let verification = &report.verification;
    let is_perfect = status == "SUCCESS"
        && verification.is_smaller_or_equal
        && verification.same_permissions
        && verification.same_mod_time;
    let exit_zero = is_perfect
        || (opt.output.is_none() && report.skipped)
        || (opt.output.is_some() && report.copied);

    if !opt.quiet {
        let final_dest = opt
            .output
            .as_ref()
            .unwrap_or(&opt.input)
            .display()
            .to_string();
        let out = FinalOutput {
            status,
            input: opt.input.display().to_string(),
            output: final_dest,
            size_before_bytes: report.size_before,
            size_after_bytes: report.size_after,
            gain_percent: round_to(gain, 1),
            best_q: report.best_quality.unwrap_or(0),
            metric_used: opt.metric.as_str().to_uppercase(),
            threshold: opt
                .threshold
                .unwrap_or_else(|| opt.metric.default_threshold()),
            sample: report.sample_stride,
            mse: report.mse,
            ssim: report.ssim,
            psnr_db: round_to(report.psnr, 1),
            butteraugli_score: round_to(report.butteraugli, 3),
            execution_time: format_duration(report.elapsed),
            test_results: VerificationOut {
                is_smaller_or_equal: verification.is_smaller_or_equal,
                same_permissions: verification.same_permissions,
                same_mod_time: verification.same_mod_time,
            },
        };
        match serde_json::to_string(&out) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("{{\"error\": \"Report serialization failed: {err}\"}}");
                return ExitCode::FAILURE;
            }
        }
    }

    if exit_zero {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
