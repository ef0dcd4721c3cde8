// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide error type. Every variant names the stage that failed so the
/// caller can report decode vs. encode vs. merge vs. publish failures
/// distinctly.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot stat source {}: {}", .0.display(), .1)]
    SourceStat(PathBuf, std::io::Error),
    #[error("Cannot read source {}: {}", .0.display(), .1)]
    SourceRead(PathBuf, std::io::Error),
    #[error("Decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Encode failed at quality {0}: {1}")]
    Encode(u8, String),
    #[error("Metadata merge failed: encoder output is not a JPEG stream")]
    MergeNotJpeg,
    #[error("Cannot create destination directory {}: {}", .0.display(), .1)]
    CreateDir(PathBuf, std::io::Error),
    #[error("Cannot write temporary file {}: {}", .0.display(), .1)]
    TempWrite(PathBuf, std::io::Error),
    #[error("Cannot publish {}: {}", .0.display(), .1)]
    Publish(PathBuf, std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
