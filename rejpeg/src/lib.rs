// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Recompresses a raster image into a smaller JPEG that stays within a
//! perceptual-quality bound, preserving metadata across the re-encode and
//! stamping the output so repeat runs are skipped.

#![deny(unsafe_code)]
pub mod codec;
pub mod container;
pub mod error;
pub mod metadata;
pub mod metric;
pub mod pipeline;
pub mod publish;
pub mod raster;
pub mod search;
