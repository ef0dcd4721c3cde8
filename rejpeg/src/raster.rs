// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use image::{RgbImage, imageops};

use crate::error::Result;

/// Decoded pixel grid in 8-bit RGB, immutable once constructed.
///
/// All metric evaluation and encoding goes through this type so that the
/// codec crates stay confined to the `codec` and `metric` modules.
#[derive(Clone)]
pub struct RasterImage {
    rgb: RgbImage,
}

impl RasterImage {
    /// Decodes any raster format the `image` crate understands.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self {
            rgb: decoded.to_rgb8(),
        })
    }

    pub fn from_rgb(rgb: RgbImage) -> Self {
        Self { rgb }
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.rgb.width()) * u64::from(self.rgb.height())
    }

    /// Raw interleaved RGB bytes, row-major.
    pub fn as_raw(&self) -> &[u8] {
        self.rgb.as_raw()
    }

    #[inline]
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        self.rgb.get_pixel(x, y).0
    }

    /// Rec. 601 luma of the pixel at (x, y), in [0, 255].
    #[inline]
    pub fn luminance(&self, x: u32, y: u32) -> f64 {
        let [r, g, b] = self.rgb(x, y);
        0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)
    }

    /// Bilinear downscale to the given size.
    pub fn downscale_bilinear(&self, width: u32, height: u32) -> Self {
        Self {
            rgb: imageops::resize(
                &self.rgb,
                width.max(1),
                height.max(1),
                imageops::FilterType::Triangle,
            ),
        }
    }
}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RasterImage({}x{})", self.width(), self.height())
    }
}
