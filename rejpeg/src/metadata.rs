// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Metadata transplant between an original JPEG and a fresh encode.
//!
//! The fresh encode contributes only its image body (tables, frame/scan
//! headers, entropy-coded data); every metadata segment in the output comes
//! from the original file, filtered and reordered here. An APP15 signature
//! segment marks the output as already processed so a later run can skip it.

use tracing::debug;

use crate::container::{self, Segment, SegmentParser};
use crate::error::{Error, Result};

/// Default idempotency signature written into the output's APP15 segment.
pub const DEFAULT_SIGNATURE: &str = "rejpeg.rs";

/// Extended-XMP continuation blocks (APP1) are bulky carriers for depth
/// maps, embedded video and similar payloads.
const XMP_EXTENSION_HEADER: &[u8] = b"http://ns.adobe.com/xmp/exten";
/// Photoshop resource blobs (APP13) embed thumbnails and editor state.
const PHOTOSHOP_HEADER: &[u8] = b"Photoshop ";
/// FlashPix-ready object data (APP2).
const FLASHPIX_HEADER: &[u8] = b"FPXR";

/// How the transplant treats the original's application-data segments.
#[derive(Debug, Clone)]
pub struct TransplantOptions {
    /// Keep every APPn segment, including the bulky ones filtered by default.
    pub keep_all: bool,
    /// Drop every APPn segment; only the signature survives.
    pub skip_all: bool,
    /// Idempotency signature payload. Injectable so tests can use their own.
    pub signature: String,
}

impl Default for TransplantOptions {
    fn default() -> Self {
        Self {
            keep_all: false,
            skip_all: false,
            signature: DEFAULT_SIGNATURE.to_string(),
        }
    }
}

/// Known bulky, low-value payloads dropped unless `keep_all` is set. Every
/// prefix test bounds-checks the payload first; the thresholds are on the
/// self-inclusive length field.
fn is_bulky(segment: &Segment) -> bool {
    let payload = segment.payload();
    let length = segment.length_field();
    match segment.marker {
        0xE1 => length > 35 && payload.starts_with(XMP_EXTENSION_HEADER),
        0xED => length > 14 && payload.starts_with(PHOTOSHOP_HEADER),
        0xE2 => length > 10 && payload.starts_with(FLASHPIX_HEADER),
        _ => false,
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn push_app15(out: &mut Vec<u8>, payload: &[u8]) {
    let length = (payload.len() + 2) as u16;
    out.extend_from_slice(&[0xFF, container::APP15]);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(payload);
}

/// Merges the original's application-data segments into a freshly encoded
/// JPEG. Output layout: SOI, JFIF (if present, repositioned first), the
/// APP15 signature segment, the remaining kept segments in original order,
/// then the fresh encode's image body verbatim.
pub fn transplant(source: &[u8], fresh: &[u8], opts: &TransplantOptions) -> Result<Vec<u8>> {
    if fresh.len() < 2 || fresh[0] != 0xFF || fresh[1] != container::SOI {
        return Err(Error::MergeNotJpeg);
    }

    // A non-JPEG source (e.g. PNG input) has no marker segments to carry
    // over; random 0xFF bytes in it must not be misread as segments.
    let source_is_jpeg = source.len() >= 2 && source[0] == 0xFF && source[1] == container::SOI;

    let mut segments: Vec<Segment> = if opts.skip_all || !source_is_jpeg {
        Vec::new()
    } else {
        SegmentParser::new(source)
            .filter(|s| s.is_app())
            .filter(|s| opts.keep_all || !is_bulky(s))
            .collect()
    };

    let mut out = Vec::with_capacity(fresh.len() + source.len() / 4);
    out.extend_from_slice(&[0xFF, container::SOI]);

    // Browsers and some codecs assume JFIF sits immediately after SOI.
    if let Some(idx) = segments.iter().position(|s| s.marker == container::APP0) {
        out.extend_from_slice(segments.remove(idx).data);
    }

    push_app15(&mut out, opts.signature.as_bytes());

    let mut dropped = 0usize;
    for segment in &segments {
        // A pre-existing copy of our own signature would defeat the
        // uniqueness the idempotency check relies on.
        if segment.marker == container::APP15 && contains(segment.data, opts.signature.as_bytes())
        {
            dropped += 1;
            continue;
        }
        out.extend_from_slice(segment.data);
    }
    debug!(
        kept = segments.len() - dropped,
        dropped_signatures = dropped,
        "transplanted metadata segments"
    );

    match container::image_data_start(fresh) {
        Some(boundary) => out.extend_from_slice(&fresh[boundary..]),
        None => out.extend_from_slice(&fresh[2..]),
    }

    Ok(out)
}

/// True iff an APP15 segment reachable by the marker walk starts with the
/// given signature. This is the authoritative check; no substring fast path
/// is used, so files with large leading segments are still detected.
pub fn is_already_processed(bytes: &[u8], signature: &str) -> bool {
    SegmentParser::new(bytes)
        .filter(|s| s.marker == container::APP15)
        .any(|s| s.payload().starts_with(signature.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::{jpeg_with_segments, raw_segment};

    fn opts() -> TransplantOptions {
        TransplantOptions::default()
    }

    fn app_segments_of(bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
        SegmentParser::new(bytes)
            .filter(|s| s.is_app())
            .map(|s| (s.marker, s.payload().to_vec()))
            .collect()
    }

    #[test]
    fn output_carries_signature_after_soi() {
        let fresh = jpeg_with_segments(&[]);
        let out = transplant(&fresh, &fresh, &opts()).unwrap();
        assert!(is_already_processed(&out, DEFAULT_SIGNATURE));
        // SOI, then APP15 immediately.
        assert_eq!(&out[..2], &[0xFF, 0xD8]);
        assert_eq!(out[2], 0xFF);
        assert_eq!(out[3], container::APP15);
    }

    #[test]
    fn jfif_is_repositioned_first() {
        let exif = raw_segment(0xE1, b"Exif\0\0data");
        let jfif = raw_segment(0xE0, b"JFIF\0\x01\x02");
        let source = jpeg_with_segments(&[exif, jfif.clone()]);
        let fresh = jpeg_with_segments(&[]);
        let out = transplant(&source, &fresh, &opts()).unwrap();
        // JFIF right after SOI, signature after it, Exif after that.
        assert_eq!(&out[2..2 + jfif.len()], &jfif[..]);
        let apps = app_segments_of(&out);
        assert_eq!(apps[0].0, 0xE0);
        assert_eq!(apps[1].0, container::APP15);
        assert_eq!(apps[2].0, 0xE1);
    }

    #[test]
    fn keep_all_preserves_segments_byte_identical() {
        let xmp_ext = {
            let mut payload = XMP_EXTENSION_HEADER.to_vec();
            payload.extend_from_slice(&[0u8; 64]);
            raw_segment(0xE1, &payload)
        };
        let exif = raw_segment(0xE1, b"Exif\0\0data");
        let source = jpeg_with_segments(&[xmp_ext.clone(), exif.clone()]);
        let fresh = jpeg_with_segments(&[]);
        let all = TransplantOptions {
            keep_all: true,
            ..opts()
        };
        let out = transplant(&source, &fresh, &all).unwrap();
        let apps = app_segments_of(&out);
        // Signature plus both originals, in original order.
        assert_eq!(apps.len(), 3);
        assert_eq!(apps[0].0, container::APP15);
        assert!(contains(&out, &xmp_ext));
        assert!(contains(&out, &exif));
    }

    #[test]
    fn bulky_segments_are_filtered_by_default() {
        let mut xmp_payload = XMP_EXTENSION_HEADER.to_vec();
        xmp_payload.extend_from_slice(&[0u8; 64]);
        let mut psd_payload = PHOTOSHOP_HEADER.to_vec();
        psd_payload.extend_from_slice(&[0u8; 32]);
        let mut fpxr_payload = FLASHPIX_HEADER.to_vec();
        fpxr_payload.extend_from_slice(&[0u8; 32]);
        let keep_me = raw_segment(0xE1, b"Exif\0\0data");
        let source = jpeg_with_segments(&[
            raw_segment(0xE1, &xmp_payload),
            raw_segment(0xED, &psd_payload),
            raw_segment(0xE2, &fpxr_payload),
            keep_me.clone(),
        ]);
        let fresh = jpeg_with_segments(&[]);
        let out = transplant(&source, &fresh, &opts()).unwrap();
        let apps = app_segments_of(&out);
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].0, container::APP15);
        assert_eq!(apps[1].1, b"Exif\0\0data");
    }

    #[test]
    fn short_segments_matching_prefix_are_kept() {
        // Length at or below the threshold is never bulky, even with the
        // identifying prefix.
        let source = jpeg_with_segments(&[raw_segment(0xE2, FLASHPIX_HEADER)]);
        let fresh = jpeg_with_segments(&[]);
        let out = transplant(&source, &fresh, &opts()).unwrap();
        assert_eq!(app_segments_of(&out).len(), 2);
    }

    #[test]
    fn skip_all_leaves_only_the_signature() {
        let source = jpeg_with_segments(&[
            raw_segment(0xE0, b"JFIF\0"),
            raw_segment(0xE1, b"Exif\0\0data"),
        ]);
        let fresh = jpeg_with_segments(&[]);
        let none = TransplantOptions {
            skip_all: true,
            ..opts()
        };
        let out = transplant(&source, &fresh, &none).unwrap();
        let apps = app_segments_of(&out);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].0, container::APP15);
        assert_eq!(apps[0].1, DEFAULT_SIGNATURE.as_bytes());
    }

    #[test]
    fn existing_signature_is_not_duplicated() {
        let source = jpeg_with_segments(&[]);
        let fresh = jpeg_with_segments(&[]);
        let first = transplant(&source, &fresh, &opts()).unwrap();
        let second = transplant(&first, &fresh, &opts()).unwrap();
        let count = SegmentParser::new(&second)
            .filter(|s| s.marker == container::APP15)
            .filter(|s| s.payload().starts_with(DEFAULT_SIGNATURE.as_bytes()))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn foreign_app15_segments_survive() {
        let foreign = raw_segment(0xEF, b"someone-elses-marker");
        let source = jpeg_with_segments(&[foreign.clone()]);
        let fresh = jpeg_with_segments(&[]);
        let out = transplant(&source, &fresh, &opts()).unwrap();
        assert!(contains(&out, &foreign));
    }

    #[test]
    fn fresh_encode_metadata_is_discarded() {
        let source = jpeg_with_segments(&[]);
        let fresh = jpeg_with_segments(&[raw_segment(0xE0, b"JFIF\0fresh")]);
        let out = transplant(&source, &fresh, &opts()).unwrap();
        assert!(!contains(&out, b"JFIF\0fresh"));
    }

    #[test]
    fn non_jpeg_source_contributes_no_segments() {
        let mut source = b"\x89PNG\r\n\x1a\n".to_vec();
        // Bytes that would parse as a segment if misread as JPEG.
        source.extend_from_slice(&raw_segment(0xE1, b"not-really-metadata"));
        let fresh = jpeg_with_segments(&[]);
        let out = transplant(&source, &fresh, &opts()).unwrap();
        let apps = app_segments_of(&out);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].0, container::APP15);
    }

    #[test]
    fn non_jpeg_fresh_encode_is_rejected() {
        let source = jpeg_with_segments(&[]);
        assert!(matches!(
            transplant(&source, b"\x89PNG", &opts()),
            Err(Error::MergeNotJpeg)
        ));
    }

    #[test]
    fn zero_length_segment_header_is_not_processed() {
        // Corrupt files hit this check before any decode validation; it
        // must answer false, not panic.
        let corrupt = [0xFF, 0xD8, 0xFF, container::APP15, 0x00, 0x00];
        assert!(!is_already_processed(&corrupt, DEFAULT_SIGNATURE));
    }

    #[test]
    fn custom_signature_round_trips() {
        let source = jpeg_with_segments(&[]);
        let fresh = jpeg_with_segments(&[]);
        let custom = TransplantOptions {
            signature: "unit-test-sig".to_string(),
            ..opts()
        };
        let out = transplant(&source, &fresh, &custom).unwrap();
        assert!(is_already_processed(&out, "unit-test-sig"));
        assert!(!is_already_processed(&out, DEFAULT_SIGNATURE));
    }
}
