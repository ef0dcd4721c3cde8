// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Marker-level JPEG container walk.
//!
//! A [`SegmentParser`] is a pull-based cursor over a fixed byte buffer. It
//! yields one [`Segment`] per length-prefixed marker segment and stops at the
//! first start-of-scan or start-of-frame marker; everything from that point
//! onward is compressed image data and is never reinterpreted. Truncated
//! length fields end the walk instead of raising an error.

use byteorder::{BigEndian, ByteOrder};

/// Start of image.
pub const SOI: u8 = 0xD8;
/// Baseline start of frame.
pub const SOF0: u8 = 0xC0;
/// Progressive start of frame.
pub const SOF2: u8 = 0xC2;
/// Start of scan.
pub const SOS: u8 = 0xDA;
/// First application-data marker (APP0).
pub const APP0: u8 = 0xE0;
/// Last application-data marker (APP15).
pub const APP15: u8 = 0xEF;
/// Comment marker.
pub const COM: u8 = 0xFE;

/// Classification of a marker segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// APPn segment; the payload carries embedded metadata.
    App(u8),
    Comment,
    Other(u8),
}

/// One length-prefixed segment: marker prefix, marker code, big-endian
/// length and payload, as a borrowed slice of the source buffer.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    /// Marker code (the byte after 0xFF).
    pub marker: u8,
    /// Full segment bytes: `FF`, marker, length, payload.
    pub data: &'a [u8],
}

impl<'a> Segment<'a> {
    pub fn kind(&self) -> SegmentKind {
        match self.marker {
            m @ APP0..=APP15 => SegmentKind::App(m - APP0),
            COM => SegmentKind::Comment,
            m => SegmentKind::Other(m),
        }
    }

    pub fn is_app(&self) -> bool {
        (APP0..=APP15).contains(&self.marker)
    }

    /// Value of the self-inclusive length field.
    pub fn length_field(&self) -> u16 {
        BigEndian::read_u16(&self.data[2..4])
    }

    /// Segment payload (everything after the length field).
    pub fn payload(&self) -> &'a [u8] {
        &self.data[4..]
    }
}

/// Pull-based segment cursor. Yields segments until the first SOS/SOF
/// marker or until the buffer runs out of well-formed headers.
pub struct SegmentParser<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> SegmentParser<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for SegmentParser<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        if self.done {
            return None;
        }
        while self.pos + 1 < self.buf.len() {
            if self.buf[self.pos] != 0xFF {
                self.pos += 1;
                continue;
            }
            let marker = self.buf[self.pos + 1];
            // 0xFF00 is a stuffed data byte, 0xFFFF is fill.
            if marker == 0x00 || marker == 0xFF {
                self.pos += 1;
                continue;
            }
            if marker == SOI {
                self.pos += 2;
                continue;
            }
            if marker == SOS || marker == SOF0 || marker == SOF2 {
                break;
            }
            if self.pos + 3 >= self.buf.len() {
                break;
            }
            let length = BigEndian::read_u16(&self.buf[self.pos + 2..self.pos + 4]) as usize;
            if length < 2 {
                // Malformed: the self-inclusive length cannot cover itself.
                break;
            }
            let end = self.pos + 2 + length;
            if end > self.buf.len() {
                // Truncated segment: treat as end of headers.
                break;
            }
            let segment = Segment {
                marker,
                data: &self.buf[self.pos..end],
            };
            self.pos = end;
            return Some(segment);
        }
        self.done = true;
        None
    }
}

/// Offset of the image-data boundary: the first marker that is neither SOI
/// nor an APPn/COM segment. Everything from this offset onward (tables,
/// frame/scan headers, entropy-coded data) belongs to the image body.
pub fn image_data_start(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while pos + 1 < buf.len() {
        if buf[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = buf[pos + 1];
        if marker == 0x00 || marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == SOI {
            pos += 2;
            continue;
        }
        if !(APP0..=APP15).contains(&marker) && marker != COM {
            return Some(pos);
        }
        if pos + 3 >= buf.len() {
            return None;
        }
        let length = BigEndian::read_u16(&buf[pos + 2..pos + 4]) as usize;
        if length < 2 || pos + 2 + length > buf.len() {
            return None;
        }
        pos += 2 + length;
    }
    None
}
