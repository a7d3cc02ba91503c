// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Pixel format translation.
//!
//! Packs the server's RGBA8 framebuffer into whatever bit layout the client
//! asked for: quantize each 16-bit channel down to the client's per-channel
//! max, compose the channels at the client's shifts, and emit the word at
//! the client's width and byte order.
//!
//! Two paths exist. The generic path works pixel-by-pixel for every
//! supported `(bpp, endian, shifts, maxes)` combination. The fast path
//! handles the widely requested "Thousands" profile by packing the
//! contiguous RGBA buffer two output bytes per pixel through a reusable
//! scratch buffer; it only applies to full-frame rectangles, since it walks
//! the pixel buffer without honouring a sub-rectangle's row stride.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, RfbError};
use crate::framebuffer::{DirtyRegion, Framebuffer};
use crate::protocol::PixelFormat;

/// Quantizes a 16-bit channel value to the client's channel max.
///
/// Only the two max values seen from real clients are supported; anything
/// else is a fatal protocol error for this implementation.
pub(crate) fn quantize(v: u16, max: u16) -> Result<u32> {
    match max {
        0x1f => Ok(u32::from(v >> (16 - 5))),
        0x03 => Ok(u32::from(v >> (16 - 2))),
        other => Err(RfbError::UnsupportedChannelMax(other)),
    }
}

/// Composes one packed pixel word from 16-bit channel values.
///
/// A shift at or past the word width drops that channel instead of
/// panicking; what the client asked for cannot be represented anyway.
pub(crate) fn pack_pixel(format: &PixelFormat, r: u16, g: u16, b: u16) -> Result<u32> {
    let r = quantize(r, format.red_max)?;
    let g = quantize(g, format.green_max)?;
    let b = quantize(b, format.blue_max)?;
    Ok(shifted(r, format.red_shift) | shifted(g, format.green_shift) | shifted(b, format.blue_shift))
}

fn shifted(channel: u32, shift: u8) -> u32 {
    channel.checked_shl(u32::from(shift)).unwrap_or(0)
}

/// Emits a packed word at the client's pixel width and byte order.
#[allow(clippy::cast_possible_truncation)] // truncation to bpp bits is the wire format
pub(crate) fn put_word(buf: &mut BytesMut, format: &PixelFormat, word: u32) -> Result<()> {
    match (format.bits_per_pixel, format.big_endian_flag != 0) {
        (8, _) => buf.put_u8(word as u8),
        (16, true) => buf.put_u16(word as u16),
        (16, false) => buf.put_u16_le(word as u16),
        (32, true) => buf.put_u32(word),
        (32, false) => buf.put_u32_le(word),
        (bpp, _) => return Err(RfbError::UnsupportedBitsPerPixel(bpp)),
    }
    Ok(())
}

/// Packs one rectangle of the framebuffer into `out`.
///
/// `scratch` is the caller's reusable pack buffer; it grows to
/// `pixels * 2` on the first fast-path frame and is reused afterwards.
pub(crate) fn encode_rect(
    fb: &Framebuffer,
    rect: DirtyRegion,
    format: &PixelFormat,
    scratch: &mut Vec<u8>,
    out: &mut BytesMut,
) -> Result<()> {
    if format.is_thousands() && rect == fb.bounds() {
        let n = encode_thousands(fb, format.big_endian_flag != 0, scratch);
        out.extend_from_slice(&scratch[..n]);
        return Ok(());
    }

    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            let (r, g, b) = fb.rgb16_at(x, y);
            let word = pack_pixel(format, r, g, b)?;
            put_word(out, format, word)?;
        }
    }
    Ok(())
}

/// Fast path: packs the whole RGBA buffer into 16bpp 5-5-5 words with
/// shifts 10/5/0. Returns the number of bytes written into `scratch`.
fn encode_thousands(fb: &Framebuffer, big_endian: bool, scratch: &mut Vec<u8>) -> usize {
    let pix = fb.data();
    let pixels = pix.len() / 4;
    if scratch.len() < pixels * 2 {
        scratch.resize(pixels * 2, 0);
    }

    let mut o = 0;
    for px in pix.chunks_exact(4) {
        // 3 masked bits + 7 shifted == red shift of 10; likewise green at 5
        let word = (u16::from(px[0] & 0xf8) << 7)
            | (u16::from(px[1] & 0xf8) << 2)
            | u16::from(px[2] >> 3);
        let [hb, lb] = word.to_be_bytes();
        if big_endian {
            scratch[o] = hb;
            scratch[o + 1] = lb;
        } else {
            scratch[o] = lb;
            scratch[o + 1] = hb;
        }
        o += 2;
    }
    o
}
