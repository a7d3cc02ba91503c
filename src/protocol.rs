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

//! RFB protocol constants and message structures.
//!
//! This module provides the building blocks for RFB communication as
//! specified in RFC 6143: protocol version negotiation, client/server
//! message types, the security handshake values, and the pixel format
//! record exchanged during initialization.
//!
//! # Protocol Overview
//!
//! An RFB session passes through the following phases:
//! 1. **Protocol Version** - Server and client agree on protocol version
//! 2. **Security Handshake** - Authentication method selection
//! 3. **Initialization** - Exchange of framebuffer parameters
//! 4. **Normal Operation** - Input events in, framebuffer updates out

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;
use crate::wire;

/// The RFB protocol version string advertised by the server.
///
/// This server implements RFB protocol version 3.8. The version string must
/// be exactly 12 bytes including the newline character as specified by the
/// RFB protocol.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

// Client-to-Server Message Types

/// Message type: Client requests to change the pixel format.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;

/// Message type: Client specifies supported encodings.
///
/// The client sends a list of encoding types it supports, ordered by
/// preference. This server records the list but only ever emits Raw.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;

/// Message type: Client requests a framebuffer update.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;

/// Message type: Client sends a keyboard event.
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;

/// Message type: Client sends a pointer (mouse) event.
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;

/// Message type: Client sends cut text (clipboard data).
///
/// Clipboard transfer is not part of this core; receiving this message is
/// fatal to the connection.
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

// Server-to-Client Message Types

/// Message type: Server sends a framebuffer update.
///
/// Contains one or more rectangles of pixel data representing screen
/// changes. The only server-to-client message this core emits after
/// initialization.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

// Encoding Types

/// Encoding type: Raw.
///
/// Transmits rectangles as packed pixels in row-major order with no
/// compression. The only encoding this server emits.
pub const ENCODING_RAW: i32 = 0;

// Security Types

/// Security type: None (no authentication).
///
/// The connection proceeds directly to the initialization phase. The only
/// security type this server offers.
pub const SECURITY_TYPE_NONE: u8 = 1;

// Security Results

/// Security result: handshake succeeded.
pub const SECURITY_RESULT_OK: u32 = 0;

/// A negotiated RFB protocol version.
///
/// Ordering follows the protocol revision, so version-gated handshake steps
/// can be expressed as comparisons (`>= V3_7`, `>= V3_8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    /// RFB 3.3: the server dictates the security type as a u32.
    V3_3,
    /// RFB 3.7: the server offers a security type list.
    V3_7,
    /// RFB 3.8: as 3.7, plus an explicit SecurityResult message.
    V3_8,
}

impl ProtocolVersion {
    /// Parses a client version line (including the trailing newline).
    ///
    /// Returns `None` for any line other than the three supported versions.
    #[must_use]
    pub fn parse(line: &[u8]) -> Option<Self> {
        match line {
            b"RFB 003.003\n" => Some(Self::V3_3),
            b"RFB 003.007\n" => Some(Self::V3_7),
            b"RFB 003.008\n" => Some(Self::V3_8),
            _ => None,
        }
    }
}

/// The pixel format a client wants its rectangles packed in.
///
/// Wire representation is 16 bytes: the eight format fields (13 bytes)
/// followed by 3 bytes of padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    /// Bits per packed pixel word: 8, 16 or 32.
    pub bits_per_pixel: u8,
    /// Colour depth in bits.
    pub depth: u8,
    /// Non-zero if multi-byte pixel words are sent big-endian.
    pub big_endian_flag: u8,
    /// Non-zero if the format is truecolour (disjoint channel bit fields).
    pub true_colour_flag: u8,
    /// Maximum red value (2^n - 1 for an n-bit channel).
    pub red_max: u16,
    /// Maximum green value.
    pub green_max: u16,
    /// Maximum blue value.
    pub blue_max: u16,
    /// Left shift of the red channel within the pixel word.
    pub red_shift: u8,
    /// Left shift of the green channel.
    pub green_shift: u8,
    /// Left shift of the blue channel.
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The server-preferred format installed on every new connection:
    /// 16bpp truecolour, 5 bits per channel, shifts 10/5/0, little-endian.
    #[must_use]
    pub fn thousands() -> Self {
        Self {
            bits_per_pixel: 16,
            depth: 16,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 0x1f,
            green_max: 0x1f,
            blue_max: 0x1f,
            red_shift: 10,
            green_shift: 5,
            blue_shift: 0,
        }
    }

    /// Whether this is the format requested by the OS X "Screens" app's
    /// "Thousands" mode, which gets the contiguous fast encoding path.
    ///
    /// Screens asks for depth 16; RealVNC asks for depth 15 (which is more
    /// accurate). Accept either, the packed layout is the same.
    #[must_use]
    pub fn is_thousands(&self) -> bool {
        self.bits_per_pixel == 16
            && (self.depth == 16 || self.depth == 15)
            && self.true_colour_flag != 0
            && self.red_max == 0x1f
            && self.green_max == 0x1f
            && self.blue_max == 0x1f
            && self.red_shift == 10
            && self.green_shift == 5
            && self.blue_shift == 0
    }

    /// Whether the format uses disjoint channel bit fields rather than an
    /// indexed colour map.
    #[must_use]
    pub fn is_true_colour(&self) -> bool {
        self.true_colour_flag != 0
    }

    /// Reads the 16-byte wire record (fields plus trailing padding).
    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let format = Self {
            bits_per_pixel: r.read_u8().await?,
            depth: r.read_u8().await?,
            big_endian_flag: r.read_u8().await?,
            true_colour_flag: r.read_u8().await?,
            red_max: r.read_u16().await?,
            green_max: r.read_u16().await?,
            blue_max: r.read_u16().await?,
            red_shift: r.read_u8().await?,
            green_shift: r.read_u8().await?,
            blue_shift: r.read_u8().await?,
        };
        wire::read_padding(r, 3).await?;
        Ok(format)
    }

    /// Writes the 16-byte wire record (fields plus trailing padding).
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(self.big_endian_flag);
        buf.put_u8(self.true_colour_flag);
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_bytes(0, 3);
    }
}

/// The `ServerInit` message sent once security negotiation is complete.
///
/// Announces the framebuffer dimensions, the server's preferred pixel
/// format, and the desktop name.
#[derive(Debug, Clone)]
pub struct ServerInit {
    /// Width of the framebuffer in pixels.
    pub framebuffer_width: u16,
    /// Height of the framebuffer in pixels.
    pub framebuffer_height: u16,
    /// The pixel format the server would prefer to send.
    pub pixel_format: PixelFormat,
    /// The desktop name advertised to the client.
    pub name: String,
}

impl ServerInit {
    /// Serializes the message: width, height, pixel format record, then a
    /// u32 length prefix followed by the name bytes.
    #[allow(clippy::cast_possible_truncation)] // name length limited to u32 per RFC 6143
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.framebuffer_width);
        buf.put_u16(self.framebuffer_height);
        self.pixel_format.write_to(buf);

        let name_bytes = self.name.as_bytes();
        buf.put_u32(name_bytes.len() as u32);
        buf.put_slice(name_bytes);
    }
}

/// A client's request for a framebuffer update.
///
/// The rectangle fields are parsed but not honoured: every response covers
/// the full frame bounds. Only the incremental flag changes behavior.
#[derive(Debug, Clone, Copy)]
pub struct FrameBufferUpdateRequest {
    /// Non-zero if the client only wants the pixels changed since the last
    /// update it received.
    pub incremental: u8,
    /// X coordinate of the requested region.
    pub x: u16,
    /// Y coordinate of the requested region.
    pub y: u16,
    /// Width of the requested region.
    pub width: u16,
    /// Height of the requested region.
    pub height: u16,
}

impl FrameBufferUpdateRequest {
    /// Reads the request body (everything after the message type byte).
    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self {
            incremental: r.read_u8().await?,
            x: r.read_u16().await?,
            y: r.read_u16().await?,
            width: r.read_u16().await?,
            height: r.read_u16().await?,
        })
    }

    /// Whether the client asked for an incremental update.
    #[must_use]
    pub fn incremental(&self) -> bool {
        self.incremental != 0
    }
}

/// A rectangle header in a framebuffer update message.
#[derive(Debug)]
pub struct Rectangle {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width of the rectangle in pixels.
    pub width: u16,
    /// Height of the rectangle in pixels.
    pub height: u16,
    /// The encoding of the pixel data that follows.
    pub encoding: i32,
}

impl Rectangle {
    /// Writes the 12-byte rectangle header.
    pub fn write_header(&self, buf: &mut BytesMut) {
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(self.encoding);
    }
}
