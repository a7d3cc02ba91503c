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

//! The truecolour image a host application draws into.
//!
//! A [`Framebuffer`] stores RGBA pixels (8 bits per channel, row-major,
//! origin top-left) in one contiguous buffer with a stride of `width * 4`.
//! Hosts share frames with a connection as a [`SharedFrame`]: the host
//! takes the write lock around pixel mutations, the encoder takes the read
//! lock around packing, so no torn frame ever reaches the wire.

use std::sync::Arc;

use tokio::sync::RwLock;

/// A rectangular region of the framebuffer, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRegion {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
}

impl DirtyRegion {
    /// Creates a new region.
    #[must_use]
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// An RGBA8 image owned by the host application.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u16,
    height: u16,
    pix: Vec<u8>,
}

impl Framebuffer {
    /// Creates a framebuffer filled with zero pixels (black).
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pix: vec![0; usize::from(width) * usize::from(height) * 4],
        }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// The full-image bounds.
    #[must_use]
    pub fn bounds(&self) -> DirtyRegion {
        DirtyRegion::new(0, 0, self.width, self.height)
    }

    /// The raw RGBA pixel buffer, row-major with a `width * 4` stride.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.pix
    }

    /// Mutable access to the raw RGBA pixel buffer.
    ///
    /// Hosts drawing through a [`SharedFrame`] must hold the write lock
    /// while touching this.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.pix
    }

    /// Sets one pixel. Out-of-bounds coordinates are ignored.
    pub fn set_pixel(&mut self, x: u16, y: u16, r: u8, g: u8, b: u8) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = self.offset(x, y);
        self.pix[i] = r;
        self.pix[i + 1] = g;
        self.pix[i + 2] = b;
        self.pix[i + 3] = 0xff;
    }

    /// The packed RGBA bytes of one pixel.
    ///
    /// Panics if the coordinates are out of bounds.
    #[must_use]
    pub fn rgba_at(&self, x: u16, y: u16) -> [u8; 4] {
        let i = self.offset(x, y);
        [self.pix[i], self.pix[i + 1], self.pix[i + 2], self.pix[i + 3]]
    }

    /// The colour of one pixel with each 8-bit channel widened to 16 bits
    /// by replication (`0xAB` becomes `0xABAB`), the convention truecolour
    /// image stores use for 16-bit channel accessors.
    ///
    /// Panics if the coordinates are out of bounds.
    #[must_use]
    pub fn rgb16_at(&self, x: u16, y: u16) -> (u16, u16, u16) {
        let i = self.offset(x, y);
        (
            u16::from(self.pix[i]) * 0x0101,
            u16::from(self.pix[i + 1]) * 0x0101,
            u16::from(self.pix[i + 2]) * 0x0101,
        )
    }

    fn offset(&self, x: u16, y: u16) -> usize {
        (usize::from(y) * usize::from(self.width) + usize::from(x)) * 4
    }
}

/// A frame handle shared between the host and a connection.
///
/// The host writes pixels under the write lock; the connection's encoder
/// holds the read lock for the duration of a rectangle encoding.
pub type SharedFrame = Arc<RwLock<Framebuffer>>;

/// What travels through a connection's frame sink: a shared frame, or
/// `None` to signal "no change since the last frame".
pub type FrameRef = Option<SharedFrame>;

/// Wraps a framebuffer in a shareable handle.
#[must_use]
pub fn share(fb: Framebuffer) -> SharedFrame {
    Arc::new(RwLock::new(fb))
}
