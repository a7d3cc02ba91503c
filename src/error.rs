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

//! Error types for the RFB server.
//!
//! Every protocol or transport failure terminates the connection it occurred
//! on; none of these errors escape the per-connection serve boundary.

use thiserror::Error;

/// The canonical error type for RFB connections.
#[derive(Debug, Error)]
pub enum RfbError {
    /// The socket read or write failed, or the peer closed the stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The client offered a protocol version other than 3.3, 3.7 or 3.8.
    #[error("unsupported protocol version {0:?}")]
    UnsupportedVersion(String),

    /// The client selected a security type other than None.
    #[error("unsupported security type {0}")]
    UnsupportedSecurityType(u8),

    /// The command loop read a message type byte it does not know.
    #[error("unknown client message type {0}")]
    UnknownMessageType(u8),

    /// The client sent a message this server deliberately does not handle.
    #[error("unsupported client message: {0}")]
    UnsupportedMessage(&'static str),

    /// The client requested a per-channel max value the transcoder cannot
    /// quantize to (only 0x1F and 0x03 are supported).
    #[error("unsupported channel max value {0:#x}")]
    UnsupportedChannelMax(u16),

    /// The client requested a bits-per-pixel outside 8/16/32.
    #[error("unsupported bits-per-pixel {0}")]
    UnsupportedBitsPerPixel(u8),

    /// The client requested an indexed-colour (colour map) pixel format.
    #[error("colour map pixel formats are not supported")]
    ColourMapNotSupported,

    /// The host compared two frames of different dimensions.
    #[error("frame bounds mismatch: {prev_width}x{prev_height} vs {next_width}x{next_height}")]
    BoundsMismatch {
        /// Width of the previously transmitted frame.
        prev_width: u16,
        /// Height of the previously transmitted frame.
        prev_height: u16,
        /// Width of the new frame.
        next_width: u16,
        /// Height of the new frame.
        next_height: u16,
    },

    /// The host asked the comparator to diff two absent frames.
    #[error("cannot compare two absent frames")]
    NoFramesToCompare,

    /// An internal per-connection channel closed while the connection was
    /// still serving.
    #[error("connection channel closed")]
    ChannelClosed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RfbError>;
