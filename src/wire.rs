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

//! Wire-level helpers shared by the handshake and the command loop.
//!
//! All RFB integers are unsigned big-endian, which is what the
//! `AsyncReadExt` fixed-width readers produce; this module adds the two
//! reads those do not cover (padding runs and the `\n`-terminated version
//! line) and the locked write-and-flush used for every outgoing message.
//! The codec performs no interpretation beyond endianness.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::error::Result;

/// The write half of a connection: buffered, type-erased, and shared
/// between the reader task (handshake) and the push task (frame updates).
/// The mutex keeps multi-field messages from interleaving.
pub(crate) type SharedWriter = Arc<Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>>;

/// Reads and discards `n` padding bytes.
pub(crate) async fn read_padding<R: AsyncRead + Unpin>(r: &mut R, n: usize) -> Result<()> {
    for _ in 0..n {
        r.read_u8().await?;
    }
    Ok(())
}

/// Reads bytes up to and including a `\n`, refusing to buffer more than
/// `max` bytes. The returned line includes the terminator.
///
/// Returns `None` in the second tuple slot when the cap was reached before
/// a newline appeared; the bytes read so far are still returned so the
/// caller can report what the peer sent.
pub(crate) async fn read_line<R: AsyncRead + Unpin>(
    r: &mut R,
    max: usize,
) -> Result<(Vec<u8>, bool)> {
    let mut line = Vec::with_capacity(max);
    while line.len() < max {
        let b = r.read_u8().await?;
        line.push(b);
        if b == b'\n' {
            return Ok((line, true));
        }
    }
    Ok((line, false))
}

/// Writes a complete message and flushes it, holding the writer mutex for
/// the whole operation so concurrent writers cannot interleave bytes.
pub(crate) async fn write_flush(writer: &SharedWriter, bytes: &[u8]) -> Result<()> {
    let mut w = writer.lock().await;
    w.write_all(bytes).await?;
    w.flush().await?;
    Ok(())
}
