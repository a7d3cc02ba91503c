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

//! Per-connection protocol engine.
//!
//! Each accepted socket gets a [`Connection`] running the RFB handshake and
//! command loop on its own task, plus a frame pusher task spawned lazily on
//! the first update request. The host talks to the connection through a
//! [`ClientHandle`]: a bounded sink of frame handles in, a bounded stream
//! of input events out.
//!
//! # Protocol Flow
//!
//! 1. **Handshake**: version exchange, security negotiation (None only),
//!    ClientInit/ServerInit
//! 2. **Command loop**: one task reads and dispatches client messages
//! 3. **Frame pushing**: one task answers update requests with Raw-encoded
//!    rectangles, pulling frames from the host's sink
//!
//! Any transport or protocol failure unwinds to the serve boundary, which
//! closes the socket and the per-connection channels in a fixed order; the
//! host observes termination as the event stream closing.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader, BufWriter};
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};

use crate::diff;
use crate::error::{Result, RfbError};
use crate::events::InputEvent;
use crate::framebuffer::FrameRef;
use crate::protocol::{
    FrameBufferUpdateRequest, PixelFormat, ProtocolVersion, Rectangle, ServerInit,
    CLIENT_MSG_CLIENT_CUT_TEXT, CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST, CLIENT_MSG_KEY_EVENT,
    CLIENT_MSG_POINTER_EVENT, CLIENT_MSG_SET_ENCODINGS, CLIENT_MSG_SET_PIXEL_FORMAT,
    ENCODING_RAW, PROTOCOL_VERSION, SECURITY_RESULT_OK, SECURITY_TYPE_NONE,
    SERVER_MSG_FRAMEBUFFER_UPDATE,
};
use crate::translate;
use crate::wire::{self, SharedWriter};

/// Capacity of the host-to-connection frame sink.
pub(crate) const FRAME_SINK_DEPTH: usize = 16;

/// Capacity of the per-connection update request queue. Once this many
/// requests are outstanding the reader blocks, which is the intended
/// backpressure on a client that requests faster than frames arrive.
pub(crate) const UPDATE_QUEUE_DEPTH: usize = 128;

/// Capacity of the connection-to-host event stream. Events past this are
/// dropped rather than stalling the command loop.
pub(crate) const EVENT_QUEUE_DEPTH: usize = 16;

/// The host's side of one client connection.
///
/// Dropping the handle does not terminate the connection; it keeps serving
/// the protocol, the host just stops observing it.
#[derive(Debug)]
pub struct ClientHandle {
    frames: mpsc::Sender<FrameRef>,
    events: mpsc::Receiver<InputEvent>,
}

impl ClientHandle {
    /// Offers a frame to the connection without blocking.
    ///
    /// Send `None` to signal "no change since the previous frame". Returns
    /// false if the sink is full (the frame is dropped, which is the
    /// intended load-shedding) or the connection is gone.
    pub fn send_frame(&self, frame: FrameRef) -> bool {
        self.frames.try_send(frame).is_ok()
    }

    /// A clone of the frame sink, for hosts that feed frames from a
    /// different task than the one draining events.
    #[must_use]
    pub fn frame_sink(&self) -> mpsc::Sender<FrameRef> {
        self.frames.clone()
    }

    /// Waits for the next input event.
    ///
    /// Returns `None` exactly once, when the connection has terminated.
    pub async fn next_event(&mut self) -> Option<InputEvent> {
        self.events.recv().await
    }
}

/// Per-connection state driven by the reader task.
pub(crate) struct Connection {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    writer: SharedWriter,
    width: u16,
    height: u16,
    name: String,
    /// Written by the command loop (`SetPixelFormat`), read by the pusher.
    format: Arc<RwLock<PixelFormat>>,
    /// Encodings the client advertised. Recorded but only Raw is emitted.
    #[allow(dead_code)]
    encodings: Vec<i32>,
    update_tx: mpsc::Sender<FrameBufferUpdateRequest>,
    update_rx: Option<mpsc::Receiver<FrameBufferUpdateRequest>>,
    frame_rx: Option<mpsc::Receiver<FrameRef>>,
    event_tx: mpsc::Sender<InputEvent>,
    /// Never sent on; dropped at teardown as a fan-out close signal.
    close_tx: watch::Sender<()>,
    /// Fires when the pusher hits a fatal error, so the command loop
    /// unwinds to the serve boundary instead of serving a broken peer.
    pusher_failed: Option<oneshot::Receiver<RfbError>>,
    got_first_request: bool,
}

impl Connection {
    /// Builds a connection over split stream halves, returning it together
    /// with the handle the host uses to talk to it.
    pub(crate) fn new(
        read_half: Box<dyn AsyncRead + Send + Unpin>,
        write_half: Box<dyn AsyncWrite + Send + Unpin>,
        width: u16,
        height: u16,
        name: String,
    ) -> (Self, ClientHandle) {
        let (update_tx, update_rx) = mpsc::channel(UPDATE_QUEUE_DEPTH);
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_SINK_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (close_tx, _) = watch::channel(());

        let conn = Self {
            reader: BufReader::new(read_half),
            writer: Arc::new(Mutex::new(BufWriter::new(write_half))),
            width,
            height,
            name,
            format: Arc::new(RwLock::new(PixelFormat::thousands())),
            encodings: Vec::new(),
            update_tx,
            update_rx: Some(update_rx),
            frame_rx: Some(frame_rx),
            event_tx,
            close_tx,
            pusher_failed: None,
            got_first_request: false,
        };
        let handle = ClientHandle {
            frames: frame_tx,
            events: event_rx,
        };
        (conn, handle)
    }

    /// Runs the connection to completion and tears it down.
    pub(crate) async fn serve(mut self) {
        if let Err(e) = self.run().await {
            log::info!("client disconnect: {e}");
        }
        self.teardown().await;
    }

    async fn run(&mut self) -> Result<()> {
        self.handshake().await?;

        loop {
            let cmd = self.read_command().await?;
            match cmd {
                CLIENT_MSG_SET_PIXEL_FORMAT => self.handle_set_pixel_format().await?,
                CLIENT_MSG_SET_ENCODINGS => self.handle_set_encodings().await?,
                CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => self.handle_update_request().await?,
                CLIENT_MSG_KEY_EVENT => self.handle_key_event().await?,
                CLIENT_MSG_POINTER_EVENT => self.handle_pointer_event().await?,
                CLIENT_MSG_CLIENT_CUT_TEXT => {
                    return Err(RfbError::UnsupportedMessage("ClientCutText"))
                }
                other => return Err(RfbError::UnknownMessageType(other)),
            }
        }
    }

    /// Waits for the next command byte, bailing out if the pusher has hit
    /// a fatal error in the meantime.
    async fn read_command(&mut self) -> Result<u8> {
        match self.pusher_failed.as_mut() {
            Some(failed) => tokio::select! {
                cmd = self.reader.read_u8() => Ok(cmd?),
                err = failed => Err(err.unwrap_or(RfbError::ChannelClosed)),
            },
            None => Ok(self.reader.read_u8().await?),
        }
    }

    /// Closes the socket and the per-connection channels, in that order.
    /// The event stream closing is how the host learns the connection
    /// ended.
    async fn teardown(self) {
        let Self {
            writer,
            update_tx,
            close_tx,
            event_tx,
            ..
        } = self;
        {
            use tokio::io::AsyncWriteExt;
            let mut w = writer.lock().await;
            let _ = w.shutdown().await;
        }
        drop(update_tx);
        drop(close_tx);
        drop(event_tx);
    }

    /// Drives the connection from ProtocolVersion through ServerInit.
    async fn handshake(&mut self) -> Result<()> {
        wire::write_flush(&self.writer, PROTOCOL_VERSION.as_bytes()).await?;

        let (line, terminated) = wire::read_line(&mut self.reader, 12).await?;
        let version = if terminated {
            ProtocolVersion::parse(&line)
        } else {
            None
        }
        .ok_or_else(|| {
            RfbError::UnsupportedVersion(String::from_utf8_lossy(&line).into_owned())
        })?;
        log::debug!("client wants {version:?}");

        if version >= ProtocolVersion::V3_7 {
            // one supported security type: None
            wire::write_flush(&self.writer, &[1, SECURITY_TYPE_NONE]).await?;
            let wanted = self.reader.read_u8().await?;
            if wanted != SECURITY_TYPE_NONE {
                return Err(RfbError::UnsupportedSecurityType(wanted));
            }
        } else {
            // 3.3: the server dictates the security type as a u32
            wire::write_flush(&self.writer, &u32::from(SECURITY_TYPE_NONE).to_be_bytes()).await?;
        }

        if version >= ProtocolVersion::V3_8 {
            wire::write_flush(&self.writer, &SECURITY_RESULT_OK.to_be_bytes()).await?;
        }

        // ClientInit: every session is shared, the flag is ignored
        let _shared = self.reader.read_u8().await?;

        let init = ServerInit {
            framebuffer_width: self.width,
            framebuffer_height: self.height,
            pixel_format: self.format.read().await.clone(),
            name: self.name.clone(),
        };
        let mut buf = BytesMut::with_capacity(24 + init.name.len());
        init.write_to(&mut buf);
        wire::write_flush(&self.writer, &buf).await?;

        log::info!("client handshake completed ({version:?})");
        Ok(())
    }

    async fn handle_set_pixel_format(&mut self) -> Result<()> {
        wire::read_padding(&mut self.reader, 3).await?;
        let format = PixelFormat::read_from(&mut self.reader).await?;
        log::debug!("client set pixel format: {format:?}");
        *self.format.write().await = format;
        Ok(())
    }

    async fn handle_set_encodings(&mut self) -> Result<()> {
        wire::read_padding(&mut self.reader, 1).await?;
        let count = self.reader.read_u16().await?;
        let mut encodings = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            encodings.push(self.reader.read_i32().await?);
        }
        log::debug!("client encodings: {encodings:?}");
        self.encodings = encodings;
        Ok(())
    }

    async fn handle_update_request(&mut self) -> Result<()> {
        let req = FrameBufferUpdateRequest::read_from(&mut self.reader).await?;

        if !self.got_first_request {
            self.got_first_request = true;
            self.spawn_pusher();
        }

        // blocks once UPDATE_QUEUE_DEPTH requests are outstanding
        self.update_tx
            .send(req)
            .await
            .map_err(|_| RfbError::ChannelClosed)?;
        Ok(())
    }

    async fn handle_key_event(&mut self) -> Result<()> {
        let down = self.reader.read_u8().await? != 0;
        wire::read_padding(&mut self.reader, 2).await?;
        let key = self.reader.read_u32().await?;

        // drop the event if the host is behind
        let _ = self.event_tx.try_send(InputEvent::Key { down, key });
        Ok(())
    }

    async fn handle_pointer_event(&mut self) -> Result<()> {
        let button_mask = self.reader.read_u8().await?;
        let x = self.reader.read_u16().await?;
        let y = self.reader.read_u16().await?;

        let _ = self
            .event_tx
            .try_send(InputEvent::Pointer { button_mask, x, y });
        Ok(())
    }

    fn spawn_pusher(&mut self) {
        let (Some(updates), Some(frames)) = (self.update_rx.take(), self.frame_rx.take()) else {
            return;
        };
        let (failed_tx, failed_rx) = oneshot::channel();
        self.pusher_failed = Some(failed_rx);
        let pusher = FramePusher {
            updates,
            frames,
            writer: Arc::clone(&self.writer),
            format: Arc::clone(&self.format),
            closed: self.close_tx.subscribe(),
            last: None,
            scratch: Vec::new(),
        };
        tokio::spawn(pusher.run(failed_tx));
    }
}

/// The frame pusher: the only task that writes pixel data.
///
/// Answers update requests strictly in arrival order, one frame encoding in
/// flight at a time, pairing each request with the next frame pulled from
/// the host's sink.
struct FramePusher {
    updates: mpsc::Receiver<FrameBufferUpdateRequest>,
    frames: mpsc::Receiver<FrameRef>,
    writer: SharedWriter,
    format: Arc<RwLock<PixelFormat>>,
    closed: watch::Receiver<()>,
    /// The frame most recently transmitted, diffed against for incremental
    /// requests. `None` until the first successful update.
    last: FrameRef,
    /// Reusable fast-path pack buffer, sized to `pixels * 2` on first use.
    scratch: Vec<u8>,
}

impl FramePusher {
    async fn run(mut self, failed: oneshot::Sender<RfbError>) {
        match self.push_loop().await {
            Ok(()) => {
                // Hold the update queue open until the connection goes
                // down, so a host that dropped its frame sink does not
                // stall into tearing down a still-healthy command loop.
                let _ = self.closed.changed().await;
            }
            Err(e) => {
                log::error!("frame push failed: {e}");
                let _ = failed.send(e);
                // Keep draining queued requests so a reader blocked on a
                // full queue cannot wedge before it sees the failure.
                loop {
                    tokio::select! {
                        req = self.updates.recv() => if req.is_none() { return },
                        _ = self.closed.changed() => return,
                    }
                }
            }
        }
    }

    async fn push_loop(&mut self) -> Result<()> {
        loop {
            let req = tokio::select! {
                req = self.updates.recv() => match req {
                    Some(req) => req,
                    None => return Ok(()),
                },
                _ = self.closed.changed() => return Ok(()),
            };

            let frame = tokio::select! {
                frame = self.frames.recv() => match frame {
                    Some(frame) => frame,
                    None => return Ok(()),
                },
                _ = self.closed.changed() => return Ok(()),
            };

            self.push_frame(&req, frame).await?;
        }
    }

    /// Encodes and sends one `FramebufferUpdate` in response to `req`.
    #[allow(clippy::cast_possible_truncation)] // rectangle count bounded by tiles in a u16-sized image
    async fn push_frame(&mut self, req: &FrameBufferUpdateRequest, frame: FrameRef) -> Result<()> {
        // Snapshot so a SetPixelFormat racing in cannot swap the layout
        // mid-rectangle.
        let format = self.format.read().await.clone();
        if !format.is_true_colour() {
            return Err(RfbError::ColourMapNotSupported);
        }

        let Some(image) = frame else {
            // "no change" from the host: an update with no rectangles
            let mut msg = BytesMut::with_capacity(4);
            msg.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
            msg.put_u8(0);
            msg.put_u16(0);
            return wire::write_flush(&self.writer, &msg).await;
        };

        let new = image.read().await;

        let rects = if req.incremental() {
            match &self.last {
                // The host resent the handle we already transmitted;
                // identical pixels by definition.
                Some(last) if Arc::ptr_eq(last, &image) => Vec::new(),
                Some(last) => {
                    let old = last.read().await;
                    diff::changed_tiles(Some(&*old), Some(&*new))?
                }
                None => diff::changed_tiles(None, Some(&*new))?,
            }
        } else {
            vec![new.bounds()]
        };

        let bytes_per_pixel = usize::from(format.bits_per_pixel / 8);
        let payload: usize = rects
            .iter()
            .map(|r| 12 + usize::from(r.width) * usize::from(r.height) * bytes_per_pixel)
            .sum();
        let mut msg = BytesMut::with_capacity(4 + payload);

        msg.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        msg.put_u8(0); // padding
        msg.put_u16(rects.len() as u16);

        for rect in rects {
            let header = Rectangle {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                encoding: ENCODING_RAW,
            };
            header.write_header(&mut msg);
            translate::encode_rect(&new, rect, &format, &mut self.scratch, &mut msg)?;
        }
        drop(new);

        wire::write_flush(&self.writer, &msg).await?;

        self.last = Some(image);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_connection() -> (Connection, ClientHandle) {
        let (_host_side, conn_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(conn_side);
        Connection::new(Box::new(read_half), Box::new(write_half), 4, 4, "test".into())
    }

    #[tokio::test]
    async fn frame_sink_sheds_load_past_capacity() {
        let (_conn, handle) = idle_connection();

        for _ in 0..FRAME_SINK_DEPTH {
            assert!(handle.send_frame(None));
        }
        // the sink is full and nobody is draining: the frame is dropped
        assert!(!handle.send_frame(None));
    }

    #[tokio::test]
    async fn event_stream_closes_when_the_connection_tears_down() {
        let (conn, mut handle) = idle_connection();
        conn.teardown().await;
        assert_eq!(handle.next_event().await, None);
    }
}
