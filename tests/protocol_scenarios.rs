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

//! End-to-end protocol scenarios over an in-memory stream: byte-exact
//! handshakes for every supported version, framebuffer updates, input
//! event delivery, and fatal-error teardown.

use std::time::Duration;

use rfbserver::{share, ClientHandle, Framebuffer, InputEvent, Server, SharedFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ──────────────────────────────────────────────────────

/// Spins up a server around one end of an in-memory pipe and hands back
/// the viewer's end plus the host-side handle.
fn connect(width: u16, height: u16) -> (DuplexStream, ClientHandle) {
    let (server, _conns) = Server::new(width, height, "rfb-go");
    let (viewer, socket) = tokio::io::duplex(64 * 1024);
    let handle = server.from_socket(socket);
    (viewer, handle)
}

async fn read_exact(viewer: &mut DuplexStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(WAIT, viewer.read_exact(&mut buf))
        .await
        .expect("timed out waiting for server bytes")
        .expect("read failed");
    buf
}

async fn write_all(viewer: &mut DuplexStream, bytes: &[u8]) {
    timeout(WAIT, viewer.write_all(bytes))
        .await
        .expect("timed out writing client bytes")
        .expect("write failed");
}

/// The exact ServerInit bytes for a framebuffer with the default pixel
/// format and desktop name "rfb-go".
fn expected_server_init(width: u16, height: u16) -> Vec<u8> {
    let mut init = Vec::new();
    init.extend_from_slice(&width.to_be_bytes());
    init.extend_from_slice(&height.to_be_bytes());
    init.extend_from_slice(&[
        0x10, 0x10, 0x00, 0x01, // bpp 16, depth 16, little-endian, truecolour
        0x00, 0x1f, 0x00, 0x1f, 0x00, 0x1f, // channel maxes
        0x0a, 0x05, 0x00, // channel shifts 10/5/0
        0x00, 0x00, 0x00, // padding
    ]);
    init.extend_from_slice(&[0x00, 0x00, 0x00, 0x06]);
    init.extend_from_slice(b"rfb-go");
    init
}

/// Runs a complete 3.8 handshake and consumes the ServerInit.
async fn handshake_v38(viewer: &mut DuplexStream, width: u16, height: u16) {
    assert_eq!(read_exact(viewer, 12).await, b"RFB 003.008\n");
    write_all(viewer, b"RFB 003.008\n").await;

    assert_eq!(read_exact(viewer, 2).await, [0x01, 0x01]);
    write_all(viewer, &[0x01]).await;

    assert_eq!(read_exact(viewer, 4).await, [0x00, 0x00, 0x00, 0x00]);
    write_all(viewer, &[0x00]).await;

    let init = expected_server_init(width, height);
    assert_eq!(read_exact(viewer, init.len()).await, init);
}

/// One pixel packed for the default format (5-5-5 thousands,
/// little-endian).
fn thousands_le(r: u8, g: u8, b: u8) -> [u8; 2] {
    let word =
        (u16::from(r & 0xf8) << 7) | (u16::from(g & 0xf8) << 2) | u16::from(b >> 3);
    word.to_le_bytes()
}

fn test_pattern(width: u16, height: u16) -> SharedFrame {
    let mut fb = Framebuffer::new(width, height);
    for y in 0..height {
        for x in 0..width {
            #[allow(clippy::cast_possible_truncation)]
            fb.set_pixel(x, y, (x * 60) as u8, (y * 60) as u8, ((x + y) * 30) as u8);
        }
    }
    share(fb)
}

async fn packed_frame(frame: &SharedFrame) -> Vec<u8> {
    let fb = frame.read().await;
    let mut out = Vec::new();
    for y in 0..fb.height() {
        for x in 0..fb.width() {
            let [r, g, b, _] = fb.rgba_at(x, y);
            out.extend_from_slice(&thousands_le(r, g, b));
        }
    }
    out
}

// ── Handshake ────────────────────────────────────────────────────

#[tokio::test]
async fn server_speaks_first_with_version_3_8() {
    let (mut viewer, _handle) = connect(2, 1);
    // before the client writes anything, the first 12 bytes on the wire
    // are the server's version string
    assert_eq!(read_exact(&mut viewer, 12).await, b"RFB 003.008\n");
}

#[tokio::test]
async fn handshake_v33_none_auth() {
    let (mut viewer, _handle) = connect(2, 1);

    assert_eq!(read_exact(&mut viewer, 12).await, b"RFB 003.008\n");
    write_all(&mut viewer, b"RFB 003.003\n").await;

    // 3.3: the server dictates security type None as a u32, no
    // SecurityResult follows
    assert_eq!(read_exact(&mut viewer, 4).await, [0x00, 0x00, 0x00, 0x01]);
    write_all(&mut viewer, &[0x01]).await;

    let init = expected_server_init(2, 1);
    assert_eq!(read_exact(&mut viewer, init.len()).await, init);
}

#[tokio::test]
async fn handshake_v37_skips_security_result() {
    let (mut viewer, _handle) = connect(2, 1);

    assert_eq!(read_exact(&mut viewer, 12).await, b"RFB 003.008\n");
    write_all(&mut viewer, b"RFB 003.007\n").await;

    assert_eq!(read_exact(&mut viewer, 2).await, [0x01, 0x01]);
    write_all(&mut viewer, &[0x01]).await;

    // no SecurityResult in 3.7: the next server bytes are ServerInit
    write_all(&mut viewer, &[0x01]).await;
    let init = expected_server_init(2, 1);
    assert_eq!(read_exact(&mut viewer, init.len()).await, init);
}

#[tokio::test]
async fn handshake_v38_none_auth() {
    let (mut viewer, _handle) = connect(2, 1);
    handshake_v38(&mut viewer, 2, 1).await;
}

#[tokio::test]
async fn bogus_version_is_fatal() {
    let (mut viewer, mut handle) = connect(2, 1);

    assert_eq!(read_exact(&mut viewer, 12).await, b"RFB 003.008\n");
    write_all(&mut viewer, b"RFB 003.005\n").await;

    let closed = timeout(WAIT, handle.next_event()).await.expect("timeout");
    assert_eq!(closed, None);
}

#[tokio::test]
async fn wrong_security_type_is_fatal() {
    let (mut viewer, mut handle) = connect(2, 1);

    assert_eq!(read_exact(&mut viewer, 12).await, b"RFB 003.008\n");
    write_all(&mut viewer, b"RFB 003.008\n").await;
    assert_eq!(read_exact(&mut viewer, 2).await, [0x01, 0x01]);
    write_all(&mut viewer, &[0x02]).await; // VNC auth: not offered

    let closed = timeout(WAIT, handle.next_event()).await.expect("timeout");
    assert_eq!(closed, None);
}

// ── Framebuffer updates ──────────────────────────────────────────

#[tokio::test]
async fn first_full_update_covers_the_frame() {
    let (mut viewer, handle) = connect(4, 4);
    handshake_v38(&mut viewer, 4, 4).await;

    let frame = test_pattern(4, 4);
    assert!(handle.send_frame(Some(frame.clone())));

    // non-incremental update request for (0,0,4,4)
    write_all(&mut viewer, &[3, 0, 0, 0, 0, 0, 0, 4, 0, 4]).await;

    // message type, padding, one rectangle
    assert_eq!(read_exact(&mut viewer, 4).await, [0x00, 0x00, 0x00, 0x01]);
    // rectangle header: full bounds, Raw encoding
    assert_eq!(
        read_exact(&mut viewer, 12).await,
        [0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00]
    );
    // 16 pixels x 2 bytes
    assert_eq!(read_exact(&mut viewer, 32).await, packed_frame(&frame).await);
}

#[tokio::test]
async fn incremental_update_sends_only_the_changed_tile() {
    let (mut viewer, handle) = connect(4, 4);
    handshake_v38(&mut viewer, 4, 4).await;

    // first frame, full update
    let first = test_pattern(4, 4);
    assert!(handle.send_frame(Some(first.clone())));
    write_all(&mut viewer, &[3, 0, 0, 0, 0, 0, 0, 4, 0, 4]).await;
    read_exact(&mut viewer, 4 + 12 + 32).await;

    // second frame identical except at (1, 2)
    let second = share(first.read().await.clone());
    second.write().await.set_pixel(1, 2, 0xff, 0x00, 0x00);
    assert!(handle.send_frame(Some(second.clone())));

    write_all(&mut viewer, &[3, 1, 0, 0, 0, 0, 0, 4, 0, 4]).await;

    // one rectangle: the image is smaller than a tile, so the clipped
    // 4x4 tile containing (1,2) is the whole frame
    assert_eq!(read_exact(&mut viewer, 4).await, [0x00, 0x00, 0x00, 0x01]);
    assert_eq!(
        read_exact(&mut viewer, 12).await,
        [0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00]
    );
    assert_eq!(read_exact(&mut viewer, 32).await, packed_frame(&second).await);
}

#[tokio::test]
async fn unchanged_frame_yields_an_empty_update() {
    let (mut viewer, handle) = connect(4, 4);
    handshake_v38(&mut viewer, 4, 4).await;

    let frame = test_pattern(4, 4);
    assert!(handle.send_frame(Some(frame)));
    write_all(&mut viewer, &[3, 0, 0, 0, 0, 0, 0, 4, 0, 4]).await;
    read_exact(&mut viewer, 4 + 12 + 32).await;

    // host pushes None: "no change"
    assert!(handle.send_frame(None));
    write_all(&mut viewer, &[3, 1, 0, 0, 0, 0, 0, 4, 0, 4]).await;

    // an update with zero rectangles
    assert_eq!(read_exact(&mut viewer, 4).await, [0x00, 0x00, 0x00, 0x00]);
}

#[tokio::test]
async fn updates_answer_requests_in_order() {
    let (mut viewer, handle) = connect(4, 4);
    handshake_v38(&mut viewer, 4, 4).await;

    let first = test_pattern(4, 4);
    let second = share(first.read().await.clone());
    second.write().await.set_pixel(0, 0, 0x12, 0x34, 0x56);

    assert!(handle.send_frame(Some(first.clone())));
    assert!(handle.send_frame(Some(second.clone())));

    // two full requests back to back
    write_all(&mut viewer, &[3, 0, 0, 0, 0, 0, 0, 4, 0, 4]).await;
    write_all(&mut viewer, &[3, 0, 0, 0, 0, 0, 0, 4, 0, 4]).await;

    read_exact(&mut viewer, 4 + 12).await;
    assert_eq!(read_exact(&mut viewer, 32).await, packed_frame(&first).await);
    read_exact(&mut viewer, 4 + 12).await;
    assert_eq!(read_exact(&mut viewer, 32).await, packed_frame(&second).await);
}

#[tokio::test]
async fn repacked_format_applies_to_later_updates() {
    let (mut viewer, handle) = connect(2, 1);
    handshake_v38(&mut viewer, 2, 1).await;

    // SetPixelFormat: 32bpp depth 24, big-endian, truecolour,
    // 5-bit maxes, shifts 16/8/0
    let mut msg = vec![0u8, 0, 0, 0];
    msg.extend_from_slice(&[
        32, 24, 1, 1, // bpp, depth, big-endian, truecolour
        0x00, 0x1f, 0x00, 0x1f, 0x00, 0x1f, // maxes
        16, 8, 0, // shifts
        0, 0, 0, // padding
    ]);
    write_all(&mut viewer, &msg).await;

    let mut fb = Framebuffer::new(2, 1);
    fb.set_pixel(0, 0, 0xff, 0x00, 0x00); // red -> 0x1f << 16
    fb.set_pixel(1, 0, 0x00, 0x00, 0xff); // blue -> 0x1f
    assert!(handle.send_frame(Some(share(fb))));

    write_all(&mut viewer, &[3, 0, 0, 0, 0, 0, 0, 2, 0, 1]).await;

    assert_eq!(read_exact(&mut viewer, 4).await, [0x00, 0x00, 0x00, 0x01]);
    assert_eq!(
        read_exact(&mut viewer, 12).await,
        [0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]
    );
    // two 32-bit big-endian words
    assert_eq!(
        read_exact(&mut viewer, 8).await,
        [0x00, 0x1f, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1f]
    );
}

// ── Input events ─────────────────────────────────────────────────

#[tokio::test]
async fn pointer_event_reaches_the_host() {
    let (mut viewer, mut handle) = connect(2, 1);
    handshake_v38(&mut viewer, 2, 1).await;

    write_all(&mut viewer, &[0x05, 0x07, 0x00, 0x10, 0x00, 0x20]).await;

    let event = timeout(WAIT, handle.next_event())
        .await
        .expect("timeout")
        .expect("event stream closed");
    assert_eq!(
        event,
        InputEvent::Pointer {
            button_mask: 0b0000_0111,
            x: 16,
            y: 32,
        }
    );
}

#[tokio::test]
async fn key_event_reaches_the_host() {
    let (mut viewer, mut handle) = connect(2, 1);
    handshake_v38(&mut viewer, 2, 1).await;

    // key down, 2 bytes padding, keysym 0xff0d (Return)
    write_all(&mut viewer, &[0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0xff, 0x0d]).await;

    let event = timeout(WAIT, handle.next_event())
        .await
        .expect("timeout")
        .expect("event stream closed");
    assert_eq!(
        event,
        InputEvent::Key {
            down: true,
            key: 0xff0d,
        }
    );
}

#[tokio::test]
async fn set_encodings_is_accepted_and_ignored() {
    let (mut viewer, mut handle) = connect(2, 1);
    handshake_v38(&mut viewer, 2, 1).await;

    // SetEncodings: pad, count 3, Raw / CopyRect / Tight
    write_all(
        &mut viewer,
        &[
            0x02, 0x00, 0x00, 0x03, //
            0x00, 0x00, 0x00, 0x00, // Raw
            0x00, 0x00, 0x00, 0x01, // CopyRect
            0x00, 0x00, 0x00, 0x07, // Tight
        ],
    )
    .await;

    // the connection is still healthy: events still flow
    write_all(&mut viewer, &[0x05, 0x00, 0x00, 0x01, 0x00, 0x01]).await;
    let event = timeout(WAIT, handle.next_event())
        .await
        .expect("timeout")
        .expect("event stream closed");
    assert!(matches!(event, InputEvent::Pointer { x: 1, y: 1, .. }));
}

// ── Fatal teardown ───────────────────────────────────────────────

#[tokio::test]
async fn unknown_command_closes_the_connection() {
    let (mut viewer, mut handle) = connect(2, 1);
    handshake_v38(&mut viewer, 2, 1).await;

    write_all(&mut viewer, &[0x7f]).await;

    // the event stream closes exactly once...
    let closed = timeout(WAIT, handle.next_event()).await.expect("timeout");
    assert_eq!(closed, None);

    // ...and no bytes follow on the wire, just EOF
    let mut buf = [0u8; 1];
    let n = timeout(WAIT, viewer.read(&mut buf))
        .await
        .expect("timeout")
        .expect("read failed");
    assert_eq!(n, 0);
}

#[tokio::test]
async fn unsupported_pixel_format_kills_the_connection() {
    let (mut viewer, mut handle) = connect(2, 1);
    handshake_v38(&mut viewer, 2, 1).await;

    // SetPixelFormat asking for 8-bit channel maxes, which the
    // transcoder cannot quantize to
    let mut msg = vec![0u8, 0, 0, 0];
    msg.extend_from_slice(&[
        32, 24, 0, 1, // bpp, depth, little-endian, truecolour
        0x00, 0xff, 0x00, 0xff, 0x00, 0xff, // maxes
        16, 8, 0, // shifts
        0, 0, 0, // padding
    ]);
    write_all(&mut viewer, &msg).await;

    assert!(handle.send_frame(Some(share(Framebuffer::new(2, 1)))));
    write_all(&mut viewer, &[3, 0, 0, 0, 0, 0, 0, 2, 0, 1]).await;

    // the encode failure unwinds the whole connection
    let closed = timeout(WAIT, handle.next_event()).await.expect("timeout");
    assert_eq!(closed, None);
}

#[tokio::test]
async fn client_cut_text_is_fatal() {
    let (mut viewer, mut handle) = connect(2, 1);
    handshake_v38(&mut viewer, 2, 1).await;

    write_all(&mut viewer, &[0x06]).await;

    let closed = timeout(WAIT, handle.next_event()).await.expect("timeout");
    assert_eq!(closed, None);
}

#[tokio::test]
async fn peer_disconnect_closes_the_event_stream() {
    let (mut viewer, mut handle) = connect(2, 1);
    handshake_v38(&mut viewer, 2, 1).await;

    drop(viewer);

    let closed = timeout(WAIT, handle.next_event()).await.expect("timeout");
    assert_eq!(closed, None);
}
