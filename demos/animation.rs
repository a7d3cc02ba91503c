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

//! Animated-pattern RFB server demo.
//!
//! Serves a plasma-style test animation at ~30 fps and logs the input
//! events each viewer sends back.
//!
//! Usage:
//!   cargo run --example animation
//!   vncviewer localhost:5900

use std::time::Duration;

use rfbserver::{share, ClientHandle, Framebuffer, Server, DEFAULT_PORT};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;

const WIDTH: u16 = 1280;
const HEIGHT: u16 = 720;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (server, mut conns) = Server::new(WIDTH, HEIGHT, "rfbserver animation");

    let listener = TcpListener::bind(("0.0.0.0", DEFAULT_PORT)).await?;
    println!("Serving on port {DEFAULT_PORT}; connect with: vncviewer localhost:{DEFAULT_PORT}");

    tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            eprintln!("server ended: {e}");
        }
    });

    while let Some(client) = conns.recv().await {
        tokio::spawn(handle_client(client));
    }
    Ok(())
}

async fn handle_client(mut client: ClientHandle) {
    let sink = client.frame_sink();

    // Draw a fresh frame per tick so the connection can diff consecutive
    // frames; a full frame is dropped whenever the sink is backed up.
    let animator = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(33));
        let mut slide = 0u32;
        loop {
            tick.tick().await;
            slide += 1;

            let mut fb = Framebuffer::new(WIDTH, HEIGHT);
            draw(&mut fb, slide);

            match sink.try_send(Some(share(fb))) {
                Ok(()) | Err(TrySendError::Full(_)) => {} // full: skip this frame
                Err(TrySendError::Closed(_)) => return,
            }
        }
    });

    while let Some(event) = client.next_event().await {
        log::info!("got event: {event:?}");
    }

    animator.abort();
    println!("Client disconnected");
}

/// Sine-wave borders around a scrolling colour ramp.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn draw(fb: &mut Framebuffer, anim: u32) {
    const BORDER: f64 = 50.0;
    let w = f64::from(WIDTH);
    let h = f64::from(HEIGHT);
    let a = f64::from(anim);

    let data = fb.data_mut();
    let mut pos = 0;
    for y in 0..HEIGHT {
        let fy = f64::from(y);
        let left_edge = (1.1 + ((fy + a * 2.0) / 40.0).sin()) * BORDER;
        let right_edge = w - (1.1 + (std::f64::consts::PI + (fy + a * 2.0) / 40.0).sin()) * BORDER;

        for x in 0..WIDTH {
            let fx = f64::from(x);
            let top_edge = (1.1 + ((fx + a * 2.0) / 40.0).sin()) * BORDER;
            let bottom_edge =
                h - (1.1 + (std::f64::consts::PI + (fx + a * 2.0) / 40.0).sin()) * BORDER;

            let (r, g, b) = if fx < BORDER * 2.5 && fx < left_edge {
                (255, 0, 0)
            } else if fx > w - BORDER * 2.5 && fx > right_edge {
                (0, 255, 0)
            } else if fy < BORDER * 2.5 && fy < top_edge {
                (255, 255, 0)
            } else if fy > h - BORDER * 2.5 && fy > bottom_edge {
                (0, 0, 255)
            } else {
                (
                    (u32::from(x) + anim) as u8,
                    (u32::from(y) + anim) as u8,
                    (u32::from(x) + u32::from(y) + anim * 3) as u8,
                )
            };

            data[pos] = r;
            data[pos + 1] = g;
            data[pos + 2] = b;
            data[pos + 3] = 0xff;
            pos += 4;
        }
    }
}
