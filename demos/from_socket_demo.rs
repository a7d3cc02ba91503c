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

//! Generic stream RFB server demo.
//!
//! Demonstrates driving connections over any `AsyncRead + AsyncWrite`
//! stream with `Server::from_socket` instead of handing the server a
//! listener. The same call works for TCP, unix sockets, WebSocket bridges
//! or in-memory pipes.
//!
//! Usage:
//!   cargo run --example from_socket_demo
//!   vncviewer localhost:5901

use std::time::Duration;

use rfbserver::{share, Framebuffer, Server};
use tokio::net::TcpListener;

const WIDTH: u16 = 800;
const HEIGHT: u16 = 600;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (server, _conns) = Server::new(WIDTH, HEIGHT, "generic stream demo");

    let listener = TcpListener::bind("127.0.0.1:5901").await?;
    println!("Listening on 127.0.0.1:5901");

    loop {
        let (stream, addr) = listener.accept().await?;
        println!("Accepted connection from {addr}");

        let mut client = server.from_socket(stream);
        tokio::spawn(async move {
            let frame = share(gradient());
            let sink = client.frame_sink();

            // Re-offer the same handle periodically: the first request
            // gets the full frame, later incremental requests see the
            // unchanged handle and get empty updates.
            let feeder = tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_millis(50));
                loop {
                    tick.tick().await;
                    if sink.is_closed() {
                        return;
                    }
                    let _ = sink.try_send(Some(frame.clone()));
                }
            });

            while let Some(event) = client.next_event().await {
                println!("event: {event:?}");
            }
            feeder.abort();
            println!("Client {addr} disconnected");
        });
    }
}

#[allow(clippy::cast_possible_truncation)]
fn gradient() -> Framebuffer {
    let mut fb = Framebuffer::new(WIDTH, HEIGHT);
    let data = fb.data_mut();
    let mut pos = 0;
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            data[pos] = (u32::from(x) * 255 / u32::from(WIDTH)) as u8;
            data[pos + 1] = (u32::from(y) * 255 / u32::from(HEIGHT)) as u8;
            data[pos + 2] = 128;
            data[pos + 3] = 0xff;
            pos += 4;
        }
    }
    fb
}
