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

//! # rfbserver
//!
//! An async Rust implementation of an RFB (Remote Framebuffer / VNC)
//! server library.
//!
//! The crate is the protocol endpoint only: it accepts viewer connections,
//! negotiates the RFB handshake (versions 3.3, 3.7 and 3.8, security type
//! None), receives client input events, and streams Raw-encoded
//! framebuffer updates produced asynchronously by the host application.
//! The host supplies frames; the library never captures a screen itself.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rfbserver::{share, Framebuffer, InputEvent, Server};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (server, mut conns) = Server::new(1280, 720, "my desktop");
//!
//!     let listener = TcpListener::bind("0.0.0.0:5900").await?;
//!     tokio::spawn(async move { server.serve(listener).await });
//!
//!     while let Some(mut client) = conns.recv().await {
//!         tokio::spawn(async move {
//!             let frame = share(Framebuffer::new(1280, 720));
//!             // draw under the write lock, then offer the frame
//!             frame.write().await.set_pixel(10, 10, 0xff, 0x00, 0x00);
//!             client.send_frame(Some(frame.clone()));
//!
//!             while let Some(event) = client.next_event().await {
//!                 match event {
//!                     InputEvent::Key { down, key } => println!("key {key:#x} down={down}"),
//!                     InputEvent::Pointer { x, y, .. } => println!("pointer {x},{y}"),
//!                 }
//!             }
//!             // event stream closed: the client disconnected
//!         });
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Your Application              │
//! │                                         │
//! │  • Draw frames under the write lock     │
//! │  • Push frame handles per connection    │
//! │  • Drain input events                   │
//! └───────┬──────────────────▲──────────────┘
//!         │ frame sink (16)  │ events (16)
//! ┌───────▼──────────────────┴──────────────┐
//! │        ClientHandle / Connection        │
//! │                                         │
//! │  reader task: handshake + command loop  │
//! │  push task: diff → translate → write    │
//! └───────────────────▲─────────────────────┘
//!                     │ new connections (16)
//! ┌───────────────────┴─────────────────────┐
//! │             Server (acceptor)           │
//! └─────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod events;
pub mod framebuffer;
pub mod protocol;
pub mod server;

// Internal modules
mod client;
mod diff;
mod translate;
mod wire;

// Re-exports
pub use client::ClientHandle;
pub use error::{Result, RfbError};
pub use events::InputEvent;
pub use framebuffer::{share, DirtyRegion, Framebuffer, FrameRef, SharedFrame};
pub use protocol::{PixelFormat, PROTOCOL_VERSION};
pub use server::Server;

/// Default VNC port.
pub const DEFAULT_PORT: u16 = 5900;
