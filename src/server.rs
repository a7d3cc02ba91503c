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

//! The RFB server acceptor.
//!
//! Accepts viewer connections, spawns a per-connection protocol task for
//! each, and surfaces a [`ClientHandle`] to the host on a bounded channel.
//! Delivery is non-blocking: if the host is not draining the channel the
//! handle is dropped silently while the connection keeps serving, so a
//! slow host never stalls the acceptor.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::client::{ClientHandle, Connection};

/// Capacity of the new-connections channel handed to the host.
const CONN_BACKLOG: usize = 16;

/// An RFB server for one framebuffer geometry.
///
/// The server owns no pixels; hosts push frame handles into each
/// connection they care about.
#[derive(Debug, Clone)]
pub struct Server {
    width: u16,
    height: u16,
    name: String,
    conns_tx: mpsc::Sender<ClientHandle>,
}

impl Server {
    /// Creates a server advertising a `width` x `height` framebuffer and
    /// the given desktop name. Dimensions are floored at 1.
    ///
    /// Returns the server and the channel on which newly accepted
    /// connections are delivered to the host.
    #[must_use]
    pub fn new(
        width: u16,
        height: u16,
        desktop_name: impl Into<String>,
    ) -> (Self, mpsc::Receiver<ClientHandle>) {
        let (conns_tx, conns_rx) = mpsc::channel(CONN_BACKLOG);
        let server = Self {
            width: width.max(1),
            height: height.max(1),
            name: desktop_name.into(),
            conns_tx,
        };
        (server, conns_rx)
    }

    /// Framebuffer width advertised to clients.
    #[must_use]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Framebuffer height advertised to clients.
    #[must_use]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Accepts connections from an already-bound listener, forever.
    ///
    /// Each accepted socket is served on its own task; accept errors are
    /// logged and do not stop the loop. Connection failures never escape
    /// to this loop either.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    log::info!("client connection from {addr}");
                    let _ = stream.set_nodelay(true);
                    let (read_half, write_half) = stream.into_split();
                    let handle = self.spawn_connection(Box::new(read_half), Box::new(write_half));
                    self.deliver(handle);
                }
                Err(e) => {
                    log::error!("error accepting connection: {e}");
                }
            }
        }
    }

    /// Binds `0.0.0.0:port` and serves it.
    pub async fn listen(&self, port: u16) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        log::info!("rfb server listening on port {port}");
        self.serve(listener).await
    }

    /// Serves one connection over any byte stream, such as a WebSocket
    /// bridge, a unix socket, or an in-memory pipe.
    ///
    /// Unlike [`Server::serve`], the handle is returned to the caller
    /// instead of going through the new-connections channel.
    pub fn from_socket<S>(&self, stream: S) -> ClientHandle
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        self.spawn_connection(Box::new(read_half), Box::new(write_half))
    }

    fn spawn_connection(
        &self,
        read_half: Box<dyn AsyncRead + Send + Unpin>,
        write_half: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> ClientHandle {
        let (conn, handle) = Connection::new(
            read_half,
            write_half,
            self.width,
            self.height,
            self.name.clone(),
        );
        tokio::spawn(conn.serve());
        handle
    }

    fn deliver(&self, handle: ClientHandle) {
        if self.conns_tx.try_send(handle).is_err() {
            // the host is behind; it never observes this connection, but
            // the connection's serve loop still runs
            log::debug!("new-connections channel full, dropping handle");
        }
    }
}
