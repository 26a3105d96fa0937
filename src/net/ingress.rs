//! Live stream ingress
//!
//! Accepts one streaming client at a time over TCP. Each wire frame is
//! `[u16 LE length][compressed packet]`, the same shape the jitter buffer
//! stores. A client connecting starts a LiveStream session; its disconnect
//! (or a malformed frame, which desynchronizes the byte stream) ends it.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use crate::audio::{AudioEngine, JitterBuffer};
use crate::config::StreamConfig;
use crate::error::{Error, Result};

/// TCP listener feeding the jitter buffer
pub struct StreamIngress {
    listener: TcpListener,
    engine: Arc<Mutex<AudioEngine>>,
    jitter: Arc<JitterBuffer>,
    max_packet: usize,
}

impl StreamIngress {
    /// Bind the ingress socket
    pub fn bind(
        config: &StreamConfig,
        engine: Arc<Mutex<AudioEngine>>,
        jitter: Arc<JitterBuffer>,
    ) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
            .parse()
            .map_err(|e| Error::Config(format!("stream bind address: {}", e)))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_recv_buffer_size(64 * 1024)?;
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        socket.set_nonblocking(true)?;

        let listener = TcpListener::from_std(socket.into())?;
        tracing::info!("Stream ingress listening on {}", addr);

        Ok(Self {
            listener,
            engine,
            jitter,
            max_packet: config.max_packet_size,
        })
    }

    /// Accept loop; runs for the lifetime of the gateway
    pub async fn run(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("Stream accept failed: {}", e);
                    continue;
                }
            };

            tracing::info!("Stream client connected from {}", peer);

            if !self.engine.lock().start_stream() {
                tracing::warn!("Could not start stream session; dropping {}", peer);
                continue;
            }

            if let Err(e) = self.serve_client(stream).await {
                tracing::debug!("Stream client {} ended: {}", peer, e);
            }

            self.engine.lock().stop();
            tracing::info!("Stream client {} disconnected", peer);
        }
    }

    async fn serve_client(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let mut header = [0u8; 2];
        let mut payload = vec![0u8; self.max_packet];

        loop {
            stream.read_exact(&mut header).await?;
            let len = u16::from_le_bytes(header) as usize;

            if len == 0 || len > self.max_packet {
                // The byte stream is unrecoverable once a header is bogus
                tracing::warn!("Invalid stream frame length {}; closing connection", len);
                return Ok(());
            }

            stream.read_exact(&mut payload[..len]).await?;

            // Drop-on-full back-pressure is the buffer's job; a false
            // return is already counted there
            let _ = self.jitter.push(&payload[..len]);
        }
    }
}
