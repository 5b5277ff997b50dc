//! ZeroMQ SUB transport (feature: transport-zmq).

use std::time::Duration;

use anyhow::{Context, Result};

use crate::ingest::transport::FrameTransport;

/// Subscribes to every message published on `endpoint`.
pub struct ZmqTransport {
    endpoint: String,
    socket: zmq::Socket,
    // Keeps the socket's context alive.
    _context: zmq::Context,
}

impl ZmqTransport {
    pub fn connect(endpoint: &str) -> Result<Self> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::SUB).context("create SUB socket")?;
        socket.set_linger(0).context("set linger")?;
        socket
            .connect(endpoint)
            .with_context(|| format!("connect to {}", endpoint))?;
        socket.set_subscribe(b"").context("subscribe")?;
        log::info!("ZmqTransport: subscribed to {}", endpoint);
        Ok(Self {
            endpoint: endpoint.to_string(),
            socket,
            _context: context,
        })
    }
}

impl FrameTransport for ZmqTransport {
    fn recv_message(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let ready = self
            .socket
            .poll(zmq::POLLIN, timeout.as_millis() as i64)
            .context("poll SUB socket")?;
        if ready == 0 {
            return Ok(None);
        }
        let bytes = self.socket.recv_bytes(0).context("receive message")?;
        Ok(Some(bytes))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
