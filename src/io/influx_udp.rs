//! InfluxDB sink over UDP
//!
//! Each batch goes out as one datagram of newline-terminated line protocol.
//! UDP gives no storage acknowledgement, so success means the datagram was
//! handed to the kernel.

use crate::domain::measurement::MeasurementBatch;
use crate::io::line_protocol::encode_batch;
use crate::io::sink::{Sink, SinkError, SinkKind};
use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, info};

pub struct InfluxUdpSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl InfluxUdpSink {
    /// Resolve the target once and bind a local socket of the same family
    pub async fn bind(host: &str, port: u16) -> io::Result<Self> {
        let target = lookup_host((host, port)).await?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host))
        })?;

        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;

        info!(target = %target, "influx_udp_ready");
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl Sink for InfluxUdpSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Database
    }

    async fn deliver(&mut self, batch: &MeasurementBatch) -> Result<(), SinkError> {
        let payload = encode_batch(batch);
        let sent = self.socket.send_to(payload.as_bytes(), self.target).await?;
        debug!(bytes = %sent, points = %batch.len(), "influx_udp_sent");
        Ok(())
    }

    async fn close(&mut self) {
        info!(target = %self.target, "influx_udp_closed");
    }
}

fn ping_url(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{}]:{}/ping", host, port)
    } else {
        format!("http://{}:{}/ping", host, port)
    }
}

/// Probe the InfluxDB HTTP API.
///
/// `Ok(false)` means the server answered with a non-success status; `Err`
/// means it could not be reached at all.
pub async fn ping(host: &str, port: u16, timeout: Duration) -> Result<bool, PingError> {
    let url = ping_url(host, port);
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
        .map_err(|e| PingError { url: url.clone(), message: e.to_string() })?;

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| PingError { url: url.clone(), message: e.to_string() })?;

    let status = response.status();
    let version = response
        .headers()
        .get("X-Influxdb-Version")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    debug!(url = %url, status = %status.as_u16(), version = %version, "influx_ping");
    Ok(status.is_success())
}

/// The ping request could not be completed
#[derive(Debug, Clone, Error)]
#[error("{url}: {message}")]
pub struct PingError {
    pub url: String,
    pub message: String,
}
