// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! LAN discovery of SDCP printers.
//!
//! Printers answer the datagram `M99999` on UDP port 3000 with a JSON
//! description of themselves. Older firmware nests the identity fields under
//! `Data.Attributes`; newer firmware puts them directly in `Data`.

use std::net::{Ipv4Addr, SocketAddr};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::time::{Duration, Instant};

use crate::sdcp::device::DeviceIdentity;
use crate::sdcp::session_error::SessionError;
use crate::sdcp::transport::{connect_helper, TransportError};

pub const DISCOVERY_MESSAGE: &str = "M99999";
pub const DEFAULT_DISCOVERY_PORT: u16 = 3000;
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Resolves device identities.
///
/// Sessions call [`broadcast`](Discovery::broadcast) when they are asked to
/// connect to a device whose `MainboardID` is not yet known.
pub trait Discovery: Send + Sync {
    /// Asks one address to describe itself.
    fn broadcast<'a>(
        &'a self,
        address: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<DeviceIdentity, SessionError>>;

    /// Collects every device answering a LAN broadcast within `timeout`.
    fn discover(&self, timeout: Duration) -> BoxFuture<'_, Result<Vec<DeviceIdentity>, SessionError>>;
}

/// [`Discovery`] over UDP datagrams.
#[derive(Debug, Clone)]
pub struct UdpDiscovery {
    port: u16,
    broadcast_address: Ipv4Addr,
}

impl Default for UdpDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_PORT)
    }
}

impl UdpDiscovery {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            broadcast_address: Ipv4Addr::BROADCAST,
        }
    }

    /// Sends LAN-wide probes to `address` instead of 255.255.255.255.
    pub fn with_broadcast_address(mut self, address: Ipv4Addr) -> Self {
        self.broadcast_address = address;
        self
    }

    async fn query(&self, address: &str, timeout: Duration) -> Result<DeviceIdentity, SessionError> {
        let target = connect_helper::resolve(address, self.port).await?;
        let socket = connect_helper::bind_udp(false).await?;
        let (reply, from) =
            connect_helper::exchange_datagram(&socket, target, DISCOVERY_MESSAGE.as_bytes(), timeout)
                .await
                .map_err(|e| match e {
                    TransportError::Timeout => {
                        SessionError::Discovery(format!("no reply from {address}"))
                    }
                    other => SessionError::Transport(other),
                })?;
        parse_reply(&reply, from)
    }

    async fn collect(&self, timeout: Duration) -> Result<Vec<DeviceIdentity>, SessionError> {
        let socket = connect_helper::bind_udp(true).await?;
        socket
            .send_to(
                DISCOVERY_MESSAGE.as_bytes(),
                (self.broadcast_address, self.port),
            )
            .await
            .map_err(TransportError::from)?;

        let deadline = Instant::now() + timeout;
        let mut devices: Vec<DeviceIdentity> = Vec::new();
        let mut buffer = vec![0u8; 8192];
        loop {
            let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buffer)).await;
            let Ok(received) = received else { break };
            let (len, from) = received.map_err(TransportError::from)?;
            match parse_reply(&buffer[..len], from) {
                Ok(device) => {
                    tracing::debug!(from = %from, mainboard_id = ?device.mainboard_id, "discovered printer");
                    if !devices
                        .iter()
                        .any(|known| known.mainboard_id == device.mainboard_id)
                    {
                        devices.push(device);
                    }
                }
                Err(e) => tracing::warn!(from = %from, "ignoring discovery reply: {e}"),
            }
        }
        Ok(devices)
    }
}

impl Discovery for UdpDiscovery {
    fn broadcast<'a>(
        &'a self,
        address: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<DeviceIdentity, SessionError>> {
        Box::pin(self.query(address, timeout))
    }

    fn discover(&self, timeout: Duration) -> BoxFuture<'_, Result<Vec<DeviceIdentity>, SessionError>> {
        Box::pin(self.collect(timeout))
    }
}

/// Decodes one discovery reply received from `from`.
pub fn parse_reply(bytes: &[u8], from: SocketAddr) -> Result<DeviceIdentity, SessionError> {
    let reply: Value = serde_json::from_slice(bytes)?;
    let data = reply
        .get("Data")
        .ok_or_else(|| SessionError::Discovery("reply has no Data".into()))?;
    let fields = match data.get("Attributes") {
        Some(attributes) if attributes.is_object() => attributes,
        _ => data,
    };
    let mut identity: DeviceIdentity = serde_json::from_value(fields.clone())?;
    if identity.mainboard_ip.is_none() {
        identity.mainboard_ip = Some(from.ip().to_string());
    }
    if let Some(id) = reply.get("Id").and_then(Value::as_str) {
        identity.id = Some(id.to_string());
    }
    if identity.mainboard_id.is_none() {
        return Err(SessionError::MissingIdentity);
    }
    Ok(identity)
}

/// Asks the printer at `ip` to connect to our broker on `broker_port`.
pub async fn request_broker_dial(
    ip: &str,
    discovery_port: u16,
    broker_port: u16,
) -> Result<(), TransportError> {
    tracing::debug!(ip, broker_port, "requesting broker dial-in");
    connect_helper::send_datagram(ip, discovery_port, format!("M66666 {broker_port}").as_bytes())
        .await
}
