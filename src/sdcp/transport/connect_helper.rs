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

//! Helper functions for reaching printers over their native channels.
//!
//! These wrap the handshake and socket setup steps shared by discovery, the
//! device links and the upload pipeline, mapping failures to
//! [`TransportError`].

use super::TransportError;
use std::net::{IpAddr, SocketAddr};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::Duration;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type DeviceWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens the device's WebSocket channel at `ws://{host}:{port}{path}`.
///
/// # Parameters
///
/// * `host` - Device IP address or host name
/// * `port` - Device HTTP port (3030 on SDCP V3 firmware)
/// * `path` - WebSocket path, normally "/websocket"
/// * `timeout` - Optional limit for TCP connect plus handshake
///
/// # Examples
///
/// ```ignore
/// use sdcp_session_tokio::sdcp::transport::connect_helper;
/// use tokio::time::Duration;
///
/// let ws = connect_helper::connect_ws("192.168.1.50", 3030, "/websocket", Some(Duration::from_secs(5))).await?;
/// ```
pub async fn connect_ws(
    host: &str,
    port: u16,
    path: &str,
    timeout: Option<Duration>,
) -> Result<DeviceWebSocket, TransportError> {
    let url = format!("ws://{host}:{port}{path}");
    tracing::debug!(url = %url, "opening websocket");
    let handshake = connect_async(url.as_str());
    let (stream, _response) = match timeout {
        Some(limit) => tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| TransportError::Timeout)??,
        None => handshake.await?,
    };
    Ok(stream)
}

/// Resolves `host:port` to the first socket address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| TransportError::Connect(format!("Cannot resolve {host}")))
}

/// Binds an ephemeral IPv4 UDP socket, optionally allowed to broadcast.
pub async fn bind_udp(broadcast: bool) -> Result<UdpSocket, TransportError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    if broadcast {
        socket.set_broadcast(true)?;
    }
    Ok(socket)
}

/// Sends a single datagram without waiting for a reply.
pub async fn send_datagram(host: &str, port: u16, message: &[u8]) -> Result<(), TransportError> {
    let target = resolve(host, port).await?;
    let socket = bind_udp(false).await?;
    socket.send_to(message, target).await?;
    Ok(())
}

/// Sends `message` to `target` and waits up to `timeout` for one reply.
///
/// Returns the reply bytes and the address they came from.
pub async fn exchange_datagram(
    socket: &UdpSocket,
    target: SocketAddr,
    message: &[u8],
    timeout: Duration,
) -> Result<(Vec<u8>, SocketAddr), TransportError> {
    socket.send_to(message, target).await?;
    let mut buffer = vec![0u8; 8192];
    let (len, from) = tokio::time::timeout(timeout, socket.recv_from(&mut buffer))
        .await
        .map_err(|_| TransportError::Timeout)??;
    buffer.truncate(len);
    Ok((buffer, from))
}

/// Local interface address that routes towards `device`.
///
/// Connecting a UDP socket sends nothing; it only asks the OS to pick the
/// outgoing interface.
pub async fn local_ip_towards(device: SocketAddr) -> Result<IpAddr, TransportError> {
    let socket = bind_udp(false).await?;
    socket.connect(device).await?;
    Ok(socket.local_addr()?.ip())
}
