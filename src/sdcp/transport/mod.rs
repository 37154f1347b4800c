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

//! Byte-stream transports and connection helpers.
//!
//! The embedded broker reads and writes MQTT frames through the
//! [`TransportOps`] trait, so a broker connection can run over any ordered
//! byte stream. [`TcpTransport`] is the built-in implementation used by the
//! broker's listener.
//!
//! [`connect_helper`] holds the small connection utilities the device links
//! share: opening the device WebSocket, UDP datagram exchange, and finding the
//! local address a device can reach us on.

pub mod connect_helper;
mod tcp;

pub use tcp::TcpTransport;

use std::future::Future;
use std::io::IoSlice;
use std::pin::Pin;
use tokio::time::Duration;

/// Errors raised by transports and device links.
///
/// Every variant counts as transport loss for the session state machine:
/// it is surfaced as a `Disconnected` event and is subject to the
/// auto-reconnect policy.
#[derive(Debug)]
pub enum TransportError {
    Io(std::io::Error),
    WebSocket(Box<dyn std::error::Error + Send + Sync>),
    Http(Box<dyn std::error::Error + Send + Sync>),
    Timeout,
    Connect(String),
    NotConnected,
    /// The peer closed the channel.
    Closed,
    /// The link cannot carry the requested operation.
    Unsupported(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "IO error: {e}"),
            TransportError::WebSocket(e) => write!(f, "WebSocket error: {e}"),
            TransportError::Http(e) => write!(f, "HTTP error: {e}"),
            TransportError::Timeout => write!(f, "Operation timed out"),
            TransportError::Connect(msg) => write!(f, "Connection failed: {msg}"),
            TransportError::NotConnected => write!(f, "Transport not connected"),
            TransportError::Closed => write!(f, "Connection closed by peer"),
            TransportError::Unsupported(what) => write!(f, "Unsupported on this link: {what}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(e))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(Box::new(e))
    }
}

/// Ordered byte-stream operations used by broker connections.
///
/// Implement this trait to run the broker over a stream other than TCP.
///
/// # Examples
///
/// ```ignore
/// use sdcp_session_tokio::sdcp::transport::{TransportError, TransportOps};
/// use std::future::Future;
/// use std::io::IoSlice;
/// use std::pin::Pin;
/// use tokio::time::Duration;
///
/// struct Loopback;
///
/// impl TransportOps for Loopback {
///     fn send<'a>(
///         &'a mut self,
///         _buffers: &'a [IoSlice<'a>],
///     ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
///         Box::pin(async move { Ok(()) })
///     }
///
///     fn recv<'a>(
///         &'a mut self,
///         _buffer: &'a mut [u8],
///     ) -> Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>> {
///         Box::pin(async move { Ok(0) })
///     }
///
///     fn shutdown<'a>(
///         &'a mut self,
///         _timeout: Duration,
///     ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
///         Box::pin(async move {})
///     }
/// }
/// ```
pub trait TransportOps {
    /// Writes every buffer, in order, before resolving.
    fn send<'a>(
        &'a mut self,
        buffers: &'a [IoSlice<'a>],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

    /// Reads whatever is available into `buffer`.
    ///
    /// `Ok(0)` means the peer closed the stream. Must be cancel safe: the
    /// broker races it against outbound traffic.
    fn recv<'a>(
        &'a mut self,
        buffer: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>>;

    /// Closes the stream, waiting at most `timeout` for a graceful shutdown.
    fn shutdown<'a>(
        &'a mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

impl TransportOps for Box<dyn TransportOps + Send> {
    fn send<'a>(
        &'a mut self,
        buffers: &'a [IoSlice<'a>],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        (**self).send(buffers)
    }

    fn recv<'a>(
        &'a mut self,
        buffer: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>> {
        (**self).recv(buffer)
    }

    fn shutdown<'a>(
        &'a mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        (**self).shutdown(timeout)
    }
}
