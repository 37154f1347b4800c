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

//! Device links: the per-transport half of a printer session.
//!
//! A [`LinkConnector`] knows how to open one kind of channel to a printer and
//! a [`DeviceLink`] is an open channel. The session engine is written once
//! against these traits; the three variants differ only in how envelopes go
//! out and how inbound traffic is classified into [`Inbound`] items.
//!
//! | Variant | Channel | Protocol |
//! |---|---|---|
//! | [`websocket`] | `ws://{ip}:3030/websocket` push socket | V3 |
//! | [`polling`] | periodic `M99999` datagrams | V2 and unknown |
//! | [`broker`] | device dials the embedded MQTT broker | V1 |

pub mod broker;
pub mod polling;
pub mod websocket;

pub use broker::BrokerConnector;
pub use polling::PollingConnector;
pub use websocket::WebSocketConnector;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::time::Duration;

use crate::sdcp::command::CommandEnvelope;
use crate::sdcp::device::DeviceIdentity;
use crate::sdcp::transport::TransportError;

/// Inbound traffic, classified by channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply on `sdcp/response/{id}`, the full message
    Response(Value),
    /// Status object of a status broadcast
    Status(Value),
    /// Attributes object of an attributes broadcast
    Attributes(Value),
    /// Full notice message
    Notice(Value),
    /// Full error message
    Error(Value),
    /// Text that is not a JSON message
    Message(String),
}

/// How file bytes reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Chunks are posted to the device's HTTP upload endpoint.
    Push,
    /// The device is handed a URL to fetch the file from.
    Pull,
}

/// Opens links of one variant.
pub trait LinkConnector: Send + Sync + 'static {
    type Link: DeviceLink + 'static;

    /// Variant name used in logs and capability errors.
    fn name(&self) -> &'static str;

    /// Whether a device advertising `protocol_major` can be driven by this variant.
    fn accepts(&self, protocol_major: Option<u32>) -> bool;

    /// Opens a link to a device whose address and MainboardID are known.
    fn connect<'a>(
        &'a self,
        identity: &'a DeviceIdentity,
    ) -> BoxFuture<'a, Result<Self::Link, TransportError>>;

    fn upload_mode(&self) -> UploadMode {
        UploadMode::Push
    }

    /// Whether status and attribute queries get a reply on the response
    /// channel before the broadcast that carries the data.
    ///
    /// When `false` a query goes straight into the route queue.
    fn acknowledges_queries(&self) -> bool {
        true
    }

    /// Delay before the next reconnect attempt.
    fn reconnect_delay(&self, configured: Duration) -> Duration {
        configured
    }
}

/// An open channel to one printer.
pub trait DeviceLink: Send {
    fn send<'a>(
        &'a mut self,
        envelope: &'a CommandEnvelope,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Waits for the next batch of inbound traffic.
    ///
    /// Must be cancel safe: the session races it against requests and timers.
    /// An error means the link is lost.
    fn recv(&mut self) -> BoxFuture<'_, Result<Vec<Inbound>, TransportError>>;

    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Reads `CurrentStatus` as a list, accepting the scalar form some firmware sends.
pub fn current_status(status: &Value) -> Vec<i64> {
    match status.get("CurrentStatus") {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_i64).collect(),
        Some(value) => value.as_i64().into_iter().collect(),
        None => Vec::new(),
    }
}

/// Rewrites a scalar `CurrentStatus` into a one-element list.
pub fn normalize_status(mut status: Value) -> Value {
    if let Some(current) = status.get_mut("CurrentStatus") {
        if !current.is_array() {
            *current = Value::Array(vec![current.take()]);
        }
    }
    status
}
