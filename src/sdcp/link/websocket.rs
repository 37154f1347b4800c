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

//! Push-socket variant for protocol V3 printers.
//!
//! The printer serves a WebSocket at `ws://{ip}:3030/websocket`. Requests are
//! sent as JSON text frames and every message the printer pushes carries a
//! `Topic` naming its channel.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use crate::sdcp::command::{Channel, CommandEnvelope};
use crate::sdcp::device::DeviceIdentity;
use crate::sdcp::link::{normalize_status, DeviceLink, Inbound, LinkConnector};
use crate::sdcp::session_option::SessionOption;
use crate::sdcp::transport::connect_helper::{self, DeviceWebSocket};
use crate::sdcp::transport::TransportError;

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    port: u16,
    path: String,
    timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(options: &SessionOption) -> Self {
        Self {
            port: options.device_port(),
            path: options.websocket_path().clone(),
            timeout: options.connect_timeout(),
        }
    }
}

impl LinkConnector for WebSocketConnector {
    type Link = WebSocketLink;

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn accepts(&self, protocol_major: Option<u32>) -> bool {
        // V1 and V2 firmware has no WebSocket endpoint.
        !matches!(protocol_major, Some(1) | Some(2))
    }

    fn connect<'a>(
        &'a self,
        identity: &'a DeviceIdentity,
    ) -> BoxFuture<'a, Result<WebSocketLink, TransportError>> {
        Box::pin(async move {
            let (Some(ip), Some(mainboard_id)) = (&identity.mainboard_ip, &identity.mainboard_id)
            else {
                return Err(TransportError::NotConnected);
            };
            let stream =
                connect_helper::connect_ws(ip, self.port, &self.path, Some(self.timeout)).await?;
            tracing::debug!(ip = %ip, mainboard_id = %mainboard_id, "websocket link open");
            Ok(WebSocketLink {
                stream,
                mainboard_id: mainboard_id.clone(),
            })
        })
    }
}

pub struct WebSocketLink {
    stream: DeviceWebSocket,
    mainboard_id: String,
}

impl DeviceLink for WebSocketLink {
    fn send<'a>(
        &'a mut self,
        envelope: &'a CommandEnvelope,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let text = envelope.to_json();
            tracing::trace!(request_id = %envelope.request_id(), "ws send {text}");
            self.stream.send(Message::Text(text)).await?;
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Vec<Inbound>, TransportError>> {
        Box::pin(async move {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => Ok(vec![classify(&text, &self.mainboard_id)]),
                Some(Ok(Message::Binary(bytes))) => Ok(vec![classify(
                    &String::from_utf8_lossy(&bytes),
                    &self.mainboard_id,
                )]),
                Some(Ok(Message::Close(_))) | None => Err(TransportError::Closed),
                Some(Ok(_)) => Ok(Vec::new()),
                Some(Err(e)) => Err(e.into()),
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.stream.close(None).await {
                tracing::trace!("websocket close: {e}");
            }
        })
    }
}

/// Classifies one pushed message by its `Topic`.
pub fn classify(text: &str, mainboard_id: &str) -> Inbound {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        return Inbound::Message(text.to_string());
    };
    let channel = message
        .get("Topic")
        .and_then(Value::as_str)
        .and_then(|topic| Channel::classify(topic, mainboard_id));
    match channel {
        Some(Channel::Status) => {
            Inbound::Status(normalize_status(message.get("Status").cloned().unwrap_or(Value::Null)))
        }
        Some(Channel::Attributes) => {
            Inbound::Attributes(message.get("Attributes").cloned().unwrap_or(Value::Null))
        }
        Some(Channel::Response) => Inbound::Response(message),
        Some(Channel::Notice) => Inbound::Notice(message),
        Some(Channel::Error) => Inbound::Error(message),
        Some(Channel::Request) | None => Inbound::Message(text.to_string()),
    }
}
