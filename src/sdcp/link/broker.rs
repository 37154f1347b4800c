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

//! Broker-mediated variant for protocol V1 printers.
//!
//! The printer is told to dial our embedded broker with `M66666 {port}` and
//! connects as an MQTT client whose client id is its MainboardID. Requests are
//! published on `/sdcp/request/{id}`; the printer's own publications reach the
//! session as in-process [`BrokerEvent`]s without a second network hop.

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Duration;

use crate::sdcp::broker::{Broker, BrokerEvent, ConnectionId};
use crate::sdcp::command::{Channel, CommandEnvelope};
use crate::sdcp::device::DeviceIdentity;
use crate::sdcp::discovery;
use crate::sdcp::link::{normalize_status, DeviceLink, Inbound, LinkConnector, UploadMode};
use crate::sdcp::session_option::SessionOption;
use crate::sdcp::transport::TransportError;

#[derive(Debug, Clone)]
pub struct BrokerConnector {
    broker: Broker,
    discovery_port: u16,
    timeout: Duration,
}

impl BrokerConnector {
    pub fn new(broker: Broker, options: &SessionOption) -> Self {
        Self {
            broker,
            discovery_port: options.discovery_port(),
            timeout: options.connect_timeout(),
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    async fn wait_for_client(
        &self,
        events: &mut broadcast::Receiver<BrokerEvent>,
        mainboard_id: &str,
    ) -> Result<ConnectionId, TransportError> {
        loop {
            match events.recv().await {
                Ok(BrokerEvent::Connected {
                    connection,
                    client_id,
                }) if client_id == mainboard_id => return Ok(connection),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "broker events lagged while waiting for dial-in");
                    if let Some(connection) = self.broker.client_connection(mainboard_id) {
                        return Ok(connection);
                    }
                }
                Err(RecvError::Closed) => return Err(TransportError::Closed),
            }
        }
    }
}

impl LinkConnector for BrokerConnector {
    type Link = BrokerLink;

    fn name(&self) -> &'static str {
        "broker"
    }

    fn accepts(&self, protocol_major: Option<u32>) -> bool {
        protocol_major != Some(3)
    }

    fn connect<'a>(
        &'a self,
        identity: &'a DeviceIdentity,
    ) -> BoxFuture<'a, Result<BrokerLink, TransportError>> {
        Box::pin(async move {
            let (Some(ip), Some(mainboard_id)) = (&identity.mainboard_ip, &identity.mainboard_id)
            else {
                return Err(TransportError::NotConnected);
            };
            let addr = self
                .broker
                .listen()
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            // Subscribe before asking, so the CONNECT cannot slip past.
            let mut events = self.broker.events();
            let connection = match self.broker.client_connection(mainboard_id) {
                Some(connection) => connection,
                None => {
                    discovery::request_broker_dial(ip, self.discovery_port, addr.port()).await?;
                    tokio::time::timeout(
                        self.timeout,
                        self.wait_for_client(&mut events, mainboard_id),
                    )
                    .await
                    .map_err(|_| TransportError::Timeout)??
                }
            };

            self.broker
                .subscribe_to_topic(connection, &Channel::Response.broker_topic(mainboard_id));
            self.broker
                .subscribe_to_topic(connection, &Channel::Request.broker_topic(mainboard_id));
            tracing::debug!(mainboard_id = %mainboard_id, connection, "printer dialed in");

            Ok(BrokerLink {
                broker: self.broker.clone(),
                events,
                connection,
                mainboard_id: mainboard_id.clone(),
            })
        })
    }

    fn upload_mode(&self) -> UploadMode {
        UploadMode::Pull
    }
}

pub struct BrokerLink {
    broker: Broker,
    events: broadcast::Receiver<BrokerEvent>,
    connection: ConnectionId,
    mainboard_id: String,
}

impl DeviceLink for BrokerLink {
    fn send<'a>(
        &'a mut self,
        envelope: &'a CommandEnvelope,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let topic = Channel::Request.broker_topic(&self.mainboard_id);
            let delivered = self.broker.publish(&topic, envelope.to_json().as_bytes());
            tracing::trace!(topic = %topic, request_id = %envelope.request_id(), delivered, "published request");
            if delivered == 0 {
                return Err(TransportError::NotConnected);
            }
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Vec<Inbound>, TransportError>> {
        Box::pin(async move {
            loop {
                match self.events.recv().await {
                    Ok(BrokerEvent::Published {
                        connection: Some(_),
                        topic,
                        payload,
                    }) => {
                        if let Some(inbound) = classify(&topic, payload, &self.mainboard_id) {
                            return Ok(vec![inbound]);
                        }
                    }
                    Ok(BrokerEvent::Disconnected { connection, .. })
                        if connection == self.connection =>
                    {
                        return Err(TransportError::Closed);
                    }
                    Ok(BrokerEvent::Connected {
                        connection,
                        client_id,
                    }) if client_id == self.mainboard_id => {
                        // The printer reconnected on its own; keep routing to it.
                        self.connection = connection;
                        self.broker.subscribe_to_topic(
                            connection,
                            &Channel::Response.broker_topic(&self.mainboard_id),
                        );
                        self.broker.subscribe_to_topic(
                            connection,
                            &Channel::Request.broker_topic(&self.mainboard_id),
                        );
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "broker events lagged; printer traffic lost");
                    }
                    Err(RecvError::Closed) => return Err(TransportError::Closed),
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            for channel in [Channel::Response, Channel::Request] {
                self.broker
                    .unsubscribe_from_topic(self.connection, &channel.broker_topic(&self.mainboard_id));
            }
        })
    }
}

/// Classifies one publication from the printer.
///
/// Broker payloads wrap the status and attributes objects in `Data`.
pub fn classify(topic: &str, payload: Value, mainboard_id: &str) -> Option<Inbound> {
    match Channel::classify(topic, mainboard_id)? {
        Channel::Status => Some(Inbound::Status(normalize_status(unwrap_data(
            &payload, "Status",
        )?))),
        Channel::Attributes => Some(Inbound::Attributes(unwrap_data(&payload, "Attributes")?)),
        Channel::Response => Some(Inbound::Response(payload)),
        Channel::Notice => Some(Inbound::Notice(payload)),
        Channel::Error => Some(Inbound::Error(payload)),
        Channel::Request => None,
    }
}

fn unwrap_data(payload: &Value, key: &str) -> Option<Value> {
    payload
        .get("Data")
        .and_then(|data| data.get(key))
        .or_else(|| payload.get(key))
        .cloned()
}
