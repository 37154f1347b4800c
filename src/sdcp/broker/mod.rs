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

//! Embedded MQTT broker.
//!
//! SDCP V1 printers do not host a broker of their own: the controlling host is
//! asked to provide one, and the printer dials in as an MQTT client. This module
//! implements just enough of a broker for that: CONNECT, PUBLISH at QoS 0 and
//! 1, SUBSCRIBE, UNSUBSCRIBE, PINGREQ and DISCONNECT.
//!
//! A [`Broker`] is an explicit service value. Clone it to share one instance
//! between sessions; tests construct their own isolated brokers.
//!
//! # Examples
//!
//! ```ignore
//! use sdcp_session_tokio::sdcp::broker::{Broker, BrokerEvent, BrokerOption};
//!
//! let broker = Broker::new(BrokerOption::default());
//! let mut events = broker.events();
//! let addr = broker.listen().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let BrokerEvent::Published { topic, payload, .. } = event {
//!         println!("{topic}: {payload}");
//!     }
//! }
//! ```

pub mod broker_error;
pub mod broker_option;
pub mod codec;

pub use broker_error::{BrokerError, CodecError};
pub use broker_option::{BrokerOption, BrokerOptionBuilder, UnsubscribeAck};

use std::collections::{HashMap, HashSet};
use std::io::IoSlice;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::sdcp::transport::{TcpTransport, TransportOps};
use codec::{FrameDecoder, Packet, Qos, RawFrame};

/// Broker-assigned identity of an accepted connection.
pub type ConnectionId = u64;

/// CONNACK return code sent when a CONNECT cannot be decoded.
const CONNACK_SERVER_UNAVAILABLE: u8 = 0x03;

/// In-process notifications raised by the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// A client completed CONNECT.
    Connected {
        connection: ConnectionId,
        client_id: String,
    },
    /// A connection went away, by DISCONNECT, socket error or administrative close.
    Disconnected {
        connection: ConnectionId,
        client_id: Option<String>,
    },
    /// A JSON payload was published on `topic`.
    ///
    /// `connection` is `None` for messages published in-process through
    /// [`Broker::publish`].
    Published {
        connection: Option<ConnectionId>,
        topic: String,
        payload: serde_json::Value,
    },
}

enum Outbound {
    Frame(Bytes),
    Close,
}

enum Disposition {
    Continue,
    Close,
}

struct ConnectionEntry {
    client_id: Option<String>,
    superseded: bool,
    peer: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Topic table and connection table, guarded together.
#[derive(Default)]
struct Registry {
    topics: HashMap<String, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

struct Inner {
    options: BrokerOption,
    registry: Mutex<Registry>,
    events: broadcast::Sender<BrokerEvent>,
    next_connection: AtomicU64,
    start_lock: tokio::sync::Mutex<()>,
    bound: OnceLock<SocketAddr>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

/// Shared handle to an embedded broker.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerOption::default())
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Creates a broker that is not yet listening.
    pub fn new(options: BrokerOption) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity().max(1));
        Self {
            inner: Arc::new(Inner {
                options,
                registry: Mutex::new(Registry::default()),
                events,
                next_connection: AtomicU64::new(1),
                start_lock: tokio::sync::Mutex::new(()),
                bound: OnceLock::new(),
                accept_task: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Idempotent: the first call binds, later calls return the same address.
    /// Concurrent first calls bind exactly once.
    ///
    /// # Errors
    ///
    /// * [`BrokerError::Io`] - The address could not be bound
    /// * [`BrokerError::Shutdown`] - [`shutdown`](Self::shutdown) was called
    pub async fn listen(&self) -> Result<SocketAddr, BrokerError> {
        let _guard = self.inner.start_lock.lock().await;
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(BrokerError::Shutdown);
        }
        if let Some(addr) = self.inner.bound.get() {
            return Ok(*addr);
        }

        let listener = TcpListener::bind(self.inner.options.bind_address().as_str()).await?;
        let addr = listener.local_addr()?;
        let _ = self.inner.bound.set(addr);
        let task = tokio::spawn(accept_loop(Arc::downgrade(&self.inner), listener));
        *lock(&self.inner.accept_task) = Some(task);
        tracing::debug!(%addr, "broker listening");
        Ok(addr)
    }

    /// Address the listener is bound to, once [`listen`](Self::listen) succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.bound.get().copied()
    }

    /// Serves an already established byte stream as a broker connection.
    pub fn accept<T>(&self, transport: T, peer: Option<SocketAddr>) -> ConnectionId
    where
        T: TransportOps + Send + 'static,
    {
        self.inner.accept(Box::new(transport), peer)
    }

    /// Subscribes the events receiver used by session engines.
    pub fn events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.inner.events.subscribe()
    }

    /// Adds `connection` to the subscribers of `topic`.
    ///
    /// Returns `false` if the connection is unknown.
    pub fn subscribe_to_topic(&self, connection: ConnectionId, topic: &str) -> bool {
        self.inner.subscribe(connection, topic)
    }

    /// Removes `connection` from the subscribers of `topic`.
    pub fn unsubscribe_from_topic(&self, connection: ConnectionId, topic: &str) {
        self.inner.unsubscribe(connection, topic);
    }

    /// Publishes `payload` on `topic` as the broker itself.
    ///
    /// Every subscriber receives a copy and a [`BrokerEvent::Published`] is
    /// raised when the payload is JSON. Returns the number of connections the
    /// frame was queued for.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> usize {
        self.inner.route(None, topic, &Bytes::copy_from_slice(payload))
    }

    /// Closes the connection of `client_id`.
    ///
    /// Returns `false` if no such client is connected.
    pub fn disconnect(&self, client_id: &str) -> bool {
        let registry = lock(&self.inner.registry);
        let Some(entry) = registry
            .connections
            .values()
            .find(|entry| !entry.superseded && entry.client_id.as_deref() == Some(client_id))
        else {
            return false;
        };
        tracing::debug!(client_id, "administrative disconnect");
        entry.tx.send(Outbound::Close).is_ok()
    }

    /// Connection currently registered for `client_id`.
    ///
    /// A connection replaced by a newer CONNECT of the same client is never
    /// returned, even while it is still closing.
    pub fn client_connection(&self, client_id: &str) -> Option<ConnectionId> {
        lock(&self.inner.registry)
            .connections
            .iter()
            .find(|(_, entry)| !entry.superseded && entry.client_id.as_deref() == Some(client_id))
            .map(|(id, _)| *id)
    }

    /// Peer address of `connection`, when known.
    pub fn peer_addr(&self, connection: ConnectionId) -> Option<SocketAddr> {
        lock(&self.inner.registry)
            .connections
            .get(&connection)
            .and_then(|entry| entry.peer)
    }

    /// Subscribers of `topic`, sorted.
    pub fn topic_subscribers(&self, topic: &str) -> Vec<ConnectionId> {
        let registry = lock(&self.inner.registry);
        let mut subscribers: Vec<_> = registry
            .topics
            .get(topic)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        subscribers.sort_unstable();
        subscribers
    }

    /// Topics that currently have at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = lock(&self.inner.registry).topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Stops accepting and closes every connection.
    pub async fn shutdown(&self) {
        let _guard = self.inner.start_lock.lock().await;
        self.inner.shut_down.store(true, Ordering::Release);
        if let Some(task) = lock(&self.inner.accept_task).take() {
            task.abort();
        }
        for entry in lock(&self.inner.registry).connections.values() {
            let _ = entry.tx.send(Outbound::Close);
        }
        tracing::debug!("broker shut down");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn accept_loop(inner: Weak<Inner>, listener: TcpListener) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let _ = stream.set_nodelay(true);
        inner.accept(Box::new(TcpTransport::from_stream(stream)), Some(peer));
    }
}

impl Inner {
    fn accept(
        self: &Arc<Self>,
        transport: Box<dyn TransportOps + Send>,
        peer: Option<SocketAddr>,
    ) -> ConnectionId {
        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.registry).connections.insert(
            connection,
            ConnectionEntry {
                client_id: None,
                superseded: false,
                peer,
                tx,
            },
        );
        tracing::debug!(connection, ?peer, "connection accepted");
        tokio::spawn(connection_loop(self.clone(), connection, transport, rx));
        connection
    }

    fn subscribe(&self, connection: ConnectionId, topic: &str) -> bool {
        let mut registry = lock(&self.registry);
        if !registry.connections.contains_key(&connection) {
            return false;
        }
        registry
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(connection);
        tracing::trace!(connection, topic, "subscribed");
        true
    }

    fn unsubscribe(&self, connection: ConnectionId, topic: &str) {
        let mut registry = lock(&self.registry);
        if let Some(subscribers) = registry.topics.get_mut(topic) {
            subscribers.remove(&connection);
            if subscribers.is_empty() {
                registry.topics.remove(topic);
            }
        }
        tracing::trace!(connection, topic, "unsubscribed");
    }

    /// Fans `payload` out to the subscribers of `topic` except `from`.
    fn route(&self, from: Option<ConnectionId>, topic: &str, payload: &Bytes) -> usize {
        let delivered = match codec::encode_publish(topic, payload, Qos::AtMostOnce, None) {
            Ok(frame) => {
                let registry = lock(&self.registry);
                let delivered = registry
                    .topics
                    .get(topic)
                    .into_iter()
                    .flatten()
                    .filter(|subscriber| Some(**subscriber) != from)
                    .filter_map(|subscriber| registry.connections.get(subscriber))
                    .filter(|entry| entry.tx.send(Outbound::Frame(frame.clone())).is_ok())
                    .count();
                delivered
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "cannot re-encode publish");
                0
            }
        };

        match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(payload) => {
                let _ = self.events.send(BrokerEvent::Published {
                    connection: from,
                    topic: topic.to_string(),
                    payload,
                });
            }
            Err(e) => tracing::warn!(topic, error = %e, "publish payload is not JSON"),
        }
        tracing::trace!(topic, delivered, "publish routed");
        delivered
    }

    /// Registers `client_id` on `connection` and closes any older connection
    /// of the same client (MQTT 3.1.1 section 3.1.4).
    ///
    /// `Connected` is raised under the registry lock, so it always precedes the
    /// `Disconnected` of the connection it replaces.
    fn register_client(&self, connection: ConnectionId, client_id: String) {
        let mut registry = lock(&self.registry);
        for (other, entry) in registry.connections.iter_mut() {
            if *other != connection
                && !entry.superseded
                && entry.client_id.as_deref() == Some(client_id.as_str())
            {
                tracing::debug!(connection = *other, client_id = %client_id, "closing superseded connection");
                entry.superseded = true;
                let _ = entry.tx.send(Outbound::Close);
            }
        }
        if let Some(entry) = registry.connections.get_mut(&connection) {
            entry.client_id = Some(client_id.clone());
        }
        tracing::debug!(connection, client_id = %client_id, "client connected");
        let _ = self.events.send(BrokerEvent::Connected {
            connection,
            client_id,
        });
    }

    fn remove(&self, connection: ConnectionId) {
        let client_id = {
            let mut registry = lock(&self.registry);
            let entry = registry.connections.remove(&connection);
            registry.topics.retain(|_, subscribers| {
                subscribers.remove(&connection);
                !subscribers.is_empty()
            });
            entry.and_then(|entry| entry.client_id)
        };
        tracing::debug!(connection, ?client_id, "connection removed");
        let _ = self.events.send(BrokerEvent::Disconnected {
            connection,
            client_id,
        });
    }

    fn dispatch(
        &self,
        connection: ConnectionId,
        frame: RawFrame,
        replies: &mut Vec<Bytes>,
    ) -> Disposition {
        let packet = match codec::decode_packet(&frame) {
            Ok(packet) => packet,
            Err(e) => return self.reject(connection, &frame, e, replies),
        };

        match packet {
            Packet::Connect(connect) => {
                replies.push(codec::encode_connack(0x00));
                self.register_client(connection, connect.client_id);
            }
            Packet::Publish(publish) => {
                if let (Qos::AtLeastOnce, Some(packet_id)) = (publish.qos, publish.packet_id) {
                    replies.push(codec::encode_puback(packet_id));
                }
                self.route(Some(connection), &publish.topic, &publish.payload);
            }
            Packet::Subscribe(subscribe) => {
                let granted: Vec<u8> = subscribe
                    .entries
                    .iter()
                    .map(|(topic, qos)| {
                        self.subscribe(connection, topic);
                        *qos
                    })
                    .collect();
                match codec::encode_suback(subscribe.packet_id, &granted) {
                    Ok(suback) => replies.push(suback),
                    Err(_) => replies.push(codec::encode_suback_failure(subscribe.packet_id)),
                }
            }
            Packet::Unsubscribe(unsubscribe) => {
                for topic in &unsubscribe.topics {
                    self.unsubscribe(connection, topic);
                }
                replies.push(match self.options.unsubscribe_ack() {
                    UnsubscribeAck::Suback => {
                        codec::encode_unsubscribe_as_suback(unsubscribe.packet_id)
                    }
                    UnsubscribeAck::Unsuback => codec::encode_unsuback(unsubscribe.packet_id),
                });
            }
            Packet::Pingreq => replies.push(codec::encode_pingresp()),
            Packet::Disconnect => return Disposition::Close,
            Packet::Other { type_nibble } => {
                tracing::trace!(connection, type_nibble, "ignoring packet");
            }
        }
        Disposition::Continue
    }

    fn reject(
        &self,
        connection: ConnectionId,
        frame: &RawFrame,
        error: CodecError,
        replies: &mut Vec<Bytes>,
    ) -> Disposition {
        tracing::warn!(connection, type_nibble = frame.type_nibble(), error = %error, "cannot decode frame");
        match frame.packet_type() {
            Some(codec::PacketType::Connect) => {
                replies.push(codec::encode_connack(CONNACK_SERVER_UNAVAILABLE));
                Disposition::Close
            }
            Some(codec::PacketType::Subscribe) => {
                replies.push(codec::encode_suback_failure(
                    frame.leading_packet_id().unwrap_or(0),
                ));
                Disposition::Continue
            }
            _ => Disposition::Continue,
        }
    }
}

async fn connection_loop(
    inner: Arc<Inner>,
    connection: ConnectionId,
    mut transport: Box<dyn TransportOps + Send>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0u8; inner.options.recv_buffer_size().max(64)];
    let mut replies = Vec::new();

    'connection: loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = transport.send(&[IoSlice::new(&frame)]).await {
                        tracing::debug!(connection, error = %e, "send failed");
                        break 'connection;
                    }
                }
                Some(Outbound::Close) | None => break 'connection,
            },
            received = transport.recv(&mut buffer) => {
                let len = match received {
                    Ok(0) => {
                        tracing::debug!(connection, "peer closed");
                        break 'connection;
                    }
                    Ok(len) => len,
                    Err(e) => {
                        tracing::debug!(connection, error = %e, "recv failed");
                        break 'connection;
                    }
                };
                decoder.extend(&buffer[..len]);

                let mut disposition = Disposition::Continue;
                for frame in decoder.frames() {
                    match frame {
                        Ok(frame) => {
                            disposition = inner.dispatch(connection, frame, &mut replies);
                        }
                        Err(e) => {
                            tracing::warn!(connection, error = %e, "framing error");
                            disposition = Disposition::Close;
                        }
                    }
                    if matches!(disposition, Disposition::Close) {
                        break;
                    }
                }

                for reply in replies.drain(..) {
                    if let Err(e) = transport.send(&[IoSlice::new(&reply)]).await {
                        tracing::debug!(connection, error = %e, "reply failed");
                        break 'connection;
                    }
                }
                if matches!(disposition, Disposition::Close) {
                    break 'connection;
                }
            }
        }
    }

    transport
        .shutdown(Duration::from_millis(inner.options.shutdown_timeout_ms()))
        .await;
    inner.remove(connection);
}
