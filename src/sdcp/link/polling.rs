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

//! Polling variant for printers without a push channel.
//!
//! The printer is asked to describe itself with `M99999` every poll interval.
//! Each reply carries the current `Status` and `Attributes`, which feed the
//! same caches and route queues as pushed broadcasts. A run of failed polls
//! counts as link loss.

use std::net::SocketAddr;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::time::{Duration, Instant};

use crate::sdcp::command::CommandEnvelope;
use crate::sdcp::device::DeviceIdentity;
use crate::sdcp::discovery::DISCOVERY_MESSAGE;
use crate::sdcp::link::{normalize_status, DeviceLink, Inbound, LinkConnector};
use crate::sdcp::session_option::SessionOption;
use crate::sdcp::transport::{connect_helper, TransportError};

#[derive(Debug, Clone)]
pub struct PollingConnector {
    port: u16,
    interval: Duration,
    timeout: Duration,
    failure_threshold: u32,
}

impl PollingConnector {
    pub fn new(options: &SessionOption) -> Self {
        Self {
            port: options.discovery_port(),
            interval: options.poll_interval(),
            timeout: options.poll_timeout(),
            failure_threshold: options.poll_failure_threshold().max(1),
        }
    }
}

impl LinkConnector for PollingConnector {
    type Link = PollingLink;

    fn name(&self) -> &'static str {
        "polling"
    }

    fn accepts(&self, protocol_major: Option<u32>) -> bool {
        protocol_major != Some(3)
    }

    fn connect<'a>(
        &'a self,
        identity: &'a DeviceIdentity,
    ) -> BoxFuture<'a, Result<PollingLink, TransportError>> {
        Box::pin(async move {
            let Some(ip) = &identity.mainboard_ip else {
                return Err(TransportError::NotConnected);
            };
            let target = connect_helper::resolve(ip, self.port).await?;
            let socket = connect_helper::bind_udp(false).await?;
            let mut buffer = vec![0u8; 8192];

            for attempt in 1..=self.failure_threshold {
                match poll_once(&socket, target, self.timeout, &mut buffer).await {
                    Ok(pending) => {
                        tracing::debug!(ip = %ip, attempt, "polling link open");
                        return Ok(PollingLink {
                            socket,
                            target,
                            interval: self.interval,
                            timeout: self.timeout,
                            failure_threshold: self.failure_threshold,
                            failures: 0,
                            next_poll: Instant::now() + self.interval,
                            deadline: None,
                            pending,
                            buffer,
                        });
                    }
                    Err(e) => {
                        tracing::trace!(ip = %ip, attempt, "poll failed: {e}");
                        if attempt < self.failure_threshold {
                            tokio::time::sleep(self.interval).await;
                        }
                    }
                }
            }
            Err(TransportError::Timeout)
        })
    }

    fn acknowledges_queries(&self) -> bool {
        false
    }

    fn reconnect_delay(&self, _configured: Duration) -> Duration {
        self.interval
    }
}

pub struct PollingLink {
    socket: UdpSocket,
    target: SocketAddr,
    interval: Duration,
    timeout: Duration,
    failure_threshold: u32,
    failures: u32,
    next_poll: Instant,
    /// Set while a poll is outstanding.
    deadline: Option<Instant>,
    pending: Vec<Inbound>,
    buffer: Vec<u8>,
}

impl PollingLink {
    fn poll_failed(&mut self) -> Result<(), TransportError> {
        self.deadline = None;
        self.failures += 1;
        self.next_poll = Instant::now() + self.interval;
        tracing::trace!(failures = self.failures, "poll timed out");
        if self.failures >= self.failure_threshold {
            return Err(TransportError::Timeout);
        }
        Ok(())
    }
}

impl DeviceLink for PollingLink {
    fn send<'a>(
        &'a mut self,
        envelope: &'a CommandEnvelope,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if !envelope.is_query() {
                return Err(TransportError::Unsupported(format!(
                    "command {}",
                    envelope.opcode()
                )));
            }
            // Queries are answered by the next poll; bring it forward.
            self.next_poll = Instant::now();
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Vec<Inbound>, TransportError>> {
        Box::pin(async move {
            loop {
                if !self.pending.is_empty() {
                    return Ok(std::mem::take(&mut self.pending));
                }
                let Some(deadline) = self.deadline else {
                    tokio::time::sleep_until(self.next_poll).await;
                    self.socket
                        .send_to(DISCOVERY_MESSAGE.as_bytes(), self.target)
                        .await?;
                    self.deadline = Some(Instant::now() + self.timeout);
                    continue;
                };
                match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut self.buffer))
                    .await
                {
                    Ok(Ok((len, from))) => {
                        if from.ip() != self.target.ip() {
                            continue;
                        }
                        match parse_poll(&self.buffer[..len]) {
                            Some(inbound) => {
                                self.failures = 0;
                                self.deadline = None;
                                self.next_poll = Instant::now() + self.interval;
                                self.pending = inbound;
                            }
                            None => tracing::warn!(from = %from, "ignoring malformed poll reply"),
                        }
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => self.poll_failed()?,
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.pending.clear();
            self.deadline = None;
        })
    }
}

async fn poll_once(
    socket: &UdpSocket,
    target: SocketAddr,
    timeout: Duration,
    buffer: &mut [u8],
) -> Result<Vec<Inbound>, TransportError> {
    socket.send_to(DISCOVERY_MESSAGE.as_bytes(), target).await?;
    let deadline = Instant::now() + timeout;
    loop {
        let (len, from) = tokio::time::timeout_at(deadline, socket.recv_from(buffer))
            .await
            .map_err(|_| TransportError::Timeout)??;
        if from.ip() != target.ip() {
            continue;
        }
        if let Some(inbound) = parse_poll(&buffer[..len]) {
            return Ok(inbound);
        }
    }
}

/// Splits a poll reply into status and attributes items.
pub fn parse_poll(bytes: &[u8]) -> Option<Vec<Inbound>> {
    let reply: Value = serde_json::from_slice(bytes).ok()?;
    let data = reply.get("Data")?;
    let mut inbound = Vec::new();
    if let Some(status) = data.get("Status").filter(|s| s.is_object()) {
        inbound.push(Inbound::Status(normalize_status(status.clone())));
    }
    if let Some(attributes) = data.get("Attributes").filter(|a| a.is_object()) {
        inbound.push(Inbound::Attributes(attributes.clone()));
    }
    Some(inbound)
}
