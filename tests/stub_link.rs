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

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use sdcp_session_tokio::sdcp::command::CommandEnvelope;
use sdcp_session_tokio::sdcp::link::{DeviceLink, Inbound, LinkConnector, UploadMode};
use sdcp_session_tokio::sdcp::{DeviceIdentity, Discovery, SessionError, TransportError};

pub const MAINBOARD_ID: &str = "000000000001d354";
pub const DEVICE_IP: &str = "127.0.0.1";

/// Record of what the session did with the stub
#[derive(Debug)]
#[allow(dead_code)]
pub enum LinkCall {
    Connect { mainboard_id: Option<String> },
    Send(Box<CommandEnvelope>),
    Close,
}

type InboundTx = mpsc::UnboundedSender<Result<Vec<Inbound>, TransportError>>;

/// Behaviour switches for [`StubConnector`]
#[derive(Debug, Clone)]
pub struct StubBehaviour {
    pub acknowledges_queries: bool,
    pub unsupported: Vec<u16>,
    pub upload_mode: UploadMode,
    /// Overrides the configured reconnect interval when set.
    pub reconnect_delay: Option<Duration>,
}

impl Default for StubBehaviour {
    fn default() -> Self {
        Self {
            acknowledges_queries: true,
            unsupported: Vec::new(),
            upload_mode: UploadMode::Push,
            reconnect_delay: Some(Duration::from_millis(20)),
        }
    }
}

/// Connector whose links are driven by a [`StubDevice`]
pub struct StubConnector {
    behaviour: StubBehaviour,
    calls_tx: mpsc::UnboundedSender<LinkCall>,
    current: Arc<Mutex<Option<InboundTx>>>,
    connect_failures: Arc<Mutex<VecDeque<TransportError>>>,
}

/// Test-side handle to the links a [`StubConnector`] opened
pub struct StubDevice {
    calls: mpsc::UnboundedReceiver<LinkCall>,
    current: Arc<Mutex<Option<InboundTx>>>,
    connect_failures: Arc<Mutex<VecDeque<TransportError>>>,
}

pub fn stub_pair(behaviour: StubBehaviour) -> (StubConnector, StubDevice) {
    let (calls_tx, calls) = mpsc::unbounded_channel();
    let current = Arc::new(Mutex::new(None));
    let connect_failures = Arc::new(Mutex::new(VecDeque::new()));
    (
        StubConnector {
            behaviour,
            calls_tx,
            current: current.clone(),
            connect_failures: connect_failures.clone(),
        },
        StubDevice {
            calls,
            current,
            connect_failures,
        },
    )
}

impl LinkConnector for StubConnector {
    type Link = StubLink;

    fn name(&self) -> &'static str {
        "stub"
    }

    fn accepts(&self, protocol_major: Option<u32>) -> bool {
        protocol_major != Some(1)
    }

    fn connect<'a>(
        &'a self,
        identity: &'a DeviceIdentity,
    ) -> BoxFuture<'a, Result<StubLink, TransportError>> {
        Box::pin(async move {
            let _ = self.calls_tx.send(LinkCall::Connect {
                mainboard_id: identity.mainboard_id.clone(),
            });
            if let Some(error) = self.connect_failures.lock().unwrap().pop_front() {
                return Err(error);
            }
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            *self.current.lock().unwrap() = Some(inbound_tx);
            Ok(StubLink {
                calls_tx: self.calls_tx.clone(),
                inbound_rx,
                unsupported: self.behaviour.unsupported.clone(),
            })
        })
    }

    fn upload_mode(&self) -> UploadMode {
        self.behaviour.upload_mode
    }

    fn acknowledges_queries(&self) -> bool {
        self.behaviour.acknowledges_queries
    }

    fn reconnect_delay(&self, configured: Duration) -> Duration {
        self.behaviour.reconnect_delay.unwrap_or(configured)
    }
}

pub struct StubLink {
    calls_tx: mpsc::UnboundedSender<LinkCall>,
    inbound_rx: mpsc::UnboundedReceiver<Result<Vec<Inbound>, TransportError>>,
    unsupported: Vec<u16>,
}

impl DeviceLink for StubLink {
    fn send<'a>(
        &'a mut self,
        envelope: &'a CommandEnvelope,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if self.unsupported.contains(&envelope.opcode()) {
                return Err(TransportError::Unsupported(format!(
                    "opcode {}",
                    envelope.opcode()
                )));
            }
            let _ = self.calls_tx.send(LinkCall::Send(Box::new(envelope.clone())));
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Vec<Inbound>, TransportError>> {
        Box::pin(async move {
            match self.inbound_rx.recv().await {
                Some(batch) => batch,
                None => Err(TransportError::Closed),
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.calls_tx.send(LinkCall::Close);
        })
    }
}

#[allow(dead_code)]
impl StubDevice {
    /// Delivers `inbound` on the most recently opened link.
    pub fn push(&self, inbound: Inbound) {
        self.deliver(Ok(vec![inbound]));
    }

    /// Makes the current link fail with `error`.
    pub fn break_link(&self, error: TransportError) {
        self.deliver(Err(error));
    }

    /// Makes the next `count` connect calls fail.
    pub fn fail_next_connects(&self, count: usize) {
        let mut failures = self.connect_failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(TransportError::Connect("refused".into()));
        }
    }

    pub async fn next_call(&mut self) -> LinkCall {
        tokio::time::timeout(Duration::from_secs(5), self.calls.recv())
            .await
            .expect("timed out waiting for a link call")
            .expect("connector dropped")
    }

    /// Call already recorded, without waiting.
    pub fn try_next_call(&mut self) -> Option<LinkCall> {
        self.calls.try_recv().ok()
    }

    /// Next envelope the session sent, skipping connects and closes.
    pub async fn next_sent(&mut self) -> CommandEnvelope {
        loop {
            if let LinkCall::Send(envelope) = self.next_call().await {
                return *envelope;
            }
        }
    }

    fn deliver(&self, batch: Result<Vec<Inbound>, TransportError>) {
        let current = self.current.lock().unwrap();
        current
            .as_ref()
            .expect("no link is open")
            .send(batch)
            .expect("link already dropped");
    }
}

/// Response-channel message answering `envelope` with `ack` and extra `data`.
#[allow(dead_code)]
pub fn response_to(envelope: &CommandEnvelope, ack: i64, data: Value) -> Value {
    let mut inner = json!({ "Ack": ack });
    if let (Some(inner), Value::Object(extra)) = (inner.as_object_mut(), data) {
        inner.extend(extra);
    }
    json!({
        "Id": envelope.id,
        "Data": {
            "Cmd": envelope.opcode(),
            "Data": inner,
            "RequestID": envelope.request_id(),
            "MainboardID": MAINBOARD_ID,
            "TimeStamp": 1_700_000_000u64
        },
        "Topic": format!("sdcp/response/{MAINBOARD_ID}")
    })
}

/// Identity the stub connector can connect to without discovery.
#[allow(dead_code)]
pub fn resolved_identity() -> DeviceIdentity {
    DeviceIdentity {
        id: Some("f25273b12b094c5a8b9513a30ca60049".into()),
        mainboard_ip: Some(DEVICE_IP.into()),
        mainboard_id: Some(MAINBOARD_ID.into()),
        protocol_version: Some("V3.0.0".into()),
        ..DeviceIdentity::default()
    }
}

/// Discovery that answers every address with a fixed identity, or fails.
pub struct FixedDiscovery {
    pub reply: Option<DeviceIdentity>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl FixedDiscovery {
    pub fn answering(reply: DeviceIdentity) -> Self {
        Self {
            reply: Some(reply),
            calls: Arc::default(),
        }
    }

    pub fn silent() -> Self {
        Self {
            reply: None,
            calls: Arc::default(),
        }
    }
}

impl Discovery for FixedDiscovery {
    fn broadcast<'a>(
        &'a self,
        address: &'a str,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<DeviceIdentity, SessionError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(address.to_string());
            self.reply
                .clone()
                .ok_or_else(|| SessionError::Discovery(format!("no reply from {address}")))
        })
    }

    fn discover(
        &self,
        _timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<DeviceIdentity>, SessionError>> {
        Box::pin(async move { Ok(self.reply.clone().into_iter().collect()) })
    }
}
