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

//! Polling sessions against an in-process fake printer on UDP

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::UdpSocket;

use sdcp_session_tokio::sdcp::{
    DeviceIdentity, GenericSession, PollingConnector, PollingSession, PrinterSession, SessionError,
    SessionEvent, SessionOption, SessionState, UdpDiscovery,
};

mod common;

const MAINBOARD_ID: &str = "udp-printer-01";

/// Answers `M99999` with the current status until told to go silent.
struct FakePrinter {
    port: u16,
    silent: Arc<AtomicBool>,
    status: Arc<Mutex<Value>>,
    polls: Arc<AtomicUsize>,
}

impl FakePrinter {
    async fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let silent = Arc::new(AtomicBool::new(false));
        let status = Arc::new(Mutex::new(json!({"CurrentStatus": 0})));
        let polls = Arc::new(AtomicUsize::new(0));

        tokio::spawn({
            let silent = silent.clone();
            let status = status.clone();
            let polls = polls.clone();
            async move {
                let mut buffer = [0u8; 1024];
                while let Ok((len, from)) = socket.recv_from(&mut buffer).await {
                    if &buffer[..len] != b"M99999" {
                        continue;
                    }
                    polls.fetch_add(1, Ordering::SeqCst);
                    if silent.load(Ordering::SeqCst) {
                        continue;
                    }
                    let reply = json!({
                        "Id": "udp-conn",
                        "Data": {
                            "Status": status.lock().unwrap().clone(),
                            "Attributes": {"Name": "Mars", "MainboardID": MAINBOARD_ID}
                        }
                    });
                    let _ = socket.send_to(reply.to_string().as_bytes(), from).await;
                }
            }
        });
        Self {
            port,
            silent,
            status,
            polls,
        }
    }

    fn set_status(&self, status: Value) {
        *self.status.lock().unwrap() = status;
    }
}

fn new_session(printer: &FakePrinter) -> PollingSession {
    let options = SessionOption::builder()
        .discovery_port(printer.port)
        .poll_interval_ms(50u64)
        .poll_timeout_ms(50u64)
        .poll_failure_threshold(3u32)
        .build()
        .unwrap();
    let identity = DeviceIdentity {
        id: Some("udp-conn".into()),
        mainboard_ip: Some("127.0.0.1".into()),
        mainboard_id: Some(MAINBOARD_ID.into()),
        protocol_version: Some("V2.0.0".into()),
        ..DeviceIdentity::default()
    };
    GenericSession::new(
        identity,
        options.clone(),
        PollingConnector::new(&options),
        Arc::new(UdpDiscovery::new(printer.port)),
    )
}

async fn next_event(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

#[tokio::test]
async fn status_query_is_answered_by_a_poll() {
    common::init_tracing();
    let printer = FakePrinter::start().await;
    printer.set_status(json!({"CurrentStatus": 1, "PrintInfo": {"CurrentLayer": 4}}));
    let session = new_session(&printer);

    session.connect().await.unwrap();
    assert_eq!(session.transport(), "polling");

    let status = session.get_status(false).await.unwrap();
    assert_eq!(status["CurrentStatus"], json!([1]));
    let attributes = session.get_attributes(true).await.unwrap();
    assert_eq!(attributes["Name"], "Mars");
}

#[tokio::test]
async fn status_changes_are_raised_as_events() {
    common::init_tracing();
    let printer = FakePrinter::start().await;
    let session = new_session(&printer);
    let mut events = session.subscribe();

    session.connect().await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Connected { reconnect: false }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Status(json!({"CurrentStatus": [0]}))
    );

    printer.set_status(json!({"CurrentStatus": 2}));
    loop {
        match next_event(&mut events).await {
            SessionEvent::Status(status) => {
                assert_eq!(status["CurrentStatus"], json!([2]));
                break;
            }
            SessionEvent::Attributes(_) => {}
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(printer.polls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn printer_commands_are_not_carried() {
    common::init_tracing();
    let printer = FakePrinter::start().await;
    let session = new_session(&printer);
    session.connect().await.unwrap();

    match session.stop_print().await {
        Err(SessionError::Unsupported { opcode }) => assert_eq!(opcode, 130),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn silent_printer_counts_as_disconnection() {
    common::init_tracing();
    let printer = FakePrinter::start().await;
    let session = new_session(&printer);
    let mut events = session.subscribe();

    session.connect().await.unwrap();
    printer.silent.store(true, Ordering::SeqCst);

    loop {
        if next_event(&mut events).await == SessionEvent::Disconnected {
            break;
        }
    }
    let mut states = session.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == SessionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn connect_fails_when_nobody_answers() {
    common::init_tracing();
    let printer = FakePrinter::start().await;
    printer.silent.store(true, Ordering::SeqCst);
    let session = new_session(&printer);

    assert!(matches!(
        session.connect().await,
        Err(SessionError::Transport(_)) | Err(SessionError::Timeout)
    ));
    assert_eq!(printer.polls.load(Ordering::SeqCst), 3);
}
