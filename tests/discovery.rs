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

//! UDP discovery and address book persistence

use std::net::Ipv4Addr;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::UdpSocket;

use sdcp_session_tokio::sdcp::{
    AddressBook, DeviceIdentity, Discovery, JsonAddressBook, SessionError, UdpDiscovery,
};

mod common;

/// Answers every `M99999` with each of `replies`, in order.
async fn responder(replies: Vec<Value>) -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buffer = [0u8; 256];
        while let Ok((len, from)) = socket.recv_from(&mut buffer).await {
            if &buffer[..len] != b"M99999" {
                continue;
            }
            for reply in &replies {
                let _ = socket.send_to(reply.to_string().as_bytes(), from).await;
            }
        }
    });
    port
}

fn saturn_reply() -> Value {
    json!({
        "Id": "979d4C788A4a78bC777A870F1A02867A",
        "Data": {
            "Name": "Saturn",
            "MachineName": "Saturn 4 Ultra",
            "BrandName": "ELEGOO",
            "MainboardIP": "127.0.0.1",
            "MainboardID": "000000000001d354",
            "ProtocolVersion": "V3.0.0",
            "FirmwareVersion": "V1.0.0"
        }
    })
}

fn mars_reply() -> Value {
    json!({
        "Id": "mars-conn",
        "Data": {
            "Attributes": {
                "Name": "Mars",
                "MainboardID": "0000000000020001",
                "ProtocolVersion": "V1.0.0"
            },
            "Status": {"CurrentStatus": 0}
        }
    })
}

// =============================================================================
// Discovery
// =============================================================================

#[tokio::test]
async fn single_address_is_resolved() {
    common::init_tracing();
    let port = responder(vec![saturn_reply()]).await;
    let discovery = UdpDiscovery::new(port);

    let identity = discovery
        .broadcast("127.0.0.1", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(identity.mainboard_id.as_deref(), Some("000000000001d354"));
    assert_eq!(identity.id.as_deref(), Some("979d4C788A4a78bC777A870F1A02867A"));
    assert_eq!(identity.machine_name.as_deref(), Some("Saturn 4 Ultra"));
    assert_eq!(identity.protocol_major(), Some(3));
}

#[tokio::test]
async fn nested_attributes_take_the_sender_address() {
    common::init_tracing();
    let port = responder(vec![mars_reply()]).await;
    let identity = UdpDiscovery::new(port)
        .broadcast("127.0.0.1", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(identity.name.as_deref(), Some("Mars"));
    assert_eq!(identity.mainboard_ip.as_deref(), Some("127.0.0.1"));
    assert_eq!(identity.protocol_major(), Some(1));
}

#[tokio::test]
async fn silent_address_is_a_discovery_error() {
    common::init_tracing();
    let port = responder(Vec::new()).await;
    match UdpDiscovery::new(port)
        .broadcast("127.0.0.1", Duration::from_millis(200))
        .await
    {
        Err(SessionError::Discovery(message)) => assert!(message.contains("127.0.0.1")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn lan_scan_collects_distinct_printers() {
    common::init_tracing();
    let port = responder(vec![
        saturn_reply(),
        json!({"Id": "noise", "Data": {"Name": "no id"}}),
        mars_reply(),
        saturn_reply(),
    ])
    .await;
    let discovery = UdpDiscovery::new(port).with_broadcast_address(Ipv4Addr::LOCALHOST);

    let mut devices = discovery.discover(Duration::from_millis(500)).await.unwrap();
    devices.sort_by(|a, b| a.mainboard_id.cmp(&b.mainboard_id));
    let ids: Vec<_> = devices
        .iter()
        .filter_map(|device| device.mainboard_id.as_deref())
        .collect();
    assert_eq!(ids, ["000000000001d354", "0000000000020001"]);
}

// =============================================================================
// Address book
// =============================================================================

fn record(mainboard_id: &str, name: &str) -> DeviceIdentity {
    DeviceIdentity {
        id: Some(format!("conn-{mainboard_id}")),
        name: Some(name.into()),
        mainboard_ip: Some("192.168.1.50".into()),
        mainboard_id: Some(mainboard_id.into()),
        protocol_version: Some("V3.0.0".into()),
        ..DeviceIdentity::default()
    }
}

#[tokio::test]
async fn missing_address_book_loads_empty() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let book = JsonAddressBook::new(dir.path().join("config.json"));
    assert!(book.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn address_book_upserts_and_removes() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let book = JsonAddressBook::new(dir.path().join("config.json"));

    assert!(book.upsert(record("m1", "Saturn")).await.unwrap());
    assert!(book.upsert(record("m2", "Mars")).await.unwrap());
    let renamed = DeviceIdentity {
        name: Some("Saturn (desk)".into()),
        mainboard_id: Some("m1".into()),
        ..DeviceIdentity::default()
    };
    assert!(book.upsert(renamed).await.unwrap());
    assert!(!book.upsert(DeviceIdentity::default()).await.unwrap());

    let records = book.load().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name.as_deref(), Some("Saturn (desk)"));
    assert_eq!(records[0].mainboard_ip.as_deref(), Some("192.168.1.50"));

    assert!(book.remove("conn-m2").await.unwrap());
    assert!(!book.remove("nobody").await.unwrap());
    assert!(book.remove("m1").await.unwrap());
    assert!(book.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn address_book_file_uses_protocol_field_names() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let book = JsonAddressBook::new(&path);
    book.save(&[record("m1", "Saturn")]).await.unwrap();

    let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(written[0]["MainboardID"], "m1");
    assert_eq!(written[0]["MainboardIP"], "192.168.1.50");
    assert_eq!(written[0]["ProtocolVersion"], "V3.0.0");
    assert!(written[0].get("MachineName").is_none());
}

#[tokio::test]
async fn corrupt_address_book_is_a_decode_error() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, b"{ not json").unwrap();
    assert!(matches!(
        JsonAddressBook::new(&path).load().await,
        Err(SessionError::Decode(_))
    ));
}
