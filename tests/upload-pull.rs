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

//! Pull uploads: the printer fetches the file and reports through status

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use sdcp_session_tokio::sdcp::link::{Inbound, UploadMode};
use sdcp_session_tokio::sdcp::upload::UploadPhase;
use sdcp_session_tokio::sdcp::{
    GenericSession, PrinterSession, SessionError, SessionOption, UploadError, UploadOptions,
};

mod common;
mod stub_link;

use stub_link::{
    resolved_identity, response_to, stub_pair, FixedDiscovery, LinkCall, StubBehaviour,
    StubConnector, StubDevice,
};

async fn connected(options: SessionOption) -> (GenericSession<StubConnector>, StubDevice) {
    let (connector, mut device) = stub_pair(StubBehaviour {
        upload_mode: UploadMode::Pull,
        ..StubBehaviour::default()
    });
    let session = GenericSession::new(
        resolved_identity(),
        options,
        connector,
        Arc::new(FixedDiscovery::silent()),
    );
    session.connect().await.unwrap();
    assert!(matches!(device.next_call().await, LinkCall::Connect { .. }));
    (session, device)
}

fn print_file(dir: &tempfile::TempDir) -> (PathBuf, Vec<u8>) {
    let path = dir.path().join("ring.goo");
    let content: Vec<u8> = (0..4096u32).map(|i| (i % 253) as u8).collect();
    std::fs::write(&path, &content).unwrap();
    (path, content)
}

fn transfer_status(current: i64, transfer: i64, offset: u64) -> Inbound {
    Inbound::Status(json!({
        "CurrentStatus": [current],
        "FileTransferInfo": {
            "Status": transfer,
            "DownloadOffset": offset,
            "FileTotalSize": 4096,
            "Filename": "ring.goo"
        }
    }))
}

#[tokio::test]
async fn printer_fetches_from_the_file_server() {
    common::init_tracing();
    let (session, mut device) = connected(SessionOption::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let (path, content) = print_file(&dir);

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let upload = tokio::spawn({
        let session = session.clone();
        let options = UploadOptions::builder()
            .progress(progress_tx)
            .build()
            .unwrap();
        async move { session.upload_file(&path, options).await }
    });

    let envelope = device.next_sent().await;
    assert_eq!(envelope.opcode(), 256);
    let params = &envelope.data.data;
    assert_eq!(params["Filename"], "ring.goo");
    assert_eq!(params["FileSize"], 4096);
    assert_eq!(params["Check"], 1);
    let md5 = params["MD5"].as_str().unwrap().to_string();
    let url = params["URL"].as_str().unwrap().to_string();
    assert!(url.ends_with(&format!("/{md5}.goo")), "{url}");

    let fetched = reqwest::get(&url).await.unwrap();
    assert!(fetched.status().is_success());
    assert_eq!(fetched.bytes().await.unwrap().as_ref(), content.as_slice());

    device.push(Inbound::Response(response_to(&envelope, 0, json!({}))));
    device.push(transfer_status(2, 1, 2048));
    device.push(transfer_status(0, 2, 4096));

    let result = tokio::time::timeout(Duration::from_secs(5), upload)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(result.success);
    assert_eq!(result.md5, md5);
    assert_eq!(result.url.as_deref(), Some(url.as_str()));
    assert_eq!(result.result["Status"], 2);

    let mut phases = Vec::new();
    while let Ok(report) = progress_rx.try_recv() {
        phases.push((report.phase, report.complete));
    }
    assert_eq!(
        phases,
        [
            (UploadPhase::Preparing, 0.0),
            (UploadPhase::Uploading, 0.5),
            (UploadPhase::Complete, 1.0),
        ]
    );
}

#[tokio::test]
async fn failed_transfer_is_a_device_failure() {
    common::init_tracing();
    let (session, mut device) = connected(SessionOption::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = print_file(&dir);

    let upload = tokio::spawn({
        let session = session.clone();
        let options = UploadOptions::builder()
            .target_url("http://192.0.2.10:8080/ring.goo")
            .build()
            .unwrap();
        async move { session.upload_file(&path, options).await }
    });

    let envelope = device.next_sent().await;
    assert_eq!(envelope.data.data["URL"], "http://192.0.2.10:8080/ring.goo");
    device.push(Inbound::Response(response_to(&envelope, 0, json!({}))));
    device.push(transfer_status(2, 1, 1024));
    device.push(transfer_status(0, 3, 1024));

    match upload.await.unwrap() {
        Err(SessionError::Upload(UploadError::DeviceFailure(result))) => {
            assert!(!result.success);
            assert_eq!(result.offset, 1024);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn refused_upload_command_is_a_nak() {
    common::init_tracing();
    let (session, mut device) = connected(SessionOption::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = print_file(&dir);

    let upload = tokio::spawn({
        let session = session.clone();
        let options = UploadOptions::builder()
            .target_url("http://192.0.2.10:8080/ring.goo")
            .build()
            .unwrap();
        async move { session.upload_file(&path, options).await }
    });
    let envelope = device.next_sent().await;
    device.push(Inbound::Response(response_to(&envelope, 1, json!({}))));

    match upload.await.unwrap() {
        Err(SessionError::Nak { opcode, ack, .. }) => {
            assert_eq!(opcode, 256);
            assert_eq!(ack, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn unfetched_file_times_out() {
    common::init_tracing();
    let options = SessionOption::builder()
        .file_server_timeout_ms(200u64)
        .build()
        .unwrap();
    let (session, mut device) = connected(options).await;
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = print_file(&dir);

    let upload = tokio::spawn({
        let session = session.clone();
        async move { session.upload_file(&path, UploadOptions::default()).await }
    });
    let envelope = device.next_sent().await;
    device.push(Inbound::Response(response_to(&envelope, 0, json!({}))));

    let outcome: Result<_, SessionError> = tokio::time::timeout(Duration::from_secs(5), upload)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        outcome,
        Err(SessionError::Upload(UploadError::ServerTimeout))
    ));
}

#[tokio::test]
async fn disconnect_during_transfer_fails_the_upload() {
    common::init_tracing();
    let (session, mut device) = connected(SessionOption::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = print_file(&dir);

    let upload = tokio::spawn({
        let session = session.clone();
        let options = UploadOptions::builder()
            .target_url("http://192.0.2.10:8080/ring.goo")
            .build()
            .unwrap();
        async move { session.upload_file(&path, options).await }
    });
    let envelope = device.next_sent().await;
    device.push(Inbound::Response(response_to(&envelope, 0, json!({}))));
    device.push(transfer_status(2, 1, 100));
    session.disconnect().await.unwrap();

    let outcome: Result<_, SessionError> = upload.await.unwrap();
    assert!(matches!(outcome, Err(SessionError::Disconnected)));
}
