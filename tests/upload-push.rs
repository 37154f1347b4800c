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

//! Direct-push uploads against a fake printer HTTP endpoint

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use sdcp_session_tokio::sdcp::upload::{push::UPLOAD_PATH, UploadPhase};
use sdcp_session_tokio::sdcp::{
    GenericSession, PrinterSession, SessionError, SessionOption, UploadError, UploadOptions,
};

mod common;
mod stub_link;

use stub_link::{resolved_identity, stub_pair, FixedDiscovery, StubBehaviour, StubConnector};

/// One multipart POST as the printer saw it
#[derive(Debug, Clone, Default)]
struct Chunk {
    fields: HashMap<String, String>,
    file_name: Option<String>,
    length: usize,
}

struct Endpoint {
    status: StatusCode,
    reply: Value,
    chunks: Mutex<Vec<Chunk>>,
}

async fn receive(
    State(endpoint): State<Arc<Endpoint>>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let mut chunk = Chunk::default();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if name == "File" {
            chunk.file_name = field.file_name().map(str::to_string);
            chunk.length = field.bytes().await.unwrap().len();
        } else {
            chunk.fields.insert(name, field.text().await.unwrap());
        }
    }
    endpoint.chunks.lock().unwrap().push(chunk);
    (endpoint.status, Json(endpoint.reply.clone()))
}

/// Starts the fake endpoint and returns it with its port.
async fn fake_endpoint(status: StatusCode, reply: Value) -> (Arc<Endpoint>, u16) {
    let endpoint = Arc::new(Endpoint {
        status,
        reply,
        chunks: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route(UPLOAD_PATH, post(receive))
        .with_state(endpoint.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (endpoint, port)
}

async fn connected_session(port: u16) -> GenericSession<StubConnector> {
    let (connector, _device) = stub_pair(StubBehaviour::default());
    let options = SessionOption::builder()
        .device_port(port)
        .chunk_size(1000usize)
        .build()
        .unwrap();
    let session = GenericSession::new(
        resolved_identity(),
        options,
        connector,
        Arc::new(FixedDiscovery::silent()),
    );
    session.connect().await.unwrap();
    session
}

fn print_file(dir: &tempfile::TempDir, size: usize) -> PathBuf {
    let path = dir.path().join("benchy.ctb");
    let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn file_is_posted_in_chunks_with_progress() {
    common::init_tracing();
    let (endpoint, port) = fake_endpoint(StatusCode::OK, json!({"code": "000000", "success": true})).await;
    let session = connected_session(port).await;
    let dir = tempfile::tempdir().unwrap();
    let path = print_file(&dir, 2500);

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let options = UploadOptions::builder()
        .progress(progress_tx)
        .build()
        .unwrap();
    let result = session.upload_file(&path, options).await.unwrap();

    assert!(result.success);
    assert_eq!(result.offset, 2500);
    assert_eq!(result.total_size, 2500);
    assert_eq!(result.complete, 1.0);
    assert_eq!(result.file, "benchy.ctb");
    assert_eq!(result.result["success"], true);
    assert_eq!(result.md5.len(), 32);

    let chunks = endpoint.chunks.lock().unwrap().clone();
    let offsets: Vec<_> = chunks.iter().map(|c| c.fields["Offset"].clone()).collect();
    assert_eq!(offsets, ["0", "1000", "2000"]);
    let lengths: Vec<_> = chunks.iter().map(|c| c.length).collect();
    assert_eq!(lengths, [1000, 1000, 500]);
    for chunk in &chunks {
        assert_eq!(chunk.fields["TotalSize"], "2500");
        assert_eq!(chunk.fields["Check"], "1");
        assert_eq!(chunk.fields["S-File-MD5"], result.md5);
        assert_eq!(chunk.fields["Uuid"], result.uuid);
        assert_eq!(chunk.file_name.as_deref(), Some("benchy.ctb"));
    }

    let mut reports = Vec::new();
    while let Ok(report) = progress_rx.try_recv() {
        reports.push(report);
    }
    assert_eq!(reports.first().map(|r| r.phase), Some(UploadPhase::Preparing));
    assert_eq!(reports.last().map(|r| r.phase), Some(UploadPhase::Complete));
    let uploading: Vec<_> = reports
        .iter()
        .filter(|r| r.phase == UploadPhase::Uploading)
        .map(|r| r.offset)
        .collect();
    assert_eq!(uploading, [1000, 2000, 2500]);
}

#[tokio::test]
async fn renamed_upload_without_verification() {
    common::init_tracing();
    let (endpoint, port) = fake_endpoint(StatusCode::OK, json!({"success": true})).await;
    let session = connected_session(port).await;
    let dir = tempfile::tempdir().unwrap();
    let path = print_file(&dir, 10);

    let options = UploadOptions::builder()
        .verify(false)
        .filename("renamed.ctb")
        .build()
        .unwrap();
    let result = session.upload_file(&path, options).await.unwrap();
    assert_eq!(result.file, "renamed.ctb");

    let chunks = endpoint.chunks.lock().unwrap().clone();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].fields["Check"], "0");
    assert_eq!(chunks[0].file_name.as_deref(), Some("renamed.ctb"));
}

#[tokio::test]
async fn http_error_aborts_the_upload() {
    common::init_tracing();
    let (endpoint, port) =
        fake_endpoint(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "disk full"})).await;
    let session = connected_session(port).await;
    let dir = tempfile::tempdir().unwrap();
    let path = print_file(&dir, 2500);

    match session.upload_file(&path, UploadOptions::default()).await {
        Err(SessionError::Upload(UploadError::Rejected { status, body })) => {
            assert_eq!(status, 500);
            assert!(body.contains("disk full"));
        }
        other => panic!("unexpected {other:?}"),
    }
    // No resume: the first rejected chunk is the last one sent.
    assert_eq!(endpoint.chunks.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn device_refusal_is_reported_as_failure() {
    common::init_tracing();
    let (_endpoint, port) =
        fake_endpoint(StatusCode::OK, json!({"code": "000001", "success": false})).await;
    let session = connected_session(port).await;
    let dir = tempfile::tempdir().unwrap();
    let path = print_file(&dir, 100);

    match session.upload_file(&path, UploadOptions::default()).await {
        Err(SessionError::Upload(UploadError::DeviceFailure(result))) => {
            assert!(!result.success);
            assert_eq!(result.result["code"], "000001");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn upload_requires_a_connection() {
    common::init_tracing();
    let (connector, _device) = stub_pair(StubBehaviour::default());
    let session = GenericSession::new(
        resolved_identity(),
        SessionOption::default(),
        connector,
        Arc::new(FixedDiscovery::silent()),
    );
    let dir = tempfile::tempdir().unwrap();
    let path = print_file(&dir, 10);

    assert!(matches!(
        session.upload_file(&path, UploadOptions::default()).await,
        Err(SessionError::NotConnected)
    ));
    // The connection is checked before the file is touched.
    assert!(matches!(
        session
            .upload_file(&dir.path().join("missing.ctb"), UploadOptions::default())
            .await,
        Err(SessionError::NotConnected)
    ));
}
