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

//! One-shot HTTP server that lets a printer pull a single file.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::stream;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::{PreparedFile, UploadError};

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

struct Served {
    path: PathBuf,
    size: u64,
    taken: AtomicBool,
    fetched: Notify,
}

/// Serves one file at `/{md5}{ext}`, once.
///
/// The server stops after the first fetch has been answered, or when the
/// timeout passes without one.
pub struct SingleFileServer {
    addr: SocketAddr,
    route: String,
    served: Arc<Served>,
    task: Option<JoinHandle<()>>,
}

impl SingleFileServer {
    /// Binds `0.0.0.0:{port}` (0 for ephemeral) and starts serving `file`.
    pub async fn start(
        file: &PreparedFile,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let addr = listener.local_addr()?;
        let route = format!("/{}{}", file.md5, file.extension);
        let served = Arc::new(Served {
            path: file.path.clone(),
            size: file.size,
            taken: AtomicBool::new(false),
            fetched: Notify::new(),
        });

        let app = Router::new()
            .route(&route, get(serve_once))
            .with_state(served.clone());
        let shutdown = {
            let served = served.clone();
            async move {
                tokio::select! {
                    _ = served.fetched.notified() => {
                        tracing::debug!("file fetched; stopping file server");
                    }
                    _ = tokio::time::sleep(timeout) => {
                        tracing::debug!("file server timed out");
                    }
                }
            }
        };
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::warn!(error = %e, "file server failed");
            }
        });
        tracing::debug!(%addr, route = %route, "file server started");
        Ok(Self {
            addr,
            route,
            served,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Path component the file is served under.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// URL advertised to a printer that reaches us at `host`.
    pub fn url_for(&self, host: IpAddr) -> String {
        format!("http://{}:{}{}", host, self.addr.port(), self.route)
    }

    /// Whether the file has been requested.
    pub fn fetched(&self) -> bool {
        self.served.taken.load(Ordering::Acquire)
    }

    /// Waits until the server has stopped.
    ///
    /// Returns [`UploadError::ServerTimeout`] when it stopped without serving.
    pub async fn finished(mut self) -> Result<(), UploadError> {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        if self.served.taken.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(UploadError::ServerTimeout)
        }
    }

    pub fn stop(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for SingleFileServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve_once(State(served): State<Arc<Served>>) -> Response {
    if served.taken.swap(true, Ordering::AcqRel) {
        return StatusCode::GONE.into_response();
    }
    let file = match tokio::fs::File::open(&served.path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(error = %e, "cannot open upload file");
            served.fetched.notify_one();
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    served.fetched.notify_one();

    let body = stream::unfold(Some(file), |file| async move {
        let mut file = file?;
        let mut buffer = vec![0u8; STREAM_CHUNK_SIZE];
        match file.read(&mut buffer).await {
            Ok(0) => None,
            Ok(read) => {
                buffer.truncate(read);
                Some((Ok::<Bytes, std::io::Error>(Bytes::from(buffer)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, served.size.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
