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

//! Print-file transfer to a printer.
//!
//! Two delivery modes exist, chosen by the session variant:
//!
//! * Push ([`push`]): the file is posted in 1 MiB chunks to the printer's
//!   `/uploadFile/upload` endpoint; each chunk carries the whole-file MD5.
//! * Pull ([`file_server`], [`tracker`]): the printer is handed a URL with an
//!   upload command and fetches the file itself. Completion is read from the
//!   `FileTransferInfo` of subsequent status broadcasts.
//!
//! Both start by stat-ing the file and streaming it once through MD5.

pub mod file_server;
pub mod push;
pub mod tracker;

pub use file_server::SingleFileServer;
pub use push::push_file;
pub use tracker::{TrackerOutcome, UploadTracker};

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Stage of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadPhase {
    Preparing,
    Uploading,
    Complete,
}

/// Progress report delivered to the progress sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadProgress {
    #[serde(rename = "Status")]
    pub phase: UploadPhase,
    #[serde(rename = "S-File-MD5")]
    pub md5: String,
    pub uuid: String,
    pub offset: u64,
    pub total_size: u64,
    /// Completion ratio in `0.0..=1.0`
    pub complete: f64,
    pub file: String,
}

/// Final outcome of an upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadResult {
    #[serde(rename = "S-File-MD5")]
    pub md5: String,
    pub uuid: String,
    pub offset: u64,
    pub total_size: u64,
    pub complete: f64,
    pub file: String,
    #[serde(rename = "URL", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub success: bool,
    /// What the printer reported: the last chunk reply for push uploads,
    /// `FileTransferInfo` for pull uploads.
    pub result: Value,
}

/// Errors raised while transferring a file.
#[derive(Debug)]
pub enum UploadError {
    Io(std::io::Error),
    Http(reqwest::Error),
    /// A chunk was answered with a non-2xx status.
    Rejected { status: u16, body: String },
    /// The printer reported that the transfer failed.
    DeviceFailure(Box<UploadResult>),
    /// Nobody fetched the file before the file server timed out.
    ServerTimeout,
    Cancelled,
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Io(e) => write!(f, "IO error: {e}"),
            UploadError::Http(e) => write!(f, "HTTP error: {e}"),
            UploadError::Rejected { status, body } => {
                write!(f, "Chunk rejected with HTTP {status}: {body}")
            }
            UploadError::DeviceFailure(result) => {
                write!(f, "Printer reported a failed transfer of {}", result.file)
            }
            UploadError::ServerTimeout => write!(f, "The printer never fetched the file"),
            UploadError::Cancelled => write!(f, "Upload cancelled"),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::Io(e) => Some(e),
            UploadError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        UploadError::Io(e)
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Http(e)
    }
}

/// Per-call upload options.
///
/// # Usage
///
/// ```ignore
/// use sdcp_session_tokio::sdcp::upload::UploadOptions;
///
/// let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
/// let options = UploadOptions::builder()
///     .verify(true)
///     .progress(progress_tx)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(derive(Debug), pattern = "owned", setter(into))]
pub struct UploadOptions {
    /// Ask the printer to verify the MD5 after the transfer
    ///
    /// # Default
    /// true
    #[builder(default = "true")]
    pub verify: bool,

    /// URL the printer should fetch from, for pull uploads
    ///
    /// When unset a [`SingleFileServer`] is started for the transfer.
    #[builder(default, setter(into, strip_option))]
    pub target_url: Option<String>,

    /// Name the file gets on the printer; defaults to the local file name
    #[builder(default, setter(into, strip_option))]
    pub filename: Option<String>,

    /// Receives a report before the first byte and after every step
    #[builder(default, setter(into, strip_option))]
    pub progress: Option<mpsc::UnboundedSender<UploadProgress>>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Default UploadOptions should be valid")
    }
}

impl UploadOptions {
    /// Create a new builder for UploadOptions
    pub fn builder() -> UploadOptionsBuilder {
        UploadOptionsBuilder::default()
    }
}

/// A local file ready to be transferred.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFile {
    pub path: PathBuf,
    /// Name on the printer
    pub filename: String,
    /// Extension including the dot, or empty
    pub extension: String,
    pub size: u64,
    pub md5: String,
    pub uuid: String,
}

impl PreparedFile {
    /// Stats and hashes `path`.
    ///
    /// Fails before any network activity if the file is missing.
    pub async fn open(path: &Path, filename: Option<&str>) -> Result<Self, UploadError> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            )));
        }
        let filename = match filename {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let extension = Path::new(&filename)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let md5 = file_md5(path).await?;
        tracing::debug!(file = %filename, size = metadata.len(), md5 = %md5, "prepared upload");
        Ok(Self {
            path: path.to_path_buf(),
            filename,
            extension,
            size: metadata.len(),
            md5,
            uuid: new_upload_uuid(),
        })
    }

    pub fn progress(&self, phase: UploadPhase, offset: u64) -> UploadProgress {
        UploadProgress {
            phase,
            md5: self.md5.clone(),
            uuid: self.uuid.clone(),
            offset,
            total_size: self.size,
            complete: completion(offset, self.size),
            file: self.filename.clone(),
        }
    }
}

/// Hex MD5 of a file, read in constant memory.
pub async fn file_md5(path: &Path) -> Result<String, std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// 256 random bits, hex encoded.
pub fn new_upload_uuid() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

pub(crate) fn completion(offset: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        (offset as f64 / total as f64).min(1.0)
    }
}

pub(crate) fn report(sink: Option<&mpsc::UnboundedSender<UploadProgress>>, progress: UploadProgress) {
    if let Some(sink) = sink {
        let _ = sink.send(progress);
    }
}
