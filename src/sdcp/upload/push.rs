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

//! Chunked direct-push upload over the printer's HTTP endpoint.

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use super::{report, PreparedFile, UploadError, UploadPhase, UploadProgress, UploadResult};

pub const UPLOAD_PATH: &str = "/uploadFile/upload";

/// Upload endpoint of the printer at `ip:port`.
pub fn upload_url(ip: &str, port: u16) -> String {
    format!("http://{ip}:{port}{UPLOAD_PATH}")
}

/// Posts `file` to `url` in `chunk_size` pieces.
///
/// Every chunk is a multipart form with `Uuid`, `Offset`, `TotalSize`,
/// `Check`, `S-File-MD5` and the `File` bytes. A non-2xx reply aborts the
/// upload; there is no resume.
pub async fn push_file(
    client: &reqwest::Client,
    url: &str,
    file: &PreparedFile,
    chunk_size: usize,
    verify: bool,
    progress: Option<&mpsc::UnboundedSender<UploadProgress>>,
) -> Result<UploadResult, UploadError> {
    let chunk_size = chunk_size.max(1);
    let mut reader = tokio::fs::File::open(&file.path).await?;
    report(progress, file.progress(UploadPhase::Preparing, 0));

    let mut offset: u64 = 0;
    let last_reply = loop {
        let chunk = read_chunk(&mut reader, chunk_size).await?;
        let length = chunk.len() as u64;

        let form = Form::new()
            .text("Uuid", file.uuid.clone())
            .text("Offset", offset.to_string())
            .text("TotalSize", file.size.to_string())
            .text("Check", if verify { "1" } else { "0" })
            .text("S-File-MD5", file.md5.clone())
            .part(
                "File",
                Part::bytes(chunk)
                    .file_name(file.filename.clone())
                    .mime_str("application/octet-stream")?,
            );
        tracing::trace!(url, offset, length, "posting upload chunk");
        let response = client.post(url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "upload chunk rejected");
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let reply = serde_json::from_str(&body).unwrap_or(Value::String(body));
        if reply.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(UploadError::DeviceFailure(Box::new(result(
                file, offset, false, reply,
            ))));
        }

        offset += length;
        report(progress, file.progress(UploadPhase::Uploading, offset));
        if length == 0 || offset >= file.size {
            break reply;
        }
    };

    report(progress, file.progress(UploadPhase::Complete, offset));
    tracing::debug!(file = %file.filename, offset, "push upload complete");
    Ok(result(file, offset, true, last_reply))
}

fn result(file: &PreparedFile, offset: u64, success: bool, reply: Value) -> UploadResult {
    UploadResult {
        md5: file.md5.clone(),
        uuid: file.uuid.clone(),
        offset,
        total_size: file.size,
        complete: super::completion(offset, file.size),
        file: file.filename.clone(),
        url: None,
        success,
        result: reply,
    }
}

async fn read_chunk(
    reader: &mut tokio::fs::File,
    chunk_size: usize,
) -> Result<Vec<u8>, std::io::Error> {
    let mut chunk = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        let read = reader.read(&mut chunk[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    chunk.truncate(filled);
    Ok(chunk)
}
