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

//! Upload completion read from status broadcasts.

use serde_json::Value;

use super::{PreparedFile, UploadPhase, UploadProgress, UploadResult};
use crate::sdcp::constants::{file_transfer_status, machine_status};
use crate::sdcp::link::current_status;

/// What one status broadcast says about an upload in progress.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerOutcome {
    /// Nothing relevant in this status.
    Pending,
    /// The printer is still transferring.
    Progress(UploadProgress),
    /// The transfer ended; `success` tells how.
    Finished(UploadResult),
}

/// Follows `FileTransferInfo` of one pull upload.
#[derive(Debug, Clone)]
pub struct UploadTracker {
    file: PreparedFile,
    url: Option<String>,
}

impl UploadTracker {
    pub fn new(file: PreparedFile, url: Option<String>) -> Self {
        Self { file, url }
    }

    pub fn file(&self) -> &PreparedFile {
        &self.file
    }

    /// Interprets one status object.
    ///
    /// `CurrentStatus` may be a number or a list of numbers.
    pub fn observe(&self, status: &Value) -> TrackerOutcome {
        let Some(info) = status.get("FileTransferInfo") else {
            return TrackerOutcome::Pending;
        };
        let current = current_status(status);
        let offset = info
            .get("DownloadOffset")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let total = info
            .get("FileTotalSize")
            .and_then(Value::as_u64)
            .unwrap_or(self.file.size);

        if current.contains(&machine_status::IDLE) {
            let transfer = info.get("Status").and_then(Value::as_i64);
            let success = match transfer {
                Some(file_transfer_status::COMPLETED) => true,
                Some(file_transfer_status::FAILED) => false,
                _ => return TrackerOutcome::Pending,
            };
            return TrackerOutcome::Finished(UploadResult {
                md5: self.file.md5.clone(),
                uuid: self.file.uuid.clone(),
                offset,
                total_size: total,
                complete: 1.0,
                file: self.file.filename.clone(),
                url: self.url.clone(),
                success,
                result: info.clone(),
            });
        }

        if current.contains(&machine_status::FILE_TRANSFERRING) {
            let mut progress = self.file.progress(UploadPhase::Uploading, offset);
            progress.total_size = total;
            progress.complete = super::completion(offset, total);
            return TrackerOutcome::Progress(progress);
        }

        TrackerOutcome::Pending
    }
}
