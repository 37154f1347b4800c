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

//! Persistence of known printers.

use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;

use crate::sdcp::device::DeviceIdentity;
use crate::sdcp::session_error::SessionError;
use crate::sdcp::transport::TransportError;

pub const DEFAULT_ADDRESS_BOOK: &str = "config.json";

/// Storage for device records.
pub trait AddressBook: Send + Sync {
    fn load(&self) -> BoxFuture<'_, Result<Vec<DeviceIdentity>, SessionError>>;

    fn save<'a>(&'a self, records: &'a [DeviceIdentity]) -> BoxFuture<'a, Result<(), SessionError>>;
}

/// Address book kept as a pretty-printed JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonAddressBook {
    path: PathBuf,
}

impl Default for JsonAddressBook {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS_BOOK)
    }
}

impl JsonAddressBook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<DeviceIdentity>, SessionError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TransportError::Io(e).into()),
        };
        let records: Vec<DeviceIdentity> = serde_json::from_slice(&bytes)?;
        tracing::debug!(path = %self.path.display(), entries = records.len(), "loaded address book");
        Ok(records)
    }

    async fn write(&self, records: &[DeviceIdentity]) -> Result<(), SessionError> {
        let json = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(TransportError::Io)?;
        tracing::debug!(path = %self.path.display(), entries = records.len(), "saved address book");
        Ok(())
    }

    /// Adds `record`, or updates the entry with the same `MainboardID`.
    ///
    /// Records without a `MainboardID` are ignored and `false` is returned.
    pub async fn upsert(&self, record: DeviceIdentity) -> Result<bool, SessionError> {
        let Some(id) = record.mainboard_id.clone() else {
            return Ok(false);
        };
        let mut records = self.read().await?;
        match records
            .iter_mut()
            .find(|entry| entry.mainboard_id.as_deref() == Some(id.as_str()))
        {
            Some(existing) => existing.merge(record),
            None => records.push(record),
        }
        self.write(&records).await?;
        Ok(true)
    }

    /// Removes the entry whose `Id` or `MainboardID` equals `id`.
    pub async fn remove(&self, id: &str) -> Result<bool, SessionError> {
        let mut records = self.read().await?;
        let before = records.len();
        records.retain(|entry| {
            entry.id.as_deref() != Some(id) && entry.mainboard_id.as_deref() != Some(id)
        });
        if records.len() == before {
            return Ok(false);
        }
        self.write(&records).await?;
        Ok(true)
    }
}

impl AddressBook for JsonAddressBook {
    fn load(&self) -> BoxFuture<'_, Result<Vec<DeviceIdentity>, SessionError>> {
        Box::pin(self.read())
    }

    fn save<'a>(&'a self, records: &'a [DeviceIdentity]) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(self.write(records))
    }
}
