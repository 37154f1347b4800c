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

//! SDCP command envelopes.
//!
//! A [`Command`] is an opcode with its parameter object. Sessions turn it into
//! a [`CommandEnvelope`] addressed to one device, stamped with a fresh request
//! id, the current time and the session's [`Origin`].

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::sdcp::device::DeviceIdentity;

/// Command opcodes (`Data.Cmd`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Status = 0,
    Attributes = 1,
    StartPrint = 128,
    PausePrint = 129,
    StopPrint = 130,
    ContinuePrint = 131,
    Rename = 192,
    CancelUpload = 255,
    UploadFile = 256,
    ListFiles = 258,
    BatchDelete = 259,
    HistoricalTasks = 320,
    TaskDetails = 321,
    VideoStream = 386,
    Timelapse = 387,
    TimePeriod = 512,
}

impl Opcode {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => Self::Status,
            1 => Self::Attributes,
            128 => Self::StartPrint,
            129 => Self::PausePrint,
            130 => Self::StopPrint,
            131 => Self::ContinuePrint,
            192 => Self::Rename,
            255 => Self::CancelUpload,
            256 => Self::UploadFile,
            258 => Self::ListFiles,
            259 => Self::BatchDelete,
            320 => Self::HistoricalTasks,
            321 => Self::TaskDetails,
            386 => Self::VideoStream,
            387 => Self::Timelapse,
            512 => Self::TimePeriod,
            _ => return None,
        })
    }
}

/// Class of client issuing a command (`Data.From`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Origin {
    /// Local PC software on the LAN
    #[default]
    Pc = 0,
    /// PC software relayed through the web
    WebPc = 1,
    Web = 2,
    App = 3,
    Server = 4,
}

impl From<Origin> for u8 {
    fn from(origin: Origin) -> Self {
        origin as u8
    }
}

impl TryFrom<u8> for Origin {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Origin::Pc),
            1 => Ok(Origin::WebPc),
            2 => Ok(Origin::Web),
            3 => Ok(Origin::App),
            4 => Ok(Origin::Server),
            other => Err(format!("unknown origin {other}")),
        }
    }
}

/// An opcode with its parameters, not yet addressed to a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    opcode: u16,
    data: Map<String, Value>,
}

impl Command {
    pub fn new(opcode: Opcode) -> Self {
        Self::raw(opcode.code())
    }

    /// Command with an opcode outside the known table.
    pub fn raw(opcode: u16) -> Self {
        Self {
            opcode,
            data: Map::new(),
        }
    }

    /// Merges `params` into the parameter object.
    ///
    /// Non-object values are ignored.
    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(params) = params {
            self.data.extend(params);
        }
        self
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Whether the reply is followed by a status or attributes broadcast.
    pub fn is_query(&self) -> bool {
        self.opcode == Opcode::Status.code() || self.opcode == Opcode::Attributes.code()
    }

    pub fn status() -> Self {
        Self::new(Opcode::Status)
    }

    pub fn attributes() -> Self {
        Self::new(Opcode::Attributes)
    }

    pub fn start_print(filename: &str, start_layer: u32) -> Self {
        Self::new(Opcode::StartPrint)
            .with_params(json!({"Filename": filename, "Startlayer": start_layer}))
    }

    pub fn pause_print() -> Self {
        Self::new(Opcode::PausePrint)
    }

    pub fn stop_print() -> Self {
        Self::new(Opcode::StopPrint)
    }

    pub fn continue_print() -> Self {
        Self::new(Opcode::ContinuePrint)
    }

    pub fn rename(name: &str) -> Self {
        Self::new(Opcode::Rename).with_params(json!({"Name": name}))
    }

    pub fn cancel_upload() -> Self {
        Self::new(Opcode::CancelUpload)
    }

    pub fn upload_file(filename: &str, size: u64, md5: &str, url: &str, verify: bool) -> Self {
        Self::new(Opcode::UploadFile).with_params(json!({
            "Check": u8::from(verify),
            "CleanCache": 1,
            "Compress": 0,
            "FileSize": size,
            "Filename": filename,
            "MD5": md5,
            "URL": url,
        }))
    }

    pub fn list_files(path: &str) -> Self {
        Self::new(Opcode::ListFiles).with_params(json!({"Url": path}))
    }

    pub fn batch_delete(files: &[String], folders: &[String]) -> Self {
        Self::new(Opcode::BatchDelete)
            .with_params(json!({"FileList": files, "FolderList": folders}))
    }

    pub fn historical_tasks() -> Self {
        Self::new(Opcode::HistoricalTasks)
    }

    pub fn task_details(task_ids: &[String]) -> Self {
        Self::new(Opcode::TaskDetails).with_params(json!({"Id": task_ids}))
    }

    pub fn video_stream(enable: bool) -> Self {
        Self::new(Opcode::VideoStream).with_params(json!({"Enable": u8::from(enable)}))
    }

    pub fn timelapse(enable: bool) -> Self {
        Self::new(Opcode::Timelapse).with_params(json!({"Enable": u8::from(enable)}))
    }

    pub fn time_period(params: Value) -> Self {
        Self::new(Opcode::TimePeriod).with_params(params)
    }
}

/// Inner `Data` object of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandData {
    pub cmd: u16,
    pub data: Map<String, Value>,
    #[serde(rename = "RequestID")]
    pub request_id: String,
    #[serde(rename = "MainboardID")]
    pub mainboard_id: String,
    pub timestamp: u64,
    pub from: Origin,
}

/// Wire form of a command addressed to one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandEnvelope {
    pub id: String,
    pub data: CommandData,
    pub topic: String,
}

impl CommandEnvelope {
    /// Addresses `command` to `identity` with a fresh request id.
    pub fn build(command: Command, identity: &DeviceIdentity, origin: Origin) -> Self {
        let mainboard_id = identity.mainboard_id.clone().unwrap_or_default();
        Self {
            id: identity.id.clone().unwrap_or_default(),
            topic: request_topic(&mainboard_id),
            data: CommandData {
                cmd: command.opcode,
                data: command.data,
                request_id: new_request_id(),
                mainboard_id,
                timestamp: unix_seconds(),
                from: origin,
            },
        }
    }

    pub fn request_id(&self) -> &str {
        &self.data.request_id
    }

    pub fn opcode(&self) -> u16 {
        self.data.cmd
    }

    pub fn is_query(&self) -> bool {
        self.data.cmd == Opcode::Status.code() || self.data.cmd == Opcode::Attributes.code()
    }

    pub fn to_json(&self) -> String {
        // Serializing string/number maps cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// 128 random bits, hex encoded.
pub fn new_request_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

pub fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

pub fn request_topic(mainboard_id: &str) -> String {
    format!("sdcp/request/{mainboard_id}")
}

/// Topic channels of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Request,
    Response,
    Status,
    Attributes,
    Notice,
    Error,
}

impl Channel {
    fn name(self) -> &'static str {
        match self {
            Channel::Request => "request",
            Channel::Response => "response",
            Channel::Status => "status",
            Channel::Attributes => "attributes",
            Channel::Notice => "notice",
            Channel::Error => "error",
        }
    }

    /// `sdcp/{channel}/{id}` as used on the WebSocket.
    pub fn topic(self, mainboard_id: &str) -> String {
        format!("sdcp/{}/{mainboard_id}", self.name())
    }

    /// `/sdcp/{channel}/{id}` as used in the broker topic table.
    pub fn broker_topic(self, mainboard_id: &str) -> String {
        format!("/sdcp/{}/{mainboard_id}", self.name())
    }

    /// Classifies a topic of either form addressed to `mainboard_id`.
    pub fn classify(topic: &str, mainboard_id: &str) -> Option<Self> {
        let rest = topic.strip_prefix('/').unwrap_or(topic).strip_prefix("sdcp/")?;
        let (name, id) = rest.split_once('/')?;
        if id != mainboard_id {
            return None;
        }
        [
            Channel::Request,
            Channel::Response,
            Channel::Status,
            Channel::Attributes,
            Channel::Notice,
            Channel::Error,
        ]
        .into_iter()
        .find(|channel| channel.name() == name)
    }
}
