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

//! Printer sessions.
//!
//! [`PrinterSession`] is the one contract every transport variant offers:
//! connect, send commands, read status and attributes, transfer files, and
//! subscribe to [`SessionEvent`]s. [`GenericSession`] implements it once over
//! a [`LinkConnector`](crate::sdcp::link::LinkConnector); [`session_for`] and
//! [`resolve_session`] pick the variant from the printer's protocol version.
//!
//! # Examples
//!
//! ```ignore
//! use sdcp_session_tokio::sdcp::{resolve_session, DeviceIdentity, SessionContext, SessionEvent, SessionOption};
//!
//! let context = SessionContext::default();
//! let session = resolve_session(DeviceIdentity::with_address("192.168.1.50"), SessionOption::default(), &context).await?;
//! let mut events = session.subscribe();
//! session.connect().await?;
//!
//! let status = session.get_status(false).await?;
//! session.start_print("model.ctb", 0).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let SessionEvent::Status(status) = event {
//!         println!("{status}");
//!     }
//! }
//! ```

pub mod correlator;
pub mod engine;
mod request_response;

pub use correlator::{Correlator, FifoRouteQueue, QueryKind, RouteQueue};
pub use engine::GenericSession;

use std::path::Path;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::sdcp::broker::Broker;
use crate::sdcp::command::{Command, Opcode};
use crate::sdcp::constants;
use crate::sdcp::device::DeviceIdentity;
use crate::sdcp::discovery::{Discovery, UdpDiscovery};
use crate::sdcp::link::{BrokerConnector, PollingConnector, WebSocketConnector};
use crate::sdcp::session_error::SessionError;
use crate::sdcp::session_option::SessionOption;
use crate::sdcp::upload::{UploadOptions, UploadResult};

pub type WebSocketSession = GenericSession<WebSocketConnector>;
pub type PollingSession = GenericSession<PollingConnector>;
pub type BrokerSession = GenericSession<BrokerConnector>;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting to make reconnect attempt number `attempt`.
    Reconnecting { attempt: u32 },
}

/// Notifications delivered to every subscriber of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A link was established; `reconnect` is set when it replaced a lost one.
    Connected { reconnect: bool },
    Disconnected,
    /// Raised after `Connected` when an automatic reconnect succeeded.
    Reconnected,
    Reconnecting { attempt: u32 },
    /// Status that differs from the previous one
    Status(Value),
    /// Attributes that differ from the previous ones
    Attributes(Value),
    Notice(Value),
    /// Error broadcast, with `ErrorText` added when the code is known
    Error(Value),
    /// Inbound text that is not an SDCP message
    Message(String),
}

/// The device-session contract shared by every transport variant.
///
/// Convenience commands are provided on top of
/// [`send_command`](Self::send_command); a non-zero `Ack` in their reply is
/// returned as [`SessionError::Nak`] with the printer's reason.
pub trait PrinterSession: Send + Sync {
    /// Identity as currently known, including fields filled in by discovery.
    fn identity(&self) -> DeviceIdentity;

    /// Name of the transport variant ("websocket", "polling" or "broker").
    fn transport(&self) -> &'static str;

    fn state(&self) -> SessionState;

    /// Receiver that observes every state change.
    fn watch_state(&self) -> watch::Receiver<SessionState>;

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Connects, resolving the identity through discovery first if needed.
    ///
    /// Resolves once with the outcome of the first attempt; automatic
    /// retries after a failure are reported as events only.
    fn connect(&self) -> BoxFuture<'_, Result<(), SessionError>>;

    /// Closes the link and rejects every outstanding request.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), SessionError>>;

    /// Sends `command` and resolves with the printer's reply.
    ///
    /// For status and attribute queries the reply is the broadcast that
    /// answered the query. The `Ack` is not interpreted.
    fn send_command(&self, command: Command) -> BoxFuture<'_, Result<Value, SessionError>>;

    /// Current status; with `cached` the last known one if there is any.
    fn get_status(&self, cached: bool) -> BoxFuture<'_, Result<Value, SessionError>>;

    /// Current attributes; with `cached` the last known ones if there are any.
    fn get_attributes(&self, cached: bool) -> BoxFuture<'_, Result<Value, SessionError>>;

    fn upload_file<'a>(
        &'a self,
        path: &'a Path,
        options: UploadOptions,
    ) -> BoxFuture<'a, Result<UploadResult, SessionError>>;

    /// Sends `command` and fails on a non-zero `Ack`.
    ///
    /// Resolves with the inner `Data` object of the reply.
    fn acknowledged(&self, command: Command) -> BoxFuture<'_, Result<Value, SessionError>> {
        Box::pin(async move {
            let opcode = command.opcode();
            let reply = self.send_command(command).await?;
            check_ack(opcode, reply).map(|reply| reply_data(&reply).clone())
        })
    }

    fn start_print<'a>(
        &'a self,
        filename: &'a str,
        start_layer: u32,
    ) -> BoxFuture<'a, Result<Value, SessionError>> {
        self.acknowledged(Command::start_print(filename, start_layer))
    }

    fn pause_print(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move { self.acknowledged(Command::pause_print()).await.map(drop) })
    }

    fn stop_print(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move { self.acknowledged(Command::stop_print()).await.map(drop) })
    }

    fn continue_print(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move { self.acknowledged(Command::continue_print()).await.map(drop) })
    }

    fn rename<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move { self.acknowledged(Command::rename(name)).await.map(drop) })
    }

    /// Entries of `path` ("/" when `None`).
    fn list_files<'a>(
        &'a self,
        path: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<Value>, SessionError>> {
        Box::pin(async move {
            let data = self
                .acknowledged(Command::list_files(path.unwrap_or("/")))
                .await?;
            array_field(&data, "FileList")
        })
    }

    /// Deletes files and folders in one command.
    ///
    /// Items the printer could not delete are returned as
    /// [`SessionError::PartialFailure`] with the printer's `ErrData`.
    fn delete_files_and_folders<'a>(
        &'a self,
        files: &'a [String],
        folders: &'a [String],
    ) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move {
            let data = self
                .acknowledged(Command::batch_delete(files, folders))
                .await?;
            match data.get("ErrData") {
                Some(Value::Array(items)) if !items.is_empty() => {
                    Err(SessionError::PartialFailure {
                        opcode: Opcode::BatchDelete.code(),
                        details: Value::Array(items.clone()),
                    })
                }
                _ => Ok(()),
            }
        })
    }

    fn delete_files<'a>(&'a self, files: &'a [String]) -> BoxFuture<'a, Result<(), SessionError>> {
        self.delete_files_and_folders(files, &[])
    }

    /// Ids of the printer's historical tasks.
    fn historical_tasks(&self) -> BoxFuture<'_, Result<Vec<Value>, SessionError>> {
        Box::pin(async move {
            let data = self.acknowledged(Command::historical_tasks()).await?;
            array_field(&data, "HistoryData")
        })
    }

    /// Details of the given tasks, with descriptions and absolute URLs added.
    fn historical_task_details<'a>(
        &'a self,
        task_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Value>, SessionError>> {
        Box::pin(async move {
            let data = self.acknowledged(Command::task_details(task_ids)).await?;
            let host = self.identity().mainboard_ip.unwrap_or_default();
            let tasks = array_field(&data, "HistoryDetailList")?;
            Ok(tasks
                .into_iter()
                .map(|task| decorate_task(task, &host))
                .collect())
        })
    }

    /// Enables or disables the camera stream; returns the stream URL if any.
    fn set_video_stream(&self, enable: bool) -> BoxFuture<'_, Result<Option<String>, SessionError>> {
        Box::pin(async move {
            let data = self.acknowledged(Command::video_stream(enable)).await?;
            Ok(data
                .get("VideoUrl")
                .and_then(Value::as_str)
                .map(str::to_string))
        })
    }

    fn set_timelapse(&self, enable: bool) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move { self.acknowledged(Command::timelapse(enable)).await.map(drop) })
    }

    /// Asks the printer to abort the file transfer in progress.
    fn cancel_upload(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move { self.acknowledged(Command::cancel_upload()).await.map(drop) })
    }

    fn time_period(&self, params: Value) -> BoxFuture<'_, Result<Value, SessionError>> {
        self.acknowledged(Command::time_period(params))
    }
}

/// Fails with [`SessionError::Nak`] if `reply` carries a non-zero `Ack`.
pub fn check_ack(opcode: u16, reply: Value) -> Result<Value, SessionError> {
    let ack = reply
        .pointer("/Data/Data/Ack")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if ack != 0 {
        return Err(SessionError::Nak {
            opcode,
            ack,
            reason: constants::ack_reason(opcode, ack),
            reply,
        });
    }
    Ok(reply)
}

/// Inner `Data.Data` object of a reply.
pub fn reply_data(reply: &Value) -> &Value {
    reply.pointer("/Data/Data").unwrap_or(&Value::Null)
}

fn array_field(data: &Value, key: &str) -> Result<Vec<Value>, SessionError> {
    match data.get(key) {
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => Err(SessionError::Decode(format!("reply has no {key}"))),
    }
}

fn decorate_task(mut task: Value, host: &str) -> Value {
    let Some(fields) = task.as_object_mut() else {
        return task;
    };
    if let Some(path) = fields.get("TimeLapseVideoUrl").and_then(Value::as_str) {
        let url = format!("http://{host}{path}");
        fields.insert("TimeLapseVideoUrl".into(), Value::from(url));
    }
    if let Some(name) = fields.get("TaskName").and_then(Value::as_str) {
        let url = format!("http://{host}{name}");
        fields.insert("TaskUrl".into(), Value::from(url));
    }
    if let Some(text) = fields
        .get("TaskStatus")
        .and_then(Value::as_i64)
        .and_then(constants::task_status_description)
    {
        fields.insert("TaskStatusText".into(), Value::from(text));
    }
    if let Some(text) = fields
        .get("ErrorStatusReason")
        .and_then(Value::as_i64)
        .and_then(constants::task_error_description)
    {
        fields.insert("ErrorStatusReasonText".into(), Value::from(text));
    }
    task
}

/// Shared collaborators handed to sessions created by [`session_for`].
#[derive(Clone)]
pub struct SessionContext {
    /// Broker used by broker-mediated sessions; it starts listening on first use.
    pub broker: Broker,
    pub discovery: Arc<dyn Discovery>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            broker: Broker::default(),
            discovery: Arc::new(UdpDiscovery::default()),
        }
    }
}

impl SessionContext {
    pub fn new(broker: Broker, discovery: Arc<dyn Discovery>) -> Self {
        Self { broker, discovery }
    }
}

/// Creates the session variant matching the printer's protocol version.
///
/// | ProtocolVersion | Variant |
/// |---|---|
/// | V3.x or unknown | [`WebSocketSession`] |
/// | V1.x | [`BrokerSession`] |
/// | other | [`PollingSession`] |
///
/// Use [`resolve_session`] to ask the printer for its version first.
///
/// Must be called within a tokio runtime.
pub fn session_for(
    identity: DeviceIdentity,
    options: SessionOption,
    context: &SessionContext,
) -> Box<dyn PrinterSession> {
    let discovery = context.discovery.clone();
    match identity.protocol_major() {
        Some(3) | None => {
            let connector = WebSocketConnector::new(&options);
            Box::new(GenericSession::new(identity, options, connector, discovery))
        }
        Some(1) => {
            let connector = BrokerConnector::new(context.broker.clone(), &options);
            Box::new(GenericSession::new(identity, options, connector, discovery))
        }
        _ => {
            let connector = PollingConnector::new(&options);
            Box::new(GenericSession::new(identity, options, connector, discovery))
        }
    }
}

/// Like [`session_for`], but asks the printer to describe itself first when
/// its protocol version is not known.
///
/// # Errors
///
/// * [`SessionError::MissingAddress`] - Neither a version nor a `MainboardIP` is known
/// * [`SessionError::Discovery`] - The printer did not answer
pub async fn resolve_session(
    mut identity: DeviceIdentity,
    options: SessionOption,
    context: &SessionContext,
) -> Result<Box<dyn PrinterSession>, SessionError> {
    if identity.protocol_version.is_none() {
        let ip = identity
            .mainboard_ip
            .clone()
            .ok_or(SessionError::MissingAddress)?;
        let found = context
            .discovery
            .broadcast(&ip, options.connect_timeout())
            .await?;
        identity.merge(found);
    }
    Ok(session_for(identity, options, context))
}
