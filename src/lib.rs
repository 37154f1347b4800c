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

//! # SDCP Session Tokio
//!
//! An async control stack for resin printers that speak the Smart Device
//! Control Protocol (SDCP), built on tokio.
//!
//! ## Features
//!
//! - **Unified Sessions**: one [`PrinterSession`](sdcp::PrinterSession) contract over three transports
//! - **WebSocket Push**: V3 printers, and printers of unknown version, at `ws://{ip}:3030/websocket`
//! - **UDP Polling**: other printers polled with `M99999` datagrams
//! - **Embedded MQTT Broker**: V1 printers dial in and exchange JSON over MQTT 3.1.1
//! - **File Upload**: chunked HTTP push, or a one-shot file server the printer pulls from
//! - **Discovery and Address Book**: LAN broadcast discovery and a JSON printer list
//!
//! ## Quick Start
//!
//! ```ignore
//! use sdcp_session_tokio::sdcp::{
//!     session_for, DeviceIdentity, PrinterSession, SessionContext, SessionOption, UploadOptions,
//! };
//!
//! let context = SessionContext::default();
//! let printers = context.discovery.discover(std::time::Duration::from_secs(1)).await?;
//! let session = session_for(printers[0].clone(), SessionOption::default(), &context);
//! session.connect().await?;
//!
//! let result = session
//!     .upload_file("model.ctb".as_ref(), UploadOptions::default())
//!     .await?;
//! session.start_print(&result.file, 0).await?;
//! ```
//!
//! ## Main Components
//!
//! - [`sdcp::session`]: session state machine, events, and the variant factory
//! - [`sdcp::link`]: per-transport device links
//! - [`sdcp::broker`]: embedded MQTT 3.1.1 broker and its frame codec
//! - [`sdcp::command`]: opcodes and the request envelope
//! - [`sdcp::upload`]: push and pull file transfer
//! - [`sdcp::discovery`] and [`sdcp::address_book`]: finding and remembering printers
//! - [`sdcp::constants`]: status codes and their descriptions
//! - [`sdcp::session_error`]: error handling for session operations

pub mod sdcp;
