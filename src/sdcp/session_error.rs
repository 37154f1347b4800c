/**
 * MIT License
 *
 * Copyright (c) 2025 Takatoshi Kondo
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */
use crate::sdcp::broker::BrokerError;
use crate::sdcp::transport::TransportError;
use crate::sdcp::upload::UploadError;

/// Unified error type for printer session operations.
///
/// ```text
/// SessionError
/// ├── Transport(TransportError) - socket, datagram or HTTP failure
/// ├── ChannelClosed             - the session task is gone
/// ├── NotConnected              - operation requires a connected session
/// ├── MissingAddress            - no MainboardIP and nothing to discover with
/// ├── MissingIdentity           - discovery did not yield a MainboardID
/// ├── Discovery(String)         - discovery reply was missing or malformed
/// ├── Capability                - device protocol does not match the variant
/// ├── Unsupported               - opcode not carried by this variant
/// ├── Nak                       - device replied with a non-zero Ack
/// ├── PartialFailure            - device acknowledged but reported failed items
/// ├── Decode(String)            - reply could not be interpreted
/// ├── Upload(UploadError)       - file transfer failed
/// ├── Broker(BrokerError)       - embedded broker failure
/// ├── Timeout                   - request or connect timed out
/// └── Disconnected              - link lost while the request was pending
/// ```
///
/// Usage errors (`NotConnected`, `MissingAddress`, a missing upload file)
/// are returned before any network activity.
///
/// # Examples
///
/// ```ignore
/// use sdcp_session_tokio::sdcp::{PrinterSession, SessionError};
///
/// match session.stop_print().await {
///     Ok(()) => {}
///     Err(SessionError::Nak { reason, .. }) => println!("printer refused: {reason}"),
///     Err(SessionError::NotConnected) => println!("connect first"),
///     Err(e) => println!("other error: {e}"),
/// }
/// ```
#[derive(Debug)]
pub enum SessionError {
    Transport(TransportError),
    ChannelClosed,
    NotConnected,
    MissingAddress,
    MissingIdentity,
    Discovery(String),
    /// The device advertises a protocol this session variant cannot speak.
    Capability {
        variant: &'static str,
        protocol_version: Option<String>,
    },
    Unsupported {
        opcode: u16,
    },
    /// Device replied with a non-zero `Ack`.
    Nak {
        opcode: u16,
        ack: i64,
        reason: &'static str,
        /// Full reply payload
        reply: serde_json::Value,
    },
    /// Device acknowledged the command but listed items it could not process.
    PartialFailure {
        opcode: u16,
        details: serde_json::Value,
    },
    Decode(String),
    Upload(UploadError),
    Broker(BrokerError),
    Timeout,
    Disconnected,
}

impl SessionError {
    /// Whether this failure counts as transport loss for the reconnect policy.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(_) | SessionError::Timeout | SessionError::Disconnected
        )
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Transport(e) => write!(f, "Transport error: {e}"),
            SessionError::ChannelClosed => write!(f, "Session task has stopped"),
            SessionError::NotConnected => write!(f, "Session is not connected"),
            SessionError::MissingAddress => write!(f, "Device address is not known"),
            SessionError::MissingIdentity => write!(f, "Device MainboardID is not known"),
            SessionError::Discovery(msg) => write!(f, "Discovery failed: {msg}"),
            SessionError::Capability {
                variant,
                protocol_version,
            } => write!(
                f,
                "The {variant} session cannot talk to a device with protocol {}",
                protocol_version.as_deref().unwrap_or("unknown")
            ),
            SessionError::Unsupported { opcode } => {
                write!(f, "Command {opcode} is not supported on this transport")
            }
            SessionError::Nak {
                opcode,
                ack,
                reason,
                ..
            } => write!(f, "Command {opcode} rejected with Ack {ack}: {reason}"),
            SessionError::PartialFailure { opcode, details } => {
                write!(f, "Command {opcode} partially failed: {details}")
            }
            SessionError::Decode(msg) => write!(f, "Malformed reply: {msg}"),
            SessionError::Upload(e) => write!(f, "Upload failed: {e}"),
            SessionError::Broker(e) => write!(f, "Broker error: {e}"),
            SessionError::Timeout => write!(f, "Operation timed out"),
            SessionError::Disconnected => write!(f, "Disconnected before the reply arrived"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Transport(e) => Some(e),
            SessionError::Upload(e) => Some(e),
            SessionError::Broker(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Transport(e)
    }
}

impl From<UploadError> for SessionError {
    fn from(e: UploadError) -> Self {
        SessionError::Upload(e)
    }
}

impl From<BrokerError> for SessionError {
    fn from(e: BrokerError) -> Self {
        SessionError::Broker(e)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Decode(e.to_string())
    }
}
