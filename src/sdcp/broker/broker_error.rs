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
use crate::sdcp::transport::TransportError;

/// Framing and field-level failures of the broker wire codec.
///
/// Field-level variants (`Truncated`, `InvalidUtf8`, `ProtocolViolation`) are
/// recoverable: the frame is rejected and the connection receives a negative
/// acknowledgment. `MalformedRemainingLength` means the byte stream can no
/// longer be split into frames, so the connection is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// More than four remaining-length bytes carried the continuation bit.
    MalformedRemainingLength,
    /// A length above 268,435,455 was passed to the encoder.
    RemainingLengthTooLarge(usize),
    /// The body ended before the named field was complete.
    Truncated(&'static str),
    InvalidUtf8,
    ProtocolViolation(String),
}

impl CodecError {
    /// Whether the byte stream is still in sync after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CodecError::MalformedRemainingLength)
    }
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::MalformedRemainingLength => write!(f, "Malformed remaining length"),
            CodecError::RemainingLengthTooLarge(n) => {
                write!(f, "Remaining length {n} exceeds 268435455")
            }
            CodecError::Truncated(what) => write!(f, "Frame truncated while reading {what}"),
            CodecError::InvalidUtf8 => write!(f, "String field is not valid UTF-8"),
            CodecError::ProtocolViolation(msg) => write!(f, "Protocol violation: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Errors surfaced by the embedded broker.
#[derive(Debug)]
pub enum BrokerError {
    Io(std::io::Error),
    Codec(CodecError),
    Transport(TransportError),
    /// The broker was shut down and cannot listen again.
    Shutdown,
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Io(e) => write!(f, "Broker IO error: {e}"),
            BrokerError::Codec(e) => write!(f, "Broker codec error: {e}"),
            BrokerError::Transport(e) => write!(f, "Broker transport error: {e}"),
            BrokerError::Shutdown => write!(f, "Broker has been shut down"),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        BrokerError::Io(e)
    }
}

impl From<CodecError> for BrokerError {
    fn from(e: CodecError) -> Self {
        BrokerError::Codec(e)
    }
}

impl From<TransportError> for BrokerError {
    fn from(e: TransportError) -> Self {
        BrokerError::Transport(e)
    }
}
