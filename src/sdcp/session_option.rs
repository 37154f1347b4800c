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
use crate::sdcp::command::Origin;
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use tokio::time::Duration;

/// Printer Session Options
///
/// Configuration shared by every session variant. Fields that only matter to
/// one transport (polling cadence, WebSocket path) are ignored by the others.
///
/// # Usage
///
/// ```ignore
/// use sdcp_session_tokio::sdcp::{Origin, SessionOption};
///
/// let options = SessionOption::builder()
///     .auto_reconnect(true)
///     .reconnect_interval_ms(2000u64)
///     .origin(Origin::App)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Builder, Getters, CopyGetters)]
#[builder(derive(Debug), pattern = "owned", setter(into))]
pub struct SessionOption {
    /// Reconnect automatically after transport loss
    ///
    /// # Default
    /// false
    #[builder(default = "false")]
    #[getset(get_copy = "pub")]
    auto_reconnect: bool,

    /// Delay before each reconnect attempt, in milliseconds
    ///
    /// The polling variant retries at its poll interval instead.
    ///
    /// # Default
    /// 5000
    #[builder(default = "5000")]
    #[getset(get_copy = "pub")]
    reconnect_interval_ms: u64,

    /// Limit for one connect attempt, in milliseconds
    ///
    /// For the broker-mediated variant this is how long to wait for the
    /// device to dial in.
    ///
    /// # Default
    /// 5000
    #[builder(default = "5000")]
    #[getset(get_copy = "pub")]
    connect_timeout_ms: u64,

    /// Limit for a single command reply, in milliseconds. 0 waits forever.
    ///
    /// # Default
    /// 0
    #[builder(default = "0")]
    #[getset(get_copy = "pub")]
    request_timeout_ms: u64,

    /// Polling variant: interval between polls, in milliseconds
    ///
    /// # Default
    /// 500
    #[builder(default = "500")]
    #[getset(get_copy = "pub")]
    poll_interval_ms: u64,

    /// Polling variant: time to wait for one poll reply, in milliseconds
    ///
    /// # Default
    /// 500
    #[builder(default = "500")]
    #[getset(get_copy = "pub")]
    poll_timeout_ms: u64,

    /// Polling variant: consecutive failed polls that count as disconnection
    ///
    /// # Default
    /// 5
    #[builder(default = "5")]
    #[getset(get_copy = "pub")]
    poll_failure_threshold: u32,

    /// Device HTTP/WebSocket port
    ///
    /// # Default
    /// 3030
    #[builder(default = "3030")]
    #[getset(get_copy = "pub")]
    device_port: u16,

    /// WebSocket path on the device
    ///
    /// # Default
    /// "/websocket"
    #[builder(default = "\"/websocket\".to_string()")]
    #[getset(get = "pub")]
    websocket_path: String,

    /// Device UDP port for discovery, polling and broker dial requests
    ///
    /// # Default
    /// 3000
    #[builder(default = "3000")]
    #[getset(get_copy = "pub")]
    discovery_port: u16,

    /// Origin tag stamped on every outgoing envelope
    ///
    /// # Default
    /// [`Origin::Pc`]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    origin: Origin,

    /// Direct-push upload chunk size in bytes
    ///
    /// # Default
    /// 1 MiB
    #[builder(default = "1024 * 1024")]
    #[getset(get_copy = "pub")]
    chunk_size: usize,

    /// Port for the single-file upload server. 0 picks an ephemeral port.
    ///
    /// # Default
    /// 0
    #[builder(default = "0")]
    #[getset(get_copy = "pub")]
    file_server_port: u16,

    /// Lifetime of an unfetched single-file server, in milliseconds
    ///
    /// # Default
    /// 300000
    #[builder(default = "300_000")]
    #[getset(get_copy = "pub")]
    file_server_timeout_ms: u64,

    /// Limit for a whole upload including device completion, in milliseconds. 0 waits forever.
    ///
    /// # Default
    /// 0
    #[builder(default = "0")]
    #[getset(get_copy = "pub")]
    upload_timeout_ms: u64,

    /// Capacity of the session event channel
    ///
    /// # Default
    /// 64
    #[builder(default = "64")]
    #[getset(get_copy = "pub")]
    event_capacity: usize,
}

impl Default for SessionOption {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Default SessionOption should be valid")
    }
}

impl SessionOption {
    /// Create a new builder for SessionOption
    pub fn builder() -> SessionOptionBuilder {
        SessionOptionBuilder::default()
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        non_zero(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn file_server_timeout(&self) -> Duration {
        Duration::from_millis(self.file_server_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Option<Duration> {
        non_zero(self.upload_timeout_ms)
    }
}

fn non_zero(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
