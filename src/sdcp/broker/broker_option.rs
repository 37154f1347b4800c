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
use derive_builder::Builder;
use getset::{CopyGetters, Getters};

/// Framing used to acknowledge UNSUBSCRIBE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsubscribeAck {
    /// `0x90 0x02 id_hi id_lo`, the framing printer firmware has been seen to accept.
    #[default]
    Suback,
    /// `0xB0 0x02 id_hi id_lo`, the standard UNSUBACK.
    Unsuback,
}

/// Embedded Broker Options
///
/// Configuration for a [`Broker`](crate::sdcp::broker::Broker) instance. Printers
/// expect the broker on TCP port 1883 of the host that asked them to dial in.
///
/// # Usage
///
/// ```ignore
/// use sdcp_session_tokio::sdcp::broker::BrokerOption;
///
/// let options = BrokerOption::builder()
///     .bind_address("127.0.0.1:0")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Builder, Getters, CopyGetters)]
#[builder(derive(Debug), pattern = "owned", setter(into))]
pub struct BrokerOption {
    /// Address the listener binds to
    ///
    /// # Default
    /// "0.0.0.0:1883"
    #[builder(default = "\"0.0.0.0:1883\".to_string()")]
    #[getset(get = "pub")]
    bind_address: String,

    /// UNSUBSCRIBE acknowledgment framing
    ///
    /// # Default
    /// [`UnsubscribeAck::Suback`]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    unsubscribe_ack: UnsubscribeAck,

    /// Per-connection read buffer size in bytes
    ///
    /// # Default
    /// 4096
    #[builder(default = "4096")]
    #[getset(get_copy = "pub")]
    recv_buffer_size: usize,

    /// Capacity of the in-process event channel
    ///
    /// Receivers that fall further behind than this lose the oldest events.
    ///
    /// # Default
    /// 256
    #[builder(default = "256")]
    #[getset(get_copy = "pub")]
    event_capacity: usize,

    /// Time allowed for a connection to shut down gracefully, in milliseconds
    ///
    /// # Default
    /// 1000
    #[builder(default = "1000")]
    #[getset(get_copy = "pub")]
    shutdown_timeout_ms: u64,
}

impl Default for BrokerOption {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Default BrokerOption should be valid")
    }
}

impl BrokerOption {
    /// Create a new builder for BrokerOption
    pub fn builder() -> BrokerOptionBuilder {
        BrokerOptionBuilder::default()
    }
}
