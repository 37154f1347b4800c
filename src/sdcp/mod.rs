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
pub mod address_book;
pub mod broker;
pub mod command;
pub mod constants;
pub mod device;
pub mod discovery;
pub mod link;
pub mod session;
pub mod session_error;
pub mod session_option;
pub mod transport;
pub mod upload;

pub use address_book::{AddressBook, JsonAddressBook};
pub use broker::{Broker, BrokerError, BrokerEvent, BrokerOption};
pub use command::{Command, CommandEnvelope, Opcode, Origin};
pub use device::DeviceIdentity;
pub use discovery::{Discovery, UdpDiscovery};
pub use link::{BrokerConnector, LinkConnector, PollingConnector, WebSocketConnector};
pub use session::{
    resolve_session, session_for, BrokerSession, GenericSession, PollingSession, PrinterSession, SessionContext,
    SessionEvent, SessionState, WebSocketSession,
};
pub use session_error::SessionError;
pub use session_option::SessionOption;
pub use transport::{TransportError, TransportOps};
pub use upload::{UploadError, UploadOptions, UploadProgress, UploadResult};
