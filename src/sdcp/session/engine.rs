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

//! The session engine shared by every transport variant.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Sleep};

use super::correlator::{Correlator, QueryKind, Responder};
use super::request_response::RequestResponse;
use super::{check_ack, PrinterSession, SessionEvent, SessionState};
use crate::sdcp::command::{Command, CommandEnvelope, Opcode};
use crate::sdcp::constants;
use crate::sdcp::device::DeviceIdentity;
use crate::sdcp::discovery::Discovery;
use crate::sdcp::link::{DeviceLink, Inbound, LinkConnector, UploadMode};
use crate::sdcp::session_error::SessionError;
use crate::sdcp::session_option::SessionOption;
use crate::sdcp::transport::{connect_helper, TransportError};
use crate::sdcp::upload::{
    self, push, PreparedFile, SingleFileServer, TrackerOutcome, UploadError, UploadOptions,
    UploadPhase, UploadResult, UploadTracker,
};

type AttemptResult<L> = (u64, Result<(L, DeviceIdentity), SessionError>);

/// A printer session over the links produced by `C`.
///
/// The handle is cheap to clone; all clones drive the same session task,
/// which stops once the last handle is dropped.
///
/// # Examples
///
/// ```ignore
/// use std::sync::Arc;
/// use sdcp_session_tokio::sdcp::{DeviceIdentity, GenericSession, PrinterSession, SessionOption, UdpDiscovery};
/// use sdcp_session_tokio::sdcp::link::WebSocketConnector;
///
/// let options = SessionOption::builder().auto_reconnect(true).build().unwrap();
/// let session = GenericSession::new(
///     DeviceIdentity::with_address("192.168.1.50"),
///     options.clone(),
///     WebSocketConnector::new(&options),
///     Arc::new(UdpDiscovery::default()),
/// );
/// session.connect().await?;
/// ```
pub struct GenericSession<C: LinkConnector> {
    tx_send: mpsc::UnboundedSender<RequestResponse>,
    state_rx: watch::Receiver<SessionState>,
    identity_rx: watch::Receiver<DeviceIdentity>,
    events: broadcast::Sender<SessionEvent>,
    options: SessionOption,
    connector: Arc<C>,
}

impl<C: LinkConnector> Clone for GenericSession<C> {
    fn clone(&self) -> Self {
        Self {
            tx_send: self.tx_send.clone(),
            state_rx: self.state_rx.clone(),
            identity_rx: self.identity_rx.clone(),
            events: self.events.clone(),
            options: self.options.clone(),
            connector: self.connector.clone(),
        }
    }
}

impl<C: LinkConnector> GenericSession<C> {
    /// Creates a disconnected session and spawns its task.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        identity: DeviceIdentity,
        options: SessionOption,
        connector: C,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        let (tx_send, rx_send) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (identity_tx, identity_rx) = watch::channel(identity);
        let (events, _) = broadcast::channel(options.event_capacity().max(1));
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(connector);

        let session_loop = SessionLoop {
            connector: connector.clone(),
            discovery,
            options: options.clone(),
            identity_tx,
            state_tx,
            events: events.clone(),
            link: None,
            correlator: Correlator::default(),
            status_watchers: Vec::new(),
            connect_waiters: Vec::new(),
            attempt: 0,
            generation: 0,
            reconnect_timer: None,
            connecting: None,
            user_closed: false,
            attempt_tx,
        };
        tokio::spawn(session_loop.run(rx_send, attempt_rx));

        Self {
            tx_send,
            state_rx,
            identity_rx,
            events,
            options,
            connector,
        }
    }

    pub fn options(&self) -> &SessionOption {
        &self.options
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Receives every raw status broadcast until the link is lost.
    ///
    /// Unlike [`SessionEvent::Status`] this includes repeated and routed
    /// statuses.
    pub async fn watch_status(&self) -> Result<mpsc::UnboundedReceiver<Value>, SessionError> {
        let (watcher_tx, watcher_rx) = mpsc::unbounded_channel();
        self.request(|response_tx| RequestResponse::WatchStatus {
            watcher_tx,
            response_tx,
        })
        .await??;
        Ok(watcher_rx)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RequestResponse,
    ) -> Result<T, SessionError> {
        let (response_tx, response_rx) = oneshot::channel();
        if self.tx_send.send(build(response_tx)).is_err() {
            return Err(SessionError::ChannelClosed);
        }
        response_rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    async fn send_envelope(&self, command: Command) -> Result<Value, SessionError> {
        if *self.state_rx.borrow() != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let identity = self.identity_rx.borrow().clone();
        let envelope = CommandEnvelope::build(command, &identity, self.options.origin());
        tracing::trace!(request_id = %envelope.request_id(), opcode = envelope.opcode(), "sending command");

        let (response_tx, response_rx) = oneshot::channel();
        if self
            .tx_send
            .send(RequestResponse::Send {
                envelope: Box::new(envelope),
                response_tx,
            })
            .is_err()
        {
            return Err(SessionError::ChannelClosed);
        }
        let reply = match self.options.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, response_rx)
                .await
                .map_err(|_| SessionError::Timeout)?,
            None => response_rx.await,
        };
        reply.map_err(|_| SessionError::ChannelClosed)?
    }

    async fn query(&self, kind: QueryKind, cached: bool) -> Result<Value, SessionError> {
        if cached {
            let known = self
                .request(|response_tx| RequestResponse::Cached { kind, response_tx })
                .await?;
            if let Some(value) = known {
                return Ok(value);
            }
        }
        let command = match kind {
            QueryKind::Status => Command::status(),
            QueryKind::Attributes => Command::attributes(),
        };
        let reply = self.send_envelope(command).await?;
        check_ack(kind.opcode().code(), reply)
    }

    async fn upload(&self, path: &Path, options: UploadOptions) -> Result<UploadResult, SessionError> {
        if *self.state_rx.borrow() != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let file = PreparedFile::open(path, options.filename.as_deref()).await?;
        let ip = self
            .identity_rx
            .borrow()
            .mainboard_ip
            .clone()
            .ok_or(SessionError::MissingAddress)?;

        let transfer = async {
            match self.connector.upload_mode() {
                UploadMode::Push => {
                    let client = reqwest::Client::new();
                    let url = push::upload_url(&ip, self.options.device_port());
                    push::push_file(
                        &client,
                        &url,
                        &file,
                        self.options.chunk_size(),
                        options.verify,
                        options.progress.as_ref(),
                    )
                    .await
                    .map_err(SessionError::from)
                }
                UploadMode::Pull => self.pull_upload(&ip, &file, &options).await,
            }
        };
        match self.options.upload_timeout() {
            Some(limit) => tokio::time::timeout(limit, transfer)
                .await
                .map_err(|_| SessionError::Timeout)?,
            None => transfer.await,
        }
    }

    /// Hands the printer a URL and follows the transfer through status broadcasts.
    async fn pull_upload(
        &self,
        ip: &str,
        file: &PreparedFile,
        options: &UploadOptions,
    ) -> Result<UploadResult, SessionError> {
        let progress = options.progress.as_ref();
        upload::report(progress, file.progress(UploadPhase::Preparing, 0));

        let (server, url) = match &options.target_url {
            Some(url) => (None, url.clone()),
            None => {
                let server = SingleFileServer::start(
                    file,
                    self.options.file_server_port(),
                    self.options.file_server_timeout(),
                )
                .await?;
                let device = connect_helper::resolve(ip, self.options.discovery_port()).await?;
                let host = connect_helper::local_ip_towards(device).await?;
                let url = server.url_for(host);
                (Some(server), url)
            }
        };
        tracing::debug!(file = %file.filename, url = %url, "offering file to printer");

        let mut statuses = self.watch_status().await?;
        let tracker = UploadTracker::new(file.clone(), Some(url.clone()));
        let command = Command::upload_file(&file.filename, file.size, &file.md5, &url, options.verify);
        let reply = self.send_envelope(command);
        tokio::pin!(reply);
        let unfetched = tokio::time::sleep(self.options.file_server_timeout());
        tokio::pin!(unfetched);
        let mut acknowledged = false;

        loop {
            tokio::select! {
                reply = &mut reply, if !acknowledged => {
                    acknowledged = true;
                    check_ack(Opcode::UploadFile.code(), reply?)?;
                }
                _ = &mut unfetched, if server.as_ref().is_some_and(|server| !server.fetched()) => {
                    return Err(UploadError::ServerTimeout.into());
                }
                status = statuses.recv() => {
                    let Some(status) = status else {
                        return Err(SessionError::Disconnected);
                    };
                    match tracker.observe(&status) {
                        TrackerOutcome::Pending => {}
                        TrackerOutcome::Progress(step) => upload::report(progress, step),
                        TrackerOutcome::Finished(result) if result.success => {
                            upload::report(progress, file.progress(UploadPhase::Complete, result.offset));
                            tracing::debug!(file = %file.filename, "pull upload complete");
                            return Ok(result);
                        }
                        TrackerOutcome::Finished(result) => {
                            tracing::warn!(file = %file.filename, "printer reported a failed transfer");
                            return Err(UploadError::DeviceFailure(Box::new(result)).into());
                        }
                    }
                }
            }
        }
    }
}

impl<C: LinkConnector> PrinterSession for GenericSession<C> {
    fn identity(&self) -> DeviceIdentity {
        self.identity_rx.borrow().clone()
    }

    fn transport(&self) -> &'static str {
        self.connector.name()
    }

    fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn connect(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            self.request(|response_tx| RequestResponse::Connect { response_tx })
                .await?
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            self.request(|response_tx| RequestResponse::Disconnect { response_tx })
                .await?
        })
    }

    fn send_command(&self, command: Command) -> BoxFuture<'_, Result<Value, SessionError>> {
        Box::pin(self.send_envelope(command))
    }

    fn get_status(&self, cached: bool) -> BoxFuture<'_, Result<Value, SessionError>> {
        Box::pin(self.query(QueryKind::Status, cached))
    }

    fn get_attributes(&self, cached: bool) -> BoxFuture<'_, Result<Value, SessionError>> {
        Box::pin(self.query(QueryKind::Attributes, cached))
    }

    fn upload_file<'a>(
        &'a self,
        path: &'a Path,
        options: UploadOptions,
    ) -> BoxFuture<'a, Result<UploadResult, SessionError>> {
        Box::pin(self.upload(path, options))
    }
}

struct SessionLoop<C: LinkConnector> {
    connector: Arc<C>,
    discovery: Arc<dyn Discovery>,
    options: SessionOption,
    identity_tx: watch::Sender<DeviceIdentity>,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    link: Option<C::Link>,
    correlator: Correlator,
    status_watchers: Vec<mpsc::UnboundedSender<Value>>,
    connect_waiters: Vec<oneshot::Sender<Result<(), SessionError>>>,
    /// Reconnect attempts since the last established link
    attempt: u32,
    /// Bumped per attempt; stale attempt results are dropped.
    generation: u64,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    connecting: Option<JoinHandle<()>>,
    user_closed: bool,
    attempt_tx: mpsc::UnboundedSender<AttemptResult<C::Link>>,
}

impl<C: LinkConnector> SessionLoop<C> {
    async fn run(
        mut self,
        mut rx_send: mpsc::UnboundedReceiver<RequestResponse>,
        mut attempt_rx: mpsc::UnboundedReceiver<AttemptResult<C::Link>>,
    ) {
        loop {
            tokio::select! {
                request = rx_send.recv() => {
                    match request {
                        Some(request) => self.handle_request(request).await,
                        None => break,
                    }
                }
                Some((generation, result)) = attempt_rx.recv() => {
                    self.handle_attempt(generation, result);
                }
                received = recv_link(&mut self.link) => {
                    match received {
                        Ok(batch) => {
                            for inbound in batch {
                                self.handle_inbound(inbound);
                            }
                        }
                        Err(e) => self.handle_link_lost(e).await,
                    }
                }
                _ = wait_timer(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.start_attempt();
                }
            }
        }

        tracing::debug!(variant = self.connector.name(), "session handles dropped; stopping");
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        self.correlator.fail_all(|| SessionError::ChannelClosed);
    }

    async fn handle_request(&mut self, request: RequestResponse) {
        match request {
            RequestResponse::Connect { response_tx } => self.handle_connect(response_tx),
            RequestResponse::Disconnect { response_tx } => {
                self.handle_disconnect().await;
                let _ = response_tx.send(Ok(()));
            }
            RequestResponse::Send {
                envelope,
                response_tx,
            } => self.handle_send(*envelope, response_tx).await,
            RequestResponse::Cached { kind, response_tx } => {
                let _ = response_tx.send(self.correlator.cached(kind).cloned());
            }
            RequestResponse::WatchStatus {
                watcher_tx,
                response_tx,
            } => {
                if self.link.is_none() {
                    let _ = response_tx.send(Err(SessionError::NotConnected));
                } else {
                    self.status_watchers.push(watcher_tx);
                    let _ = response_tx.send(Ok(()));
                }
            }
        }
    }

    fn handle_connect(&mut self, response_tx: oneshot::Sender<Result<(), SessionError>>) {
        if self.link.is_some() {
            let _ = response_tx.send(Ok(()));
            return;
        }
        if self.connecting.is_some() {
            self.connect_waiters.push(response_tx);
            return;
        }

        let identity = self.identity_tx.borrow().clone();
        if identity.mainboard_ip.is_none() {
            let _ = response_tx.send(Err(SessionError::MissingAddress));
            return;
        }
        if identity.protocol_version.is_some() && !self.connector.accepts(identity.protocol_major()) {
            let _ = response_tx.send(Err(SessionError::Capability {
                variant: self.connector.name(),
                protocol_version: identity.protocol_version,
            }));
            return;
        }

        self.user_closed = false;
        if self.reconnect_timer.take().is_none() {
            self.attempt = 0;
        }
        self.connect_waiters.push(response_tx);
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.set_state(SessionState::Connecting);

        let identity = self.identity_tx.borrow().clone();
        let connector = self.connector.clone();
        let discovery = self.discovery.clone();
        let timeout = self.options.connect_timeout();
        let attempt_tx = self.attempt_tx.clone();
        tracing::debug!(variant = connector.name(), generation, "connecting");
        self.connecting = Some(tokio::spawn(async move {
            let result = establish(connector.as_ref(), discovery.as_ref(), identity, timeout).await;
            let _ = attempt_tx.send((generation, result));
        }));
    }

    fn handle_attempt(
        &mut self,
        generation: u64,
        result: Result<(C::Link, DeviceIdentity), SessionError>,
    ) {
        if generation != self.generation {
            tracing::trace!(generation, "dropping stale connect attempt");
            return;
        }
        self.connecting = None;

        match result {
            Ok((link, identity)) => {
                let reconnect = self.attempt > 0;
                tracing::info!(
                    variant = self.connector.name(),
                    mainboard_id = ?identity.mainboard_id,
                    reconnect,
                    "connected"
                );
                self.identity_tx.send_replace(identity);
                self.link = Some(link);
                self.attempt = 0;
                self.set_state(SessionState::Connected);
                self.emit(SessionEvent::Connected { reconnect });
                if reconnect {
                    self.emit(SessionEvent::Reconnected);
                }
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                tracing::warn!(variant = self.connector.name(), error = %e, "connect attempt failed");
                if self.options.auto_reconnect() && e.is_transport() && !self.user_closed {
                    self.schedule_reconnect();
                } else {
                    self.set_state(SessionState::Disconnected);
                }
                let message = e.to_string();
                let mut waiters = std::mem::take(&mut self.connect_waiters).into_iter();
                if let Some(first) = waiters.next() {
                    let _ = first.send(Err(e));
                }
                for waiter in waiters {
                    let _ = waiter.send(Err(SessionError::Transport(TransportError::Connect(
                        message.clone(),
                    ))));
                }
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        self.attempt += 1;
        let attempt = self.attempt;
        let delay = self
            .connector
            .reconnect_delay(self.options.reconnect_interval());
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.set_state(SessionState::Reconnecting { attempt });
        self.emit(SessionEvent::Reconnecting { attempt });
        self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
    }

    async fn handle_link_lost(&mut self, error: TransportError) {
        tracing::warn!(variant = self.connector.name(), error = %error, "link lost");
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        self.correlator.fail_all(|| SessionError::Disconnected);
        self.status_watchers.clear();
        self.emit(SessionEvent::Disconnected);
        if self.options.auto_reconnect() && !self.user_closed {
            self.schedule_reconnect();
        } else {
            self.set_state(SessionState::Disconnected);
        }
    }

    async fn handle_disconnect(&mut self) {
        self.user_closed = true;
        self.generation += 1;
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        self.reconnect_timer = None;

        let was_connected = self.link.is_some();
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        self.correlator.fail_all(|| SessionError::Disconnected);
        self.status_watchers.clear();
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(SessionError::Disconnected));
        }
        self.set_state(SessionState::Disconnected);
        if was_connected {
            tracing::info!(variant = self.connector.name(), "disconnected");
            self.emit(SessionEvent::Disconnected);
        }
    }

    async fn handle_send(&mut self, envelope: CommandEnvelope, response_tx: Responder) {
        let Some(link) = self.link.as_mut() else {
            let _ = response_tx.send(Err(SessionError::NotConnected));
            return;
        };
        let opcode = envelope.opcode();
        match link.send(&envelope).await {
            Ok(()) => {
                let request_id = envelope.request_id().to_string();
                match QueryKind::from_opcode(opcode) {
                    Some(kind) if !self.connector.acknowledges_queries() => {
                        self.correlator.park_query(kind, request_id, response_tx)
                    }
                    _ => self.correlator.register(request_id, opcode, response_tx),
                }
            }
            Err(TransportError::Unsupported(what)) => {
                tracing::debug!(opcode, what = %what, "command not carried by this link");
                let _ = response_tx.send(Err(SessionError::Unsupported { opcode }));
            }
            Err(e) => {
                let _ = response_tx.send(Err(SessionError::Disconnected));
                self.handle_link_lost(e).await;
            }
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Response(message) => {
                self.correlator.on_response(message);
            }
            Inbound::Status(status) => {
                self.status_watchers
                    .retain(|watcher| watcher.send(status.clone()).is_ok());
                if let Some(status) = self.correlator.on_status(status) {
                    self.emit(SessionEvent::Status(status));
                }
            }
            Inbound::Attributes(attributes) => {
                if let Some(attributes) = self.correlator.on_attributes(attributes) {
                    self.emit(SessionEvent::Attributes(attributes));
                }
            }
            Inbound::Notice(notice) => self.emit(SessionEvent::Notice(notice)),
            Inbound::Error(message) => self.emit(SessionEvent::Error(annotate_error(message))),
            Inbound::Message(text) => self.emit(SessionEvent::Message(text)),
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

/// Resolves the identity if needed, then opens a link.
async fn establish<C: LinkConnector>(
    connector: &C,
    discovery: &dyn Discovery,
    mut identity: DeviceIdentity,
    timeout: Duration,
) -> Result<(C::Link, DeviceIdentity), SessionError> {
    let ip = identity
        .mainboard_ip
        .clone()
        .ok_or(SessionError::MissingAddress)?;

    if identity.mainboard_id.is_none() {
        let found = discovery.broadcast(&ip, timeout).await?;
        identity.merge(found);
        identity.mainboard_ip = Some(ip);
    } else if identity.id.is_none() {
        match discovery.broadcast(&ip, timeout).await {
            Ok(found) => {
                identity.merge(found);
                identity.mainboard_ip = Some(ip);
            }
            Err(e) => tracing::debug!(error = %e, "discovery for Id failed; continuing without it"),
        }
    }
    if identity.mainboard_id.is_none() {
        return Err(SessionError::MissingIdentity);
    }
    if !connector.accepts(identity.protocol_major()) {
        return Err(SessionError::Capability {
            variant: connector.name(),
            protocol_version: identity.protocol_version.clone(),
        });
    }

    let link = tokio::time::timeout(timeout, connector.connect(&identity))
        .await
        .map_err(|_| SessionError::Timeout)??;
    Ok((link, identity))
}

/// Adds `ErrorText` to an error broadcast whose `ErrorCode` is known.
fn annotate_error(mut message: Value) -> Value {
    let text = message
        .pointer("/Data/Data/ErrorCode")
        .and_then(Value::as_i64)
        .and_then(constants::error_code_description);
    if let (Some(text), Some(Value::Object(data))) = (text, message.pointer_mut("/Data/Data")) {
        data.insert("ErrorText".into(), Value::from(text));
    }
    message
}

async fn recv_link<L: DeviceLink>(link: &mut Option<L>) -> Result<Vec<Inbound>, TransportError> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_error_codes_get_text() {
        let message = json!({"Data": {"Data": {"ErrorCode": 1}}});
        assert_eq!(
            annotate_error(message)["Data"]["Data"]["ErrorText"],
            "File Transfer MD5 Check Failed"
        );
        let unknown = json!({"Data": {"Data": {"ErrorCode": 99}}});
        assert!(annotate_error(unknown)["Data"]["Data"].get("ErrorText").is_none());
    }
}
