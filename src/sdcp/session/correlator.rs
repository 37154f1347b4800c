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

//! Reply correlation for one printer session.
//!
//! Ordinary commands are matched to their reply by `RequestID`. Status and
//! attribute queries are answered in two phases: the reply on the response
//! channel only acknowledges the query, and the data arrives as the next
//! broadcast on the status or attributes channel. Acknowledged queries wait in
//! a [`RouteQueue`] until that broadcast shows up.
//!
//! [`FifoRouteQueue`] hands each broadcast to the oldest waiting query. A
//! broadcast the printer sends on its own while queries are waiting is taken
//! as a reply too. Plug in another [`RouteQueue`] to change that.

use std::collections::VecDeque;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::sdcp::command::Opcode;
use crate::sdcp::session_error::SessionError;

/// Continuation of a caller waiting for a reply.
pub type Responder = oneshot::Sender<Result<Value, SessionError>>;

/// The two query kinds answered through broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Status,
    Attributes,
}

impl QueryKind {
    pub fn from_opcode(opcode: u16) -> Option<Self> {
        match Opcode::from_code(opcode)? {
            Opcode::Status => Some(QueryKind::Status),
            Opcode::Attributes => Some(QueryKind::Attributes),
            _ => None,
        }
    }

    pub fn opcode(self) -> Opcode {
        match self {
            QueryKind::Status => Opcode::Status,
            QueryKind::Attributes => Opcode::Attributes,
        }
    }
}

/// Where acknowledged queries wait for their broadcast.
pub trait RouteQueue: Send {
    /// Queues a responder for the next `kind` broadcast.
    fn park(&mut self, kind: QueryKind, request_id: String, responder: Responder);

    /// Responder that `broadcast` answers, if any.
    fn take(&mut self, kind: QueryKind, broadcast: &Value) -> Option<Responder>;

    /// Number of waiting responders of `kind`.
    fn waiting(&self, kind: QueryKind) -> usize;

    /// Removes every waiting responder.
    fn drain(&mut self) -> Vec<Responder>;
}

/// Resolves queries strictly in submission order.
#[derive(Debug, Default)]
pub struct FifoRouteQueue {
    status: VecDeque<Responder>,
    attributes: VecDeque<Responder>,
}

impl FifoRouteQueue {
    fn queue(&mut self, kind: QueryKind) -> &mut VecDeque<Responder> {
        match kind {
            QueryKind::Status => &mut self.status,
            QueryKind::Attributes => &mut self.attributes,
        }
    }
}

impl RouteQueue for FifoRouteQueue {
    fn park(&mut self, kind: QueryKind, _request_id: String, responder: Responder) {
        self.queue(kind).push_back(responder);
    }

    fn take(&mut self, kind: QueryKind, _broadcast: &Value) -> Option<Responder> {
        let queue = self.queue(kind);
        // Callers that timed out have dropped their receiver.
        while let Some(responder) = queue.pop_front() {
            if !responder.is_closed() {
                return Some(responder);
            }
        }
        None
    }

    fn waiting(&self, kind: QueryKind) -> usize {
        match kind {
            QueryKind::Status => self.status.len(),
            QueryKind::Attributes => self.attributes.len(),
        }
    }

    fn drain(&mut self) -> Vec<Responder> {
        self.status.drain(..).chain(self.attributes.drain(..)).collect()
    }
}

struct PendingRequest {
    request_id: String,
    opcode: u16,
    responder: Responder,
    enqueued_at: Instant,
}

#[derive(Default)]
struct Cached {
    value: Option<Value>,
    updated_at: Option<Instant>,
}

/// Pending requests, route queues and last-known state of one printer.
pub struct Correlator<R: RouteQueue = FifoRouteQueue> {
    pending: VecDeque<PendingRequest>,
    routes: R,
    status: Cached,
    attributes: Cached,
}

impl Default for Correlator<FifoRouteQueue> {
    fn default() -> Self {
        Self::with_routes(FifoRouteQueue::default())
    }
}

impl<R: RouteQueue> Correlator<R> {
    pub fn with_routes(routes: R) -> Self {
        Self {
            pending: VecDeque::new(),
            routes,
            status: Cached::default(),
            attributes: Cached::default(),
        }
    }

    /// Records a request waiting for its reply on the response channel.
    pub fn register(&mut self, request_id: String, opcode: u16, responder: Responder) {
        self.prune();
        tracing::trace!(request_id = %request_id, opcode, "request pending");
        self.pending.push_back(PendingRequest {
            request_id,
            opcode,
            responder,
            enqueued_at: Instant::now(),
        });
    }

    /// Queues a query that is answered by the next broadcast alone.
    pub fn park_query(&mut self, kind: QueryKind, request_id: String, responder: Responder) {
        self.routes.park(kind, request_id, responder);
    }

    /// Handles a message from the response channel.
    ///
    /// Returns `false` when no pending request carries its `RequestID`.
    pub fn on_response(&mut self, message: Value) -> bool {
        let Some(request_id) = message
            .pointer("/Data/RequestID")
            .and_then(Value::as_str)
        else {
            tracing::warn!("response without RequestID");
            return false;
        };
        let Some(position) = self
            .pending
            .iter()
            .position(|pending| pending.request_id == request_id)
        else {
            tracing::trace!(request_id, "response for unknown request");
            return false;
        };
        let Some(request) = self.pending.remove(position) else {
            return false;
        };
        let ack = message
            .pointer("/Data/Data/Ack")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        tracing::trace!(
            request_id = %request.request_id,
            opcode = request.opcode,
            ack,
            elapsed_ms = request.enqueued_at.elapsed().as_millis() as u64,
            "response matched"
        );
        match QueryKind::from_opcode(request.opcode) {
            Some(kind) if ack == 0 => {
                self.routes
                    .park(kind, request.request_id, request.responder)
            }
            _ => {
                let _ = request.responder.send(Ok(message));
            }
        }
        true
    }

    /// Handles a status broadcast.
    ///
    /// Returns the status when it should be raised as a public event: it was
    /// not consumed as a query reply and differs from the cached status.
    pub fn on_status(&mut self, status: Value) -> Option<Value> {
        self.on_broadcast(QueryKind::Status, status)
    }

    /// Handles an attributes broadcast. See [`on_status`](Self::on_status).
    pub fn on_attributes(&mut self, attributes: Value) -> Option<Value> {
        self.on_broadcast(QueryKind::Attributes, attributes)
    }

    fn on_broadcast(&mut self, kind: QueryKind, value: Value) -> Option<Value> {
        let routed = match self.routes.take(kind, &value) {
            Some(responder) => {
                let _ = responder.send(Ok(value.clone()));
                true
            }
            None => false,
        };
        let cache = self.cache_mut(kind);
        let changed = cache.value.as_ref() != Some(&value);
        cache.updated_at = Some(Instant::now());
        if changed {
            cache.value = Some(value.clone());
        }
        (!routed && changed).then_some(value)
    }

    fn cache_mut(&mut self, kind: QueryKind) -> &mut Cached {
        match kind {
            QueryKind::Status => &mut self.status,
            QueryKind::Attributes => &mut self.attributes,
        }
    }

    pub fn cached(&self, kind: QueryKind) -> Option<&Value> {
        match kind {
            QueryKind::Status => self.status.value.as_ref(),
            QueryKind::Attributes => self.attributes.value.as_ref(),
        }
    }

    /// When the cached value of `kind` was last confirmed by the printer.
    pub fn cached_at(&self, kind: QueryKind) -> Option<Instant> {
        match kind {
            QueryKind::Status => self.status.updated_at,
            QueryKind::Attributes => self.attributes.updated_at,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn waiting(&self, kind: QueryKind) -> usize {
        self.routes.waiting(kind)
    }

    /// Drops requests whose caller has gone away.
    pub fn prune(&mut self) {
        self.pending.retain(|pending| !pending.responder.is_closed());
    }

    /// Rejects every pending request and waiting query.
    pub fn fail_all(&mut self, error: impl Fn() -> SessionError) {
        let pending = self.pending.drain(..).map(|pending| pending.responder);
        let routed = self.routes.drain();
        let mut failed = 0usize;
        for responder in pending.chain(routed) {
            if responder.send(Err(error())).is_ok() {
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::debug!(failed, "rejected outstanding requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(request_id: &str, ack: i64) -> Value {
        json!({"Data": {"RequestID": request_id, "Cmd": 0, "Data": {"Ack": ack}}})
    }

    #[test]
    fn status_queries_resolve_in_submission_order() {
        let mut correlator = Correlator::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        correlator.register("a".into(), 0, tx1);
        correlator.register("b".into(), 0, tx2);

        // Acks arrive out of order; routing still follows submission order
        // of the acknowledged queries.
        assert!(correlator.on_response(response("a", 0)));
        assert!(correlator.on_response(response("b", 0)));
        assert_eq!(correlator.waiting(QueryKind::Status), 2);

        assert_eq!(correlator.on_status(json!({"CurrentStatus": [1]})), None);
        assert_eq!(correlator.on_status(json!({"CurrentStatus": [2]})), None);
        assert_eq!(rx1.try_recv().unwrap().unwrap(), json!({"CurrentStatus": [1]}));
        assert_eq!(rx2.try_recv().unwrap().unwrap(), json!({"CurrentStatus": [2]}));
        assert_eq!(correlator.cached(QueryKind::Status), Some(&json!({"CurrentStatus": [2]})));
    }

    #[test]
    fn commands_match_by_request_id() {
        let mut correlator = Correlator::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        correlator.register("first".into(), 128, tx1);
        correlator.register("second".into(), 129, tx2);

        let second = json!({"Data": {"RequestID": "second", "Data": {"Ack": 0}}});
        let first = json!({"Data": {"RequestID": "first", "Data": {"Ack": 1}}});
        assert!(correlator.on_response(second.clone()));
        assert!(correlator.on_response(first.clone()));
        assert_eq!(rx1.try_recv().unwrap().unwrap(), first);
        assert_eq!(rx2.try_recv().unwrap().unwrap(), second);
        assert_eq!(correlator.pending(), 0);
        assert!(!correlator.on_response(response("first", 0)));
    }

    #[test]
    fn failed_query_ack_resolves_immediately() {
        let mut correlator = Correlator::default();
        let (tx, mut rx) = oneshot::channel();
        correlator.register("q".into(), 1, tx);
        assert!(correlator.on_response(response("q", 3)));
        assert_eq!(correlator.waiting(QueryKind::Attributes), 0);
        let reply = rx.try_recv().unwrap().unwrap();
        assert_eq!(reply["Data"]["Data"]["Ack"], 3);
    }

    #[test]
    fn identical_broadcast_is_not_raised_again() {
        let mut correlator = Correlator::default();
        let status = json!({"CurrentStatus": [0]});
        assert_eq!(correlator.on_status(status.clone()), Some(status.clone()));
        let first_seen = correlator.cached_at(QueryKind::Status);
        assert_eq!(correlator.on_status(status.clone()), None);
        assert!(correlator.cached_at(QueryKind::Status) >= first_seen);
        let changed = json!({"CurrentStatus": [1]});
        assert_eq!(correlator.on_status(changed.clone()), Some(changed));
    }

    #[test]
    fn fail_all_rejects_pending_and_routed() {
        let mut correlator = Correlator::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        correlator.register("cmd".into(), 130, tx1);
        correlator.park_query(QueryKind::Status, "poll".into(), tx2);
        correlator.fail_all(|| SessionError::Disconnected);
        assert!(matches!(rx1.try_recv().unwrap(), Err(SessionError::Disconnected)));
        assert!(matches!(rx2.try_recv().unwrap(), Err(SessionError::Disconnected)));
        assert_eq!(correlator.pending(), 0);
        assert_eq!(correlator.waiting(QueryKind::Status), 0);
    }

    #[test]
    fn abandoned_queries_are_skipped() {
        let mut correlator = Correlator::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        correlator.park_query(QueryKind::Status, "gone".into(), tx1);
        correlator.park_query(QueryKind::Status, "live".into(), tx2);
        drop(rx1);
        correlator.on_status(json!({"CurrentStatus": [0]}));
        assert!(rx2.try_recv().unwrap().is_ok());
    }
}
