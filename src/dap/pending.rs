//! Registry of consumers waiting for backend messages.
//!
//! A waiter is keyed by a predicate over incoming messages rather than by `seq`, because some
//! consumers match on the command name. The receive context offers every inbound message to the
//! registry first; a message nobody claims is handed back to the caller.

use crate::debugger::Error;
use crate::{bridge_debug, bridge_warn};
use crate::dap::protocol::{self, MessageKind};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

/// Maximum number of early responses kept until their waiter shows up.
const BACKLOG_LIMIT: usize = 64;

pub type Predicate = Box<dyn Fn(&Value) -> bool + Send>;

/// Requests are told apart by `seq` and command: the front end and the bridge number their
/// requests independently, so two outstanding requests may share a `seq`.
type ResponseKey = (i64, String);

struct Waiter {
    id: u64,
    predicate: Predicate,
    sender: mpsc::Sender<Value>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    waiters: Vec<Waiter>,
    /// Requests sent to the backend and still without a response, with their count.
    outstanding: HashMap<ResponseKey, usize>,
    /// Responses to outstanding requests that arrived before anyone waited for them.
    backlog: VecDeque<Value>,
    closed: bool,
}

impl Registry {
    /// Key of the outstanding request `msg` responds to.
    ///
    /// A response without `command` is matched by `seq` alone.
    fn outstanding_key(&self, msg: &Value) -> Option<ResponseKey> {
        let seq = protocol::request_seq(msg)?;
        match protocol::command(msg) {
            Some(command) => {
                let key = (seq, command.to_string());
                self.outstanding.contains_key(&key).then_some(key)
            }
            None => self.outstanding.keys().find(|(s, _)| *s == seq).cloned(),
        }
    }

    /// Mark the request answered by `msg` as no longer outstanding.
    fn settle(&mut self, msg: &Value) {
        if let Some(key) = self.outstanding_key(msg) {
            self.forget(&key);
        }
    }

    fn forget(&mut self, key: &ResponseKey) {
        if let Some(count) = self.outstanding.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.outstanding.remove(key);
            }
        }
    }
}

/// Result of offering an inbound message to the registry.
#[derive(Debug)]
pub enum Dispatch {
    /// A waiter took the message.
    Claimed,
    /// An event nobody waits for.
    Event(Value),
    /// A response kept until a waiter registers for it.
    Buffered,
    /// A message without a matching request or with an unknown type, it was dropped.
    Dropped,
}

#[derive(Default)]
pub struct PendingRequests {
    registry: Mutex<Registry>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remember that a `command` request with `seq` was sent and a response is expected.
    pub fn expect_response(&self, seq: i64, command: &str) {
        *self
            .registry()
            .outstanding
            .entry((seq, command.to_string()))
            .or_default() += 1;
    }

    /// Register a waiter for the first message satisfying `predicate`.
    ///
    /// Responses that arrived earlier than the registration are served from the backlog.
    pub fn register(&self, predicate: Predicate) -> Result<Registration<'_>, Error> {
        let (sender, receiver) = mpsc::channel();
        let mut registry = self.registry();
        let id = registry.next_id;
        registry.next_id += 1;

        let early_pos = registry.backlog.iter().position(|msg| predicate(msg));
        let early = early_pos.and_then(|pos| registry.backlog.remove(pos));
        match early {
            Some(msg) => {
                registry.settle(&msg);
                // receiver is alive, the send can't fail
                let _ = sender.send(msg);
            }
            None if registry.closed => return Err(Error::ConnectionClosed),
            None => registry.waiters.push(Waiter {
                id,
                predicate,
                sender,
            }),
        }

        Ok(Registration {
            id,
            receiver,
            pending: self,
            expects: None,
        })
    }

    /// Offer an inbound message to the waiters.
    pub fn dispatch(&self, msg: Value) -> Dispatch {
        let mut registry = self.registry();

        let kind = protocol::kind(&msg);
        if kind == Some(MessageKind::Response) {
            if let Some(seq) = protocol::request_seq(&msg) {
                if registry.outstanding_key(&msg).is_none() {
                    bridge_warn!(target: "dap", "protocol violation, response to unknown request {seq} dropped: {msg}");
                    return Dispatch::Dropped;
                }
            }
        }

        if let Some(pos) = registry.waiters.iter().position(|w| (w.predicate)(&msg)) {
            let waiter = registry.waiters.remove(pos);
            if kind == Some(MessageKind::Response) {
                registry.settle(&msg);
            }
            if waiter.sender.send(msg).is_err() {
                bridge_debug!(target: "dap", "waiter {} gone before its message arrived", waiter.id);
            }
            return Dispatch::Claimed;
        }

        match kind {
            Some(MessageKind::Event) => Dispatch::Event(msg),
            Some(MessageKind::Response) if protocol::request_seq(&msg).is_some() => {
                if registry.backlog.len() >= BACKLOG_LIMIT {
                    if let Some(old) = registry.backlog.pop_front() {
                        registry.settle(&old);
                        bridge_warn!(target: "dap", "unclaimed response dropped: {old}");
                    }
                }
                registry.backlog.push_back(msg);
                Dispatch::Buffered
            }
            _ => {
                bridge_warn!(target: "dap", "protocol violation, unexpected message dropped: {msg}");
                Dispatch::Dropped
            }
        }
    }

    /// Wake every waiter with a closed connection error and refuse new registrations.
    pub fn close(&self) {
        let mut registry = self.registry();
        registry.closed = true;
        // dropping the senders disconnects the receivers
        registry.waiters.clear();
        registry.outstanding.clear();
        registry.backlog.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.registry().closed
    }

    /// Drop a waiter still registered together with the response it expected, a late reply is
    /// then a violation. A waiter already served has settled its request.
    fn abandon(&self, id: u64, expects: Option<&ResponseKey>) {
        let mut registry = self.registry();
        let Some(pos) = registry.waiters.iter().position(|w| w.id == id) else {
            return;
        };
        registry.waiters.remove(pos);
        if let Some(key) = expects {
            registry.forget(key);
        }
    }

    #[cfg(test)]
    fn waiters_count(&self) -> usize {
        self.registry().waiters.len()
    }

    #[cfg(test)]
    fn outstanding_count(&self) -> usize {
        self.registry().outstanding.values().sum()
    }
}

/// A registered waiter, blocks the calling context until its message arrives.
pub struct Registration<'a> {
    id: u64,
    receiver: mpsc::Receiver<Value>,
    pending: &'a PendingRequests,
    expects: Option<ResponseKey>,
}

impl Registration<'_> {
    /// Tie the waiter to the response of the `command` request with `seq`: if the registration
    /// is dropped unserved (timeout, failed write) the request stops being outstanding.
    pub fn expecting(mut self, seq: i64, command: &str) -> Self {
        self.expects = Some((seq, command.to_string()));
        self
    }

    pub fn wait(self, what: &str, timeout: Duration) -> Result<Value, Error> {
        match self.receiver.recv_timeout(timeout) {
            Ok(msg) => Ok(msg),
            Err(RecvTimeoutError::Timeout) => {
                self.pending.abandon(self.id, self.expects.as_ref());
                // the message may have been delivered right before unregistering
                self.receiver.try_recv().map_err(|_| Error::Timeout {
                    what: what.to_string(),
                    after: timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::ConnectionClosed),
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.pending.abandon(self.id, self.expects.as_ref());
    }
}
