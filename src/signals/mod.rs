//! Signal subscription and delivery.
//!
//! This module contains:
//! - `SignalKey`: the `(sender, member)` identity that addresses a queue
//! - `SignalEnvelope`: one delivered occurrence and its arguments
//! - `SignalChannel`: consumer handle on a delivery queue
//! - `SignalRegistry`: listened senders + delivery queue map
//! - `fan_in`: the background loop that routes inbound signals into queues
//!
//! # Flow
//!
//! ```text
//! bus ──(match rule per sender)──> signal stream
//!                                        │
//!                                        ▼
//!                                   fan-in loop ──lookup──> SignalRegistry
//!                                        │
//!                     ┌──────────────────┼──────────────────┐
//!                     ▼                  ▼                  ▼
//!             (sender, StateChanged) (sender, Progress) (other, Done)
//!                  queue               queue              queue
//!                     │
//!                     ▼
//!               get_signal()
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::bus::{RawSignal, Value};

pub mod fan_in;
mod owners;
mod registry;

pub use fan_in::{DeliveryStats, OverflowPolicy, StatsSnapshot};
pub use registry::SignalRegistry;

/// Default capacity of each delivery queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Identity of a delivery queue: sender bus name plus signal member.
///
/// Structured rather than a joined string, so dots inside either part can
/// never collide. Displays as `sender.member`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalKey {
    sender: String,
    member: String,
}

impl SignalKey {
    pub fn new(sender: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            member: member.into(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn member(&self) -> &str {
        &self.member
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sender, self.member)
    }
}

/// One signal occurrence as held in a delivery queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEnvelope {
    key: SignalKey,
    emitter: Option<String>,
    path: Option<String>,
    interface: Option<String>,
    args: Vec<Value>,
}

impl SignalEnvelope {
    /// Wrap a delivered signal for the queue addressed by `key`.
    pub fn new(key: SignalKey, signal: &RawSignal) -> Self {
        Self {
            key,
            emitter: signal.sender.clone(),
            path: signal.path.clone(),
            interface: signal.interface.clone(),
            args: signal.args.clone(),
        }
    }

    /// Queue identity this envelope was routed to.
    pub fn key(&self) -> &SignalKey {
        &self.key
    }

    /// Sender name as delivered by the bus (normally a unique name).
    pub fn emitter(&self) -> Option<&str> {
        self.emitter.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn into_args(self) -> Vec<Value> {
        self.args
    }
}

/// Consumer handle on one delivery queue.
///
/// Clones share the same queue; each envelope is received exactly once.
/// The handle does not keep the queue open: once the registry closes or
/// drops it, [`recv`](Self::recv) drains what is left and then returns `None`.
#[derive(Debug, Clone)]
pub struct SignalChannel {
    key: SignalKey,
    tx: Option<mpsc::WeakSender<SignalEnvelope>>,
    rx: Arc<Mutex<mpsc::Receiver<SignalEnvelope>>>,
    capacity: usize,
}

impl SignalChannel {
    pub fn key(&self) -> &SignalKey {
        &self.key
    }

    /// Wait for the next envelope.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn recv(&self) -> Option<SignalEnvelope> {
        self.rx.lock().await.recv().await
    }

    /// Take the next envelope if one is queued and no other consumer is waiting.
    pub fn try_recv(&self) -> Option<SignalEnvelope> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Envelopes currently queued; 0 once the queue is closed.
    pub fn len(&self) -> usize {
        self.tx
            .as_ref()
            .and_then(mpsc::WeakSender::upgrade)
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.tx
            .as_ref()
            .and_then(mpsc::WeakSender::upgrade)
            .is_none()
    }
}

/// A bounded FIFO delivery queue.
///
/// The registry holds the only strong sender; closing the queue drops it.
#[derive(Debug)]
pub(crate) struct SignalQueue {
    tx: Option<mpsc::Sender<SignalEnvelope>>,
    rx: Arc<Mutex<mpsc::Receiver<SignalEnvelope>>>,
    capacity: usize,
}

impl SignalQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Some(tx),
            rx: Arc::new(Mutex::new(rx)),
            capacity,
        }
    }

    /// Producer handle, or `None` once closed.
    pub(crate) fn sender(&self) -> Option<mpsc::Sender<SignalEnvelope>> {
        self.tx.clone()
    }

    pub(crate) fn close(&mut self) {
        self.tx = None;
    }

    pub(crate) fn channel(&self, key: SignalKey) -> SignalChannel {
        SignalChannel {
            key,
            tx: self.tx.as_ref().map(mpsc::Sender::downgrade),
            rx: Arc::clone(&self.rx),
            capacity: self.capacity,
        }
    }
}
