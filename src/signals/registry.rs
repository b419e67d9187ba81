//! Signal subscription registry.
//!
//! Holds the listened senders (one bus match rule each) and the delivery
//! queue for every `(sender, member)` identity. Subscription calls write it;
//! the fan-in loop reads it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::owners::{OwnerChange, OwnerTable};
use super::{SignalChannel, SignalEnvelope, SignalKey, SignalQueue};
use crate::bus::{is_unique_name, BusConnection, MatchRule, RawSignal, Value};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct RegistryState {
    /// Senders with an installed match rule, in subscription order.
    senders: Vec<String>,
    /// Match rule installed for each listened sender.
    rules: HashMap<String, MatchRule>,
    /// Delivery queue per identity.
    queues: HashMap<SignalKey, SignalQueue>,
    /// Well-known names whose ownership changes are applied.
    watched: HashSet<String>,
    /// Unique name -> well-known names it owns.
    owners: OwnerTable,
}

/// Registry of listened senders and per-identity delivery queues.
///
/// Subscriptions are serialised by their own lock, so the check-then-act
/// sequence in [`listen`](Self::listen) is atomic. The state lock is only
/// held for map updates, never across a bus round-trip, so lookups and the
/// fan-in loop stay responsive while a subscription waits on the bus.
pub struct SignalRegistry {
    connection: Arc<dyn BusConnection>,
    listen_lock: Mutex<()>,
    state: RwLock<RegistryState>,
    capacity: usize,
}

impl SignalRegistry {
    /// Create an empty registry that installs match rules on `connection`.
    pub fn new(connection: Arc<dyn BusConnection>, capacity: usize) -> Self {
        Self {
            connection,
            listen_lock: Mutex::new(()),
            state: RwLock::new(RegistryState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Capacity of every delivery queue.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to `member` signals from `sender`.
    ///
    /// The first subscription for a sender installs a match rule scoped to
    /// `(path, interface, sender)`; later subscriptions for the same sender
    /// only add a queue. Subscribing to an identity twice is a no-op.
    #[tracing::instrument(name = "signals.listen", skip(self))]
    pub async fn listen(
        &self,
        path: &str,
        sender: &str,
        interface: &str,
        member: &str,
    ) -> Result<SignalKey> {
        let key = SignalKey::new(sender, member);
        let _serial = self.listen_lock.lock().await;

        {
            let mut state = self.state.write().await;
            if state.senders.iter().any(|s| s == sender) {
                if state.queues.contains_key(&key) {
                    debug!(signal = %key, "Already listening");
                } else {
                    state.queues.insert(key.clone(), SignalQueue::new(self.capacity));
                    debug!(signal = %key, "Added queue for listened sender");
                }
                return Ok(key);
            }
        }

        let rule = MatchRule::for_sender(path, interface, sender);
        self.connection.add_match(&rule).await?;
        if !is_unique_name(sender) {
            self.track_owner(sender).await;
        }

        let mut state = self.state.write().await;
        state.senders.push(sender.to_string());
        state.rules.insert(sender.to_string(), rule.clone());
        state.queues.insert(key.clone(), SignalQueue::new(self.capacity));

        info!(
            signal = %key,
            rule = %rule,
            sender_count = state.senders.len(),
            "Listening to sender"
        );

        Ok(key)
    }

    /// Watch ownership of a well-known sender name and record its current owner.
    ///
    /// The watch rule goes in before the lookup so no change can fall between
    /// them. A change applied while the lookup is in flight wins over the
    /// lookup result. Failures only cost alias resolution, never the
    /// subscription.
    async fn track_owner(&self, name: &str) {
        self.state.write().await.watched.insert(name.to_string());

        if let Err(e) = self
            .connection
            .add_match(&MatchRule::name_owner_changed(name))
            .await
        {
            warn!(sender = %name, error = %e, "Failed to watch sender ownership");
        }

        match self.connection.name_owner(name).await {
            Ok(Some(owner)) => {
                let mut state = self.state.write().await;
                if state.owners.owner_of(name).is_none() {
                    debug!(sender = %name, owner = %owner, "Resolved sender owner");
                    state.owners.set_owner(name, Some(&owner));
                }
            }
            Ok(None) => debug!(sender = %name, "Sender has no owner yet"),
            Err(e) => warn!(sender = %name, error = %e, "Failed to resolve sender owner"),
        }
    }

    /// Wait for the next envelope of `key`.
    ///
    /// Fails immediately with `NotListened` if `key` was never subscribed,
    /// and with `QueueClosed` once the queue is drained after the signal
    /// stream ended.
    pub async fn next_envelope(&self, key: &SignalKey) -> Result<SignalEnvelope> {
        let channel = self
            .channel(key)
            .await
            .ok_or_else(|| Error::NotListened(key.clone()))?;
        channel
            .recv()
            .await
            .ok_or_else(|| Error::QueueClosed(key.clone()))
    }

    /// Wait for the next occurrence of `key` and return its arguments.
    pub async fn get_signal(&self, key: &SignalKey) -> Result<Vec<Value>> {
        self.next_envelope(key).await.map(SignalEnvelope::into_args)
    }

    /// Consumer handle for `key`, or `None` if it was never subscribed.
    pub async fn channel(&self, key: &SignalKey) -> Option<SignalChannel> {
        let state = self.state.read().await;
        state.queues.get(key).map(|q| q.channel(key.clone()))
    }

    pub async fn is_listening(&self, key: &SignalKey) -> bool {
        self.state.read().await.queues.contains_key(key)
    }

    /// Senders with an installed match rule, in subscription order.
    pub async fn senders(&self) -> Vec<String> {
        self.state.read().await.senders.clone()
    }

    /// Every subscribed identity, sorted.
    pub async fn keys(&self) -> Vec<SignalKey> {
        let mut keys: Vec<_> = self.state.read().await.queues.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Queues a delivered signal belongs to.
    ///
    /// Candidates are the delivered sender name plus every well-known name it
    /// currently owns, each paired with the signal member. A candidate only
    /// receives the signal if its own match rule admits it, so a connection
    /// owning several listened names cannot leak one name's signals into
    /// another's path or interface scope.
    pub(crate) async fn route(
        &self,
        signal: &RawSignal,
    ) -> Vec<(SignalKey, mpsc::Sender<SignalEnvelope>)> {
        let Some(sender) = signal.sender.as_deref() else {
            return Vec::new();
        };

        let state = self.state.read().await;
        let names: Vec<&str> = std::iter::once(sender)
            .chain(state.owners.names_for(sender))
            .collect();

        names
            .iter()
            .filter(|name| {
                state
                    .rules
                    .get(**name)
                    .map_or(true, |rule| rule.matches(signal, &names))
            })
            .filter_map(|name| {
                let key = SignalKey::new(*name, signal.member.as_str());
                let tx = state.queues.get(&key)?.sender()?;
                Some((key, tx))
            })
            .collect()
    }

    /// Apply a `NameOwnerChanged` notification to the alias table.
    pub(crate) async fn apply_owner_change(&self, change: &OwnerChange) {
        let mut state = self.state.write().await;
        if !state.watched.contains(&change.name) {
            return;
        }
        debug!(
            sender = %change.name,
            owner = ?change.new_owner,
            "Sender owner changed"
        );
        state
            .owners
            .set_owner(&change.name, change.new_owner.as_deref());
    }

    /// Close every delivery queue.
    ///
    /// Called when the signal stream ends. Consumers drain what is queued and
    /// then see `QueueClosed`.
    pub(crate) async fn close(&self) {
        let mut state = self.state.write().await;
        for queue in state.queues.values_mut() {
            queue.close();
        }
        debug!(queue_count = state.queues.len(), "Closed delivery queues");
    }
}
