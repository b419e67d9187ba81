//! Signal fan-in loop.
//!
//! A single background task reads every signal the connection delivers and
//! routes it into the matching delivery queues. It never reports errors:
//! signals nobody listens to and signals that overflow a queue are dropped,
//! counted in [`DeliveryStats`], and logged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::owners::OwnerChange;
use super::{SignalEnvelope, SignalRegistry};
use crate::bus::{RawSignal, SignalStream};

/// What to do when a delivery queue is full.
///
/// Enqueue always runs outside the registry lock, so only the fan-in loop
/// itself can be held up by a slow consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the new envelope immediately.
    #[default]
    Drop,
    /// Wait up to the given time for room, then drop.
    Wait(Duration),
    /// Wait indefinitely. A stalled consumer stalls delivery to every identity.
    Block,
}

/// Delivery counters for the fan-in loop.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    /// Envelopes enqueued.
    pub delivered: AtomicU64,
    /// Signals with no subscribed identity.
    pub unregistered: AtomicU64,
    /// Envelopes dropped because a queue was full.
    pub overflowed: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub unregistered: u64,
    pub overflowed: u64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
        }
    }
}

/// Run the fan-in loop until the signal stream ends.
pub async fn run(
    registry: Arc<SignalRegistry>,
    mut signals: SignalStream,
    policy: OverflowPolicy,
    stats: Arc<DeliveryStats>,
) {
    info!(policy = ?policy, "Signal fan-in loop started");

    while let Some(signal) = signals.next().await {
        if let Some(change) = OwnerChange::parse(&signal) {
            registry.apply_owner_change(&change).await;
            // Owner watches are internal unless someone subscribed to them
            if registry.route(&signal).await.is_empty() {
                continue;
            }
        }
        dispatch(&registry, &signal, policy, &stats).await;
    }

    registry.close().await;
    info!("Signal stream ended, stopping fan-in loop");
}

/// Route one signal into every queue it belongs to.
pub(crate) async fn dispatch(
    registry: &SignalRegistry,
    signal: &RawSignal,
    policy: OverflowPolicy,
    stats: &DeliveryStats,
) {
    let targets = registry.route(signal).await;
    if targets.is_empty() {
        stats.unregistered.fetch_add(1, Ordering::Relaxed);
        debug!(
            sender = ?signal.sender,
            signal = %signal.qualified_name(),
            "Dropping signal with no listener"
        );
        return;
    }

    for (key, tx) in targets {
        let envelope = SignalEnvelope::new(key.clone(), signal);
        if enqueue(&tx, envelope, policy).await {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.overflowed.fetch_add(1, Ordering::Relaxed);
            warn!(
                signal = %key,
                capacity = tx.max_capacity(),
                "Delivery queue full, dropping signal"
            );
        }
    }
}

async fn enqueue(
    tx: &mpsc::Sender<SignalEnvelope>,
    envelope: SignalEnvelope,
    policy: OverflowPolicy,
) -> bool {
    match policy {
        OverflowPolicy::Drop => tx.try_send(envelope).is_ok(),
        OverflowPolicy::Wait(timeout) => tx.send_timeout(envelope, timeout).await.is_ok(),
        OverflowPolicy::Block => tx.send(envelope).await.is_ok(),
    }
}
