//! Per-client notification slots.
//!
//! Each connected browser owns one [`Slot`], keyed by an opaque client id.
//! [`NotificationRegistry::broadcast`] pushes one reload signal into every
//! slot registered at the time of the call.
//!
//! A slot buffers a single undelivered signal. In [`DeliveryMode::Blocking`]
//! a broadcast waits for a full slot to drain, bounded by the delivery
//! timeout; in [`DeliveryMode::BestEffort`] the signal is dropped instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use quire_config::DeliveryMode;
use tokio::sync::{mpsc, watch};

/// What a slot holder observes when waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotSignal {
    /// A rebuild completed.
    Reload,
    /// The slot was closed and will never fire again.
    Closed,
}

/// Registration failure.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("client {0:?} is already registered")]
    AlreadyRegistered(String),

    #[error("registry is shut down")]
    ShutDown,
}

/// Per-slot result counts of a broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Signal accepted by the slot.
    pub delivered: usize,
    /// Slot already held a signal (best-effort mode).
    pub dropped: usize,
    /// Slot was closed before or during delivery.
    pub closed: usize,
    /// Slot stayed full for the whole delivery timeout (blocking mode).
    pub timed_out: usize,
}

enum Delivery {
    Delivered,
    Dropped,
    Closed,
    TimedOut,
}

/// A single client's signaling channel.
pub struct Slot {
    tx: mpsc::Sender<()>,
    rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
    closed: watch::Sender<bool>,
}

impl Slot {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            closed: watch::Sender::new(false),
        }
    }

    /// Wait for the next signal.
    ///
    /// Returns [`SlotSignal::Closed`] as soon as the slot is closed, even if
    /// a signal is still buffered.
    pub async fn recv(&self) -> SlotSignal {
        let closed = self.closed.subscribe();
        if *closed.borrow() {
            return SlotSignal::Closed;
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            () = wait_closed(closed) => SlotSignal::Closed,
            signal = rx.recv() => match signal {
                Some(()) => SlotSignal::Reload,
                None => SlotSignal::Closed,
            },
        }
    }

    /// Whether the slot has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    async fn deliver(&self, mode: DeliveryMode, timeout: Option<Duration>) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }
        match mode {
            DeliveryMode::BestEffort => match self.tx.try_send(()) {
                Ok(()) => Delivery::Delivered,
                Err(mpsc::error::TrySendError::Full(())) => Delivery::Dropped,
                Err(mpsc::error::TrySendError::Closed(())) => Delivery::Closed,
            },
            DeliveryMode::Blocking => {
                let send = async {
                    tokio::select! {
                        biased;
                        () = wait_closed(self.closed.subscribe()) => Delivery::Closed,
                        sent = self.tx.send(()) => match sent {
                            Ok(()) => Delivery::Delivered,
                            Err(_) => Delivery::Closed,
                        },
                    }
                };
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, send)
                        .await
                        .unwrap_or(Delivery::TimedOut),
                    None => send.await,
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&self) -> bool {
        self.rx
            .try_lock()
            .is_ok_and(|mut rx| rx.try_recv().is_ok())
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    // The sender lives as long as the slot, so this only ends on close.
    let _ = closed.wait_for(|closed| *closed).await;
}

#[derive(Default)]
struct Slots {
    by_id: HashMap<String, Arc<Slot>>,
    shut_down: bool,
}

/// Map of client ids to slots, safe to share between tasks.
pub struct NotificationRegistry {
    slots: Mutex<Slots>,
    mode: DeliveryMode,
    timeout: Option<Duration>,
}

impl NotificationRegistry {
    /// Create an empty registry.
    ///
    /// `timeout` bounds each slot's delivery in blocking mode; `None` waits
    /// until the slot drains or is closed.
    #[must_use]
    pub fn new(mode: DeliveryMode, timeout: Option<Duration>) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            mode,
            timeout,
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a slot for `id`.
    ///
    /// An id must be closed before it can be registered again.
    pub fn register(&self, id: impl Into<String>) -> Result<Arc<Slot>, RegistryError> {
        let id = id.into();
        let mut slots = self.slots();
        if slots.shut_down {
            return Err(RegistryError::ShutDown);
        }
        if slots.by_id.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        let slot = Arc::new(Slot::new());
        slots.by_id.insert(id, Arc::clone(&slot));
        Ok(slot)
    }

    /// Look up the slot for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Slot>> {
        self.slots().by_id.get(id).cloned()
    }

    /// Remove and close the slot for `id`, releasing anyone waiting on it.
    ///
    /// Returns `false` if `id` was not registered.
    pub fn close(&self, id: &str) -> bool {
        let removed = self.slots().by_id.remove(id);
        match removed {
            Some(slot) => {
                slot.close();
                true
            }
            None => false,
        }
    }

    /// Close every slot and refuse further registrations.
    ///
    /// Returns the number of slots closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut slots = self.slots();
            slots.shut_down = true;
            slots.by_id.drain().map(|(_, slot)| slot).collect()
        };
        for slot in &drained {
            slot.close();
        }
        drained.len()
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots().by_id.len()
    }

    /// Whether no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send one reload signal to every registered slot.
    ///
    /// Slots are snapshotted up front, so clients registering mid-broadcast
    /// wait for the next one. Delivery is sequential and the lock is not held
    /// while waiting.
    pub async fn broadcast(&self) -> BroadcastReport {
        let targets: Vec<(String, Arc<Slot>)> = self
            .slots()
            .by_id
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut report = BroadcastReport::default();
        for (id, slot) in targets {
            match slot.deliver(self.mode, self.timeout).await {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Dropped => {
                    tracing::debug!(client = %id, "Client has a pending reload, signal dropped");
                    report.dropped += 1;
                }
                Delivery::Closed => report.closed += 1,
                Delivery::TimedOut => {
                    tracing::warn!(client = %id, "Client did not accept reload in time");
                    report.timed_out += 1;
                }
            }
        }
        report
    }
}
