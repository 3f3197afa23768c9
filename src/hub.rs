//! Fan-out of station events to every connected observer.
//!
//! Built on a `tokio::sync::broadcast` channel: `emit` never waits for a
//! receiver, and a receiver that falls more than `capacity` events behind
//! skips ahead (logged) instead of holding anyone else back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::actors::messages::StationEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("hub is closed to new observers")]
    Closed,

    #[error("observer limit of {max} reached")]
    ObserverLimit { max: usize },
}

#[derive(Debug, Clone)]
pub struct ObserverInfo {
    pub label: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    sender: broadcast::Sender<StationEvent>,
    observers: Mutex<HashMap<u64, ObserverInfo>>,
    max_observers: usize,
    next_id: AtomicU64,
    accepting: watch::Sender<bool>,
}

impl BroadcastHub {
    pub fn new(capacity: usize, max_observers: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (accepting, _) = watch::channel(true);

        Self {
            inner: Arc::new(HubInner {
                sender,
                observers: Mutex::new(HashMap::new()),
                max_observers,
                next_id: AtomicU64::new(0),
                accepting,
            }),
        }
    }

    /// Deliver an event to every current observer without waiting on any of them.
    pub fn emit(&self, event: StationEvent) {
        let name = event.name();
        match self.inner.sender.send(event) {
            Ok(receivers) => trace!("published {name} to {receivers} observers"),
            Err(_) => trace!("no observers for {name}"),
        }
    }

    /// Register an observer.
    ///
    /// The returned subscription already holds the updated `observer-count`.
    pub fn subscribe(&self, label: impl Into<String>) -> Result<Subscription, HubError> {
        if !self.is_accepting() {
            return Err(HubError::Closed);
        }

        let mut observers = self.lock_observers();
        if observers.len() >= self.inner.max_observers {
            warn!(
                "rejecting observer, limit of {} reached",
                self.inner.max_observers
            );
            return Err(HubError::ObserverLimit {
                max: self.inner.max_observers,
            });
        }

        let receiver = self.inner.sender.subscribe();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let label = label.into();
        observers.insert(
            id,
            ObserverInfo {
                label: label.clone(),
                joined_at: Utc::now(),
            },
        );
        let count = observers.len();
        // emitted under the lock so counts reach observers in membership order
        self.emit(StationEvent::ObserverCount { count });
        drop(observers);

        info!("observer {label} joined ({count} connected)");

        Ok(Subscription {
            id,
            receiver,
            hub: self.clone(),
        })
    }

    fn observer_left(&self, id: u64) {
        let mut observers = self.lock_observers();
        let Some(info) = observers.remove(&id) else {
            return;
        };
        let count = observers.len();
        self.emit(StationEvent::ObserverCount { count });
        drop(observers);

        info!("observer {} left ({count} connected)", info.label);
    }

    pub fn observer_count(&self) -> usize {
        self.lock_observers().len()
    }

    pub fn max_observers(&self) -> usize {
        self.inner.max_observers
    }

    /// Stop accepting new observers. Existing subscriptions keep receiving.
    pub fn close(&self) {
        self.inner.accepting.send_replace(false);
        debug!("hub closed to new observers");
    }

    pub fn is_accepting(&self) -> bool {
        *self.inner.accepting.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut accepting = self.inner.accepting.subscribe();
        // the sender lives in `self`, so this can only end by observing `false`
        let _ = accepting.wait_for(|open| !open).await;
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ObserverInfo>> {
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One observer's view of the event stream. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    receiver: broadcast::Receiver<StationEvent>,
    hub: BroadcastHub,
}

impl Subscription {
    /// Next event, skipping over anything this observer was too slow to receive.
    ///
    /// Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<StationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("observer {} lagged, skipped {skipped} events", self.id);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.observer_left(self.id);
    }
}
