//! Change feed with explicit subscriptions
//!
//! Change sources publish into a [`ChangeFeed`]; consumers hold a
//! [`Subscription`] and are deregistered when it is dropped. Delivery is
//! unbounded, so a slow consumer never loses notices (the coalescer it
//! feeds is what bounds memory).

use parking_lot::RwLock;
use quiesce_core::{ChangeKey, Snapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// A raw change reported by a change source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub key: ChangeKey,
    pub snapshot: Snapshot,
}

impl ChangeNotice {
    pub fn new(key: ChangeKey, snapshot: Snapshot) -> Self {
        Self { key, snapshot }
    }
}

/// Fan-out hub between change sources and consumers
#[derive(Clone, Default)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

#[derive(Default)]
struct FeedInner {
    /// Subscriber id -> delivery channel
    subscribers: RwLock<HashMap<u64, mpsc::UnboundedSender<ChangeNotice>>>,

    /// Monotonic subscriber id counter
    next_id: AtomicU64,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new consumer
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.write().insert(id, tx);

        debug!("Subscriber {} registered", id);
        Subscription {
            id,
            rx,
            feed: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a notice to every subscriber
    ///
    /// Safe to call from any thread. Returns the number of subscribers
    /// that received it.
    pub fn publish(&self, notice: ChangeNotice) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.inner.subscribers.read();
            for (&id, tx) in subscribers.iter() {
                if tx.send(notice.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(id);
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.inner.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
            }
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

/// A consumer's handle on a [`ChangeFeed`]
///
/// Dropping it deregisters the consumer.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ChangeNotice>,
    feed: Weak<FeedInner>,
}

impl Subscription {
    /// Wait for the next notice; `None` once the feed is gone
    pub async fn recv(&mut self) -> Option<ChangeNotice> {
        self.rx.recv().await
    }

    /// Take a notice if one is queued
    pub fn try_recv(&mut self) -> Option<ChangeNotice> {
        self.rx.try_recv().ok()
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.upgrade() {
            feed.subscribers.write().remove(&self.id);
            debug!("Subscriber {} deregistered", self.id);
        }
    }
}
