//! Subscription Registry
//!
//! In-memory fan-out of push events: each topic maps to an ordered list of
//! handlers. Producers (the transport's reader task) publish without knowing
//! who consumes; consumers hold a [`Subscription`] handle per registration.
//!
//! # Guarantees
//!
//! - Handlers for one topic run in registration order.
//! - A handler that returns an error or panics is logged and skipped; the
//!   remaining handlers for the same publish still run.
//! - Dropping a [`Subscription`] does **not** unregister it. Removal is always
//!   explicit through [`Subscription::unsubscribe`] or
//!   [`SubscriptionRegistry::clear`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;

/// Event handler invoked on publish
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

type Topics = HashMap<String, Vec<(u64, Handler)>>;

/// Topic → ordered handlers map, cheap to clone and share
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    topics: Arc<Mutex<Topics>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = lock(&self.topics);
        f.debug_map()
            .entries(topics.iter().map(|(topic, handlers)| (topic, handlers.len())))
            .finish()
    }
}

fn lock(topics: &Mutex<Topics>) -> MutexGuard<'_, Topics> {
    topics.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `topic`
    ///
    /// The returned handle removes exactly this registration.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        lock(&self.topics)
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        tracing::debug!(topic = %topic, id, "Handler subscribed");

        Subscription {
            topic,
            id,
            topics: Arc::downgrade(&self.topics),
        }
    }

    /// Invoke every handler registered for `topic`, in registration order
    ///
    /// Handlers run outside the registry lock, so a handler may subscribe or
    /// unsubscribe without deadlocking; such changes apply from the next
    /// publish. Returns the number of handlers that completed successfully.
    pub fn publish(&self, topic: &str, event: &Value) -> usize {
        let handlers: Vec<(u64, Handler)> = match lock(&self.topics).get(topic) {
            Some(handlers) => handlers.clone(),
            None => Vec::new(),
        };

        if handlers.is_empty() {
            tracing::debug!(topic, "No handlers registered, event dropped");
            return 0;
        }

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(topic, id, error = %e, "Handler failed");
                }
                Err(_) => {
                    tracing::warn!(topic, id, "Handler panicked");
                }
            }
        }
        delivered
    }

    /// Remove all handlers for `topic`, or for every topic when `None`
    pub fn clear(&self, topic: Option<&str>) {
        let mut topics = lock(&self.topics);
        match topic {
            Some(topic) => {
                topics.remove(topic);
                tracing::debug!(topic, "Cleared handlers");
            }
            None => {
                topics.clear();
                tracing::debug!("Cleared all handlers");
            }
        }
    }

    /// Number of handlers currently registered for `topic`
    pub fn handler_count(&self, topic: &str) -> usize {
        lock(&self.topics).get(topic).map_or(0, Vec::len)
    }
}

/// Capability to remove one registration
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    topic: String,
    id: u64,
    topics: Weak<Mutex<Topics>>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the registration
    ///
    /// Returns `false` if it was already gone (cleared, or the registry was
    /// dropped).
    pub fn unsubscribe(self) -> bool {
        let Some(topics) = self.topics.upgrade() else {
            return false;
        };
        let mut topics = lock(&topics);
        let Some(handlers) = topics.get_mut(&self.topic) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|(id, _)| *id != self.id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            topics.remove(&self.topic);
        }
        removed
    }
}
