//! In-process publish/subscribe for domain events
//!
//! An `EventChannel` is built once at process start and handed to every
//! producer and consumer (typically behind an `Arc`). Dispatch is
//! synchronous and ordered: `publish` returns after every handler that was
//! registered for the topic at call time has run. Handlers needing
//! asynchronous work spawn it themselves; that work is detached and not
//! awaited by the channel.

use crate::errors::{HandlerError, HandlerFailure, PublishError, SubscribeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Event delivered to handlers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event<P = Value> {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub data: P,
}

/// Registered event handler; identity (for unsubscribe) is the `Arc` pointer
pub type Handler<P = Value> = Arc<dyn Fn(&Event<P>) -> Result<(), HandlerError> + Send + Sync>;

/// Channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Leak guard against code that re-subscribes on every request
    pub max_subscribers_per_topic: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_subscribers_per_topic: 50,
        }
    }
}

/// Named-topic event registry
///
/// # Example
///
/// ```rust
/// use storefront_resilience::{EventChannel, EventName};
/// use serde_json::json;
///
/// let channel = EventChannel::new();
/// channel
///     .subscribe_fn(EventName::OrderCreated, |event| {
///         assert_eq!(event.data["order_id"], 7);
///         Ok(())
///     })
///     .unwrap();
///
/// let delivered = channel
///     .publish(EventName::OrderCreated, json!({ "order_id": 7 }))
///     .unwrap();
/// assert_eq!(delivered, 1);
/// ```
pub struct EventChannel<P = Value> {
    subscribers: RwLock<HashMap<String, Vec<Handler<P>>>>,
    config: ChannelConfig,
}

impl EventChannel<Value> {
    /// Channel carrying opaque JSON payloads with the default subscriber cap
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }
}

impl Default for EventChannel<Value> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EventChannel<P> {
    /// Channel with an explicit subscriber cap
    ///
    /// `max_subscribers_per_topic` must be at least 1; with a cap of 0 every
    /// `subscribe` fails. [`Settings`](crate::Settings) rejects that value
    /// when loading.
    pub fn with_config(config: ChannelConfig) -> Self {
        debug_assert!(
            config.max_subscribers_per_topic > 0,
            "max_subscribers_per_topic must be at least 1"
        );
        Self {
            subscribers: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Deliver `data` to every handler registered for `name`, in registration order
    ///
    /// Returns the number of handlers invoked; zero subscribers is not an
    /// error. A failing or panicking handler does not stop delivery to the
    /// ones after it; all failures come back together in [`PublishError`].
    pub fn publish(&self, name: impl AsRef<str>, data: P) -> Result<usize, PublishError> {
        let name = name.as_ref();

        // Snapshot so handlers can (un)subscribe without deadlocking
        let handlers = self
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::trace!(topic = name, "no subscribers, event dropped");
            return Ok(0);
        }

        let event = Event {
            name: name.to_string(),
            timestamp: Utc::now(),
            data,
        };
        tracing::debug!(topic = name, handlers = handlers.len(), "publishing event");

        let mut failures = Vec::new();
        for (index, handler) in handlers.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&event)))
                .unwrap_or_else(|payload| Err(panic_message(payload).into()));

            if let Err(error) = outcome {
                tracing::warn!(topic = name, index, error = %error, "event handler failed");
                failures.push(HandlerFailure { index, error });
            }
        }

        if failures.is_empty() {
            Ok(handlers.len())
        } else {
            Err(PublishError {
                event: event.name,
                delivered: handlers.len(),
                failures,
            })
        }
    }

    /// Append `handler` to the topic's handler list
    pub fn subscribe(
        &self,
        name: impl AsRef<str>,
        handler: Handler<P>,
    ) -> Result<(), SubscribeError> {
        let name = name.as_ref();
        let limit = self.config.max_subscribers_per_topic;

        let mut subscribers = self.write();
        let handlers = subscribers.get(name).map(Vec::len).unwrap_or(0);
        if handlers >= limit {
            tracing::warn!(topic = name, limit, "subscriber limit reached, possible handler leak");
            return Err(SubscribeError::Capacity {
                topic: name.to_string(),
                limit,
            });
        }

        subscribers
            .entry(name.to_string())
            .or_default()
            .push(handler);
        tracing::debug!(topic = name, handlers = handlers + 1, "subscribed");
        Ok(())
    }

    /// Subscribe a closure, returning the handle needed to unsubscribe it
    pub fn subscribe_fn<F>(&self, name: impl AsRef<str>, f: F) -> Result<Handler<P>, SubscribeError>
    where
        F: Fn(&Event<P>) -> Result<(), HandlerError> + Send + Sync + 'static,
        P: 'static,
    {
        let handler: Handler<P> = Arc::new(f);
        self.subscribe(name, handler.clone())?;
        Ok(handler)
    }

    /// Remove the first registration of `handler` from the topic
    ///
    /// Returns false when the handler was not registered there.
    pub fn unsubscribe(&self, name: impl AsRef<str>, handler: &Handler<P>) -> bool {
        let name = name.as_ref();
        let mut subscribers = self.write();

        let Some(handlers) = subscribers.get_mut(name) else {
            return false;
        };
        let Some(position) = handlers.iter().position(|h| Arc::ptr_eq(h, handler)) else {
            return false;
        };

        handlers.remove(position);
        if handlers.is_empty() {
            subscribers.remove(name);
        }
        tracing::debug!(topic = name, "unsubscribed");
        true
    }

    pub fn subscriber_count(&self, name: impl AsRef<str>) -> usize {
        self.read().get(name.as_ref()).map(Vec::len).unwrap_or(0)
    }

    /// Topics with at least one subscriber, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Handler<P>>>> {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Handler<P>>>> {
        self.subscribers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P> std::fmt::Debug for EventChannel<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<String, usize> = self
            .read()
            .iter()
            .map(|(topic, handlers)| (topic.clone(), handlers.len()))
            .collect();
        f.debug_struct("EventChannel")
            .field("subscribers", &counts)
            .field("config", &self.config)
            .finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("handler panicked: {}", detail)
}
