//! In-process publish/subscribe for job events.
//!
//! Delivery is synchronous and in subscription order. Each publish works on
//! a snapshot of the subscriber list, so handlers may subscribe or
//! unsubscribe (themselves or others) while being invoked: the change takes
//! effect from the next publish. Events are not stored; late subscribers
//! never see earlier events.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{error, trace, warn};

use jobwatch_core::{EventChannel, JobEvent};

/// Result returned by event handlers. Errors are logged, never propagated.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Handler = Arc<dyn Fn(&JobEvent) -> HandlerResult + Send + Sync>;

struct Registered {
    id: u64,
    /// None subscribes to every channel.
    channel: Option<EventChannel>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Registered>>,
}

impl BusInner {
    fn subscribers(&self) -> MutexGuard<'_, Vec<Registered>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owned event bus. Clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the handler. Returns false if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let mut subscribers = bus.subscribers();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != self.id);
        before != subscribers.len()
    }
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events on `channel`.
    pub fn subscribe<F>(&self, channel: EventChannel, handler: F) -> Subscription
    where
        F: Fn(&JobEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Some(channel), Arc::new(handler))
    }

    /// Register `handler` for events on every channel.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&JobEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, channel: Option<EventChannel>, handler: Handler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers().push(Registered {
            id,
            channel,
            handler,
        });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every handler currently registered for its channel.
    ///
    /// Returns the number of handlers that ran without error or panic.
    pub fn publish(&self, event: &JobEvent) -> usize {
        let channel = event.channel();
        let handlers: Vec<Handler> = self
            .inner
            .subscribers()
            .iter()
            .filter(|s| s.channel.map_or(true, |c| c == channel))
            .map(|s| s.handler.clone())
            .collect();

        trace!(channel = %channel, handlers = handlers.len(), "Publishing event");

        let mut delivered = 0;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(channel = %channel, error = %e, "Event handler failed");
                }
                Err(_) => {
                    error!(channel = %channel, "Event handler panicked");
                }
            }
        }
        delivered
    }

    /// Number of handlers that would receive an event on `channel`.
    pub fn subscriber_count(&self, channel: EventChannel) -> usize {
        self.inner
            .subscribers()
            .iter()
            .filter(|s| s.channel.map_or(true, |c| c == channel))
            .count()
    }
}
