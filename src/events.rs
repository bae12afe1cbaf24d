//! Synchronous event notification for dispatch and comparison runs
//!
//! Handlers are registered per [`EventKind`] and invoked inline, on the task
//! that raised the event, in registration order. A slow handler delays the
//! dispatch that triggered it.

use crate::backends::BackendName;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Discriminant used to subscribe to one kind of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Retry,
    Throttled,
    TotallyThrottled,
    ComparisonProgress,
    ComparisonError,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Throttled => "throttled",
            Self::TotallyThrottled => "totally_throttled",
            Self::ComparisonProgress => "comparison_progress",
            Self::ComparisonError => "comparison_error",
        }
    }
}

/// Every event raised by the dispatcher and the comparison harness
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// An invocation attempt failed and another may follow
    Retry {
        backend: BackendName,
        /// Zero-based attempt index
        attempt: usize,
        error: String,
    },
    /// A backend exhausted its retries and was excluded from selection
    Throttled { backend: BackendName },
    /// Every backend was throttled; the throttle state was rebuilt
    TotallyThrottled { cooldown: Duration },
    /// One comparison iteration succeeded
    ComparisonProgress { backend: BackendName, iteration: usize },
    /// One comparison iteration failed (still counted)
    ComparisonError {
        backend: BackendName,
        iteration: usize,
        error: String,
    },
}

impl DispatchEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Retry { .. } => EventKind::Retry,
            Self::Throttled { .. } => EventKind::Throttled,
            Self::TotallyThrottled { .. } => EventKind::TotallyThrottled,
            Self::ComparisonProgress { .. } => EventKind::ComparisonProgress,
            Self::ComparisonError { .. } => EventKind::ComparisonError,
        }
    }

    /// Backend the event refers to, if any
    pub fn backend(&self) -> Option<&BackendName> {
        match self {
            Self::Retry { backend, .. }
            | Self::Throttled { backend }
            | Self::ComparisonProgress { backend, .. }
            | Self::ComparisonError { backend, .. } => Some(backend),
            Self::TotallyThrottled { .. } => None,
        }
    }
}

/// Handle returned by [`EventNotifier::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&DispatchEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

/// Publish/subscribe registry keyed by event kind
#[derive(Default)]
pub struct EventNotifier {
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotifier")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&DispatchEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a handler; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Deliver an event to every handler registered for its kind
    ///
    /// Handlers are cloned out of the registry first, so a handler may itself
    /// subscribe or unsubscribe without deadlocking.
    pub fn notify(&self, event: &DispatchEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.handler.clone())
            .collect();

        tracing::trace!(
            event = kind.as_str(),
            handlers = handlers.len(),
            "Dispatching event"
        );

        for handler in handlers {
            handler(event);
        }
    }
}
