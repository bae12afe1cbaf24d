//! Throttle tracking for configured backends
//!
//! A backend that exhausts its retry budget is marked throttled and excluded
//! from selection until its throttle timeout elapses. State is created lazily on
//! the first dispatch and rebuilt from scratch when every backend is throttled.

use crate::backends::BackendName;
use crate::config::BackendDescriptor;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Throttle status for a single backend
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThrottleRecord {
    weight: f64,
    throttled: bool,
    last_throttled_at: u64,
}

impl ThrottleRecord {
    fn new(weight: f64) -> Self {
        Self {
            weight,
            throttled: false,
            last_throttled_at: 0,
        }
    }

    /// Weight copied from the descriptor at initialization
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    /// Epoch milliseconds of the last throttle, 0 if never throttled
    pub fn last_throttled_at(&self) -> u64 {
        self.last_throttled_at
    }
}

/// Snapshot of every backend's throttle record
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ThrottleState {
    records: HashMap<BackendName, ThrottleRecord>,
}

impl ThrottleState {
    /// One un-throttled record per backend
    pub fn initialize(registry: &[BackendDescriptor]) -> Self {
        let records = registry
            .iter()
            .map(|backend| (BackendName::from(backend), ThrottleRecord::new(backend.weight())))
            .collect();
        Self { records }
    }

    /// Return a new snapshot with every elapsed throttle cleared
    ///
    /// A record is released once `now - last_throttled_at` is strictly greater
    /// than `throttle_timeout`. The receiver is left untouched.
    pub fn expire(&self, now_ms: u64, throttle_timeout: Duration) -> Self {
        let timeout_ms = u64::try_from(throttle_timeout.as_millis()).unwrap_or(u64::MAX);

        let records = self
            .records
            .iter()
            .map(|(name, record)| {
                let mut record = record.clone();
                if record.throttled && now_ms.saturating_sub(record.last_throttled_at) > timeout_ms
                {
                    tracing::debug!(
                        backend = %name,
                        throttled_for_ms = now_ms.saturating_sub(record.last_throttled_at),
                        "Throttle expired, backend eligible again"
                    );
                    record.throttled = false;
                }
                (name.clone(), record)
            })
            .collect();

        Self { records }
    }

    /// Mark a backend throttled as of `now_ms`
    ///
    /// `last_throttled_at` never moves backwards or repeats for a backend, even
    /// when two throttles land in the same millisecond. Returns false for an
    /// unknown backend.
    pub fn mark_throttled(&mut self, backend: &BackendName, now_ms: u64) -> bool {
        let Some(record) = self.records.get_mut(backend) else {
            tracing::warn!(
                backend = %backend,
                "Attempted to throttle unknown backend"
            );
            return false;
        };

        let stamp = now_ms.max(record.last_throttled_at.saturating_add(1));
        if !record.throttled {
            tracing::warn!(
                backend = %backend,
                throttled_at = stamp,
                "Backend throttled after exhausting retries"
            );
        }
        record.throttled = true;
        record.last_throttled_at = stamp;
        true
    }

    pub fn get(&self, backend: &BackendName) -> Option<&ThrottleRecord> {
        self.records.get(backend)
    }

    /// Backend is known and not currently throttled
    pub fn is_eligible(&self, backend: &BackendName) -> bool {
        self.records.get(backend).is_some_and(|r| !r.throttled)
    }

    /// True when no record is eligible (including the empty state)
    pub fn is_exhausted(&self) -> bool {
        self.records.values().all(|r| r.throttled)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BackendName, &ThrottleRecord)> {
        self.records.iter()
    }
}

/// Shared, lock-guarded throttle state for one dispatcher
///
/// All transitions (lazy init, expiry, reset, throttling) happen under a single
/// write lock so concurrent dispatches cannot lose each other's updates.
#[derive(Debug)]
pub struct ThrottleStore {
    initial: ThrottleState,
    state: RwLock<Option<ThrottleState>>,
}

impl ThrottleStore {
    pub fn new(registry: &[BackendDescriptor]) -> Self {
        Self {
            initial: ThrottleState::initialize(registry),
            state: RwLock::new(None),
        }
    }

    /// Initialize on first use, otherwise expire elapsed throttles
    ///
    /// Returns the resulting snapshot for selection.
    pub async fn prepare(&self, now_ms: u64, throttle_timeout: Duration) -> ThrottleState {
        let mut guard = self.state.write().await;
        let next = match guard.as_ref() {
            None => {
                tracing::info!(
                    total_backends = self.initial.len(),
                    "Throttle state initialized with all backends eligible"
                );
                self.initial.clone()
            }
            Some(current) => current.expire(now_ms, throttle_timeout),
        };
        *guard = Some(next.clone());
        next
    }

    /// Rebuild the state if every backend is still throttled
    ///
    /// Returns the current snapshot and whether this call performed the reset.
    /// A concurrent dispatch may already have reset the state, in which case
    /// the fresh state is returned untouched.
    pub async fn reset_if_exhausted(&self) -> (ThrottleState, bool) {
        let mut guard = self.state.write().await;
        match guard.as_ref() {
            Some(current) if !current.is_exhausted() => (current.clone(), false),
            _ => {
                *guard = Some(self.initial.clone());
                (self.initial.clone(), true)
            }
        }
    }

    /// Throttle a backend in the live state
    pub async fn mark_throttled(&self, backend: &BackendName, now_ms: u64) -> bool {
        let mut guard = self.state.write().await;
        let state = guard.get_or_insert_with(|| self.initial.clone());
        state.mark_throttled(backend, now_ms)
    }

    /// Current snapshot, `None` before the first dispatch
    pub async fn snapshot(&self) -> Option<ThrottleState> {
        self.state.read().await.clone()
    }
}
