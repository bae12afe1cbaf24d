//! Single-prompt dispatch with weighted selection, retries and throttling
//!
//! A dispatch walks through these steps:
//!
//! 1. Initialize the throttle state on first use, otherwise expire old throttles
//! 2. Select an eligible backend; if none is left, reset the state once and retry
//! 3. Invoke the backend up to `max_retries_on_failure` times
//! 4. On exhaustion throttle the backend, then fail or return an empty response
//! 5. Build the stats report
//!
//! The comparison harness lives in [`compare`].

pub mod compare;

pub use compare::{ComparisonReport, ComparisonRequest, ModelResults, DEFAULT_REVIEW_INSTRUCTION};

use crate::backends::{self, BackendName, ThrottleState, ThrottleStore};
use crate::clock::{Clock, SystemClock};
use crate::config::{BackendDescriptor, Config};
use crate::connectors::{ConnectorFactory, LlmConnector, LlmResponse, PlatformConnectors};
use crate::error::{AppError, AppResult};
use crate::events::{DispatchEvent, EventNotifier};
use crate::metrics::{DispatchOutcome, Metrics};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Identifier attached to one dispatch for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DispatchId(Uuid);

impl DispatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DispatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DispatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a dispatch does once the selected backend exhausts its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottlePolicy {
    /// Return `AppError::BackendThrottled`
    #[default]
    Fail,
    /// Raise a `throttled` event and return an empty response
    Notify,
}

/// Usage and timing for one dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStatsReport {
    pub dispatch_id: DispatchId,
    pub model_name: String,
    pub hosting_platform: String,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_runtime_ms: u64,
    /// Failed attempts before the outcome
    pub retry_count: usize,
}

impl PromptStatsReport {
    fn build(
        dispatch_id: DispatchId,
        backend: &BackendDescriptor,
        response: &LlmResponse,
        started: Instant,
        retry_count: usize,
    ) -> Self {
        Self {
            dispatch_id,
            model_name: backend.model_name().to_string(),
            hosting_platform: backend.hosting_platform().to_string(),
            total_input_tokens: response.input_tokens,
            total_output_tokens: response.output_tokens,
            total_runtime_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            retry_count,
        }
    }
}

/// Result of a dispatch that did not fail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptOutcome {
    pub response: LlmResponse,
    pub stats: PromptStatsReport,
}

/// Builder for [`Dispatcher`]
#[derive(Debug)]
pub struct DispatcherBuilder {
    config: Config,
    factory: Option<Arc<dyn ConnectorFactory>>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Metrics>,
}

impl DispatcherBuilder {
    /// Replace the platform connectors
    pub fn connector_factory(mut self, factory: impl ConnectorFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Share an existing metrics registry
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and build the dispatcher
    ///
    /// # Errors
    ///
    /// `Config`/`UnsupportedPlatform` for an invalid registry, `Metrics` if the
    /// metrics registry cannot be created.
    pub fn build(self) -> AppResult<Dispatcher> {
        self.config.validate()?;

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Metrics::new()?,
        };

        tracing::info!(
            backends = self.config.target_models.len(),
            max_retries_on_failure = self.config.balancer.max_retries_on_failure,
            throttle_timeout_seconds = self.config.balancer.throttle_timeout_seconds,
            "Dispatcher ready"
        );

        Ok(Dispatcher {
            throttles: ThrottleStore::new(&self.config.target_models),
            config: self.config,
            events: EventNotifier::new(),
            factory: self.factory.unwrap_or_else(|| Arc::new(PlatformConnectors)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            metrics,
        })
    }
}

/// Load balancer over the configured backends
///
/// Safe to share behind an `Arc`; concurrent dispatches serialize their throttle
/// transitions through one lock.
#[derive(Debug)]
pub struct Dispatcher {
    config: Config,
    throttles: ThrottleStore,
    events: EventNotifier,
    factory: Arc<dyn ConnectorFactory>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl Dispatcher {
    pub fn builder(config: Config) -> DispatcherBuilder {
        DispatcherBuilder {
            config,
            factory: None,
            clock: None,
            metrics: None,
        }
    }

    /// Dispatcher with the built-in platform connectors and the system clock
    pub fn new(config: Config) -> AppResult<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscription surface for retry, throttle and comparison events
    pub fn events(&self) -> &EventNotifier {
        &self.events
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Current throttle state, `None` before the first dispatch
    pub async fn throttle_snapshot(&self) -> Option<ThrottleState> {
        self.throttles.snapshot().await
    }

    pub(crate) fn connector_for(
        &self,
        backend: &BackendDescriptor,
    ) -> AppResult<Arc<dyn LlmConnector>> {
        self.factory.connector_for(backend)
    }

    /// Dispatch one prompt, failing with `BackendThrottled` on exhaustion
    pub async fn run_single_prompt(&self, prompt: &str) -> AppResult<PromptOutcome> {
        self.run_single_prompt_with(prompt, ThrottlePolicy::default()).await
    }

    /// Dispatch one prompt with an explicit throttle policy
    ///
    /// # Errors
    ///
    /// - `NoEligibleBackend` if selection fails again right after a full reset
    /// - `UnsupportedPlatform`/`Config` if the selected backend has no connector
    /// - `BackendThrottled` on exhaustion under [`ThrottlePolicy::Fail`]
    pub async fn run_single_prompt_with(
        &self,
        prompt: &str,
        policy: ThrottlePolicy,
    ) -> AppResult<PromptOutcome> {
        let dispatch_id = DispatchId::new();
        let started = Instant::now();
        let balancer = &self.config.balancer;

        let state = self
            .throttles
            .prepare(self.clock.now_millis(), balancer.throttle_timeout())
            .await;
        let backend = self.select_backend(&state, dispatch_id).await?;
        let name = BackendName::from(backend);
        let connector = self.connector_for(backend)?;

        tracing::debug!(
            dispatch_id = %dispatch_id,
            backend = %name,
            prompt_length = prompt.len(),
            "Dispatching prompt"
        );

        let max_attempts = balancer.max_retries_on_failure;
        let retry_delay = balancer.retry_delay();
        let mut failed_attempts = 0usize;
        let mut response = None;

        for attempt in 0..max_attempts {
            match connector.invoke(prompt).await {
                Ok(r) => {
                    response = Some(r);
                    break;
                }
                Err(source) => {
                    failed_attempts += 1;
                    let error = source.to_string();
                    let err = AppError::InvocationFailed {
                        backend: name.to_string(),
                        attempt,
                        source,
                    };
                    tracing::warn!(
                        dispatch_id = %dispatch_id,
                        backend = %name,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %err,
                        "Invocation attempt failed"
                    );
                    self.metrics.record_retry(name.as_str());
                    self.events.notify(&DispatchEvent::Retry {
                        backend: name.clone(),
                        attempt,
                        error,
                    });

                    if attempt + 1 < max_attempts && !retry_delay.is_zero() {
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }

        if let Some(response) = response {
            let stats =
                PromptStatsReport::build(dispatch_id, backend, &response, started, failed_attempts);
            self.metrics.record_tokens(
                name.as_str(),
                response.input_tokens,
                response.output_tokens,
            );
            self.record_outcome(&name, DispatchOutcome::Success, started);

            tracing::info!(
                dispatch_id = %dispatch_id,
                backend = %name,
                retry_count = stats.retry_count,
                input_tokens = stats.total_input_tokens,
                output_tokens = stats.total_output_tokens,
                runtime_ms = stats.total_runtime_ms,
                "Dispatch completed"
            );
            return Ok(PromptOutcome { response, stats });
        }

        self.throttles.mark_throttled(&name, self.clock.now_millis()).await;
        self.metrics.record_throttle(name.as_str());

        let empty = LlmResponse::empty();
        let stats =
            PromptStatsReport::build(dispatch_id, backend, &empty, started, failed_attempts);

        match policy {
            ThrottlePolicy::Fail => {
                self.record_outcome(&name, DispatchOutcome::Failed, started);
                tracing::error!(
                    dispatch_id = %dispatch_id,
                    backend = %name,
                    retry_count = stats.retry_count,
                    runtime_ms = stats.total_runtime_ms,
                    "Backend throttled after exhausting retries"
                );
                Err(AppError::BackendThrottled {
                    backend: name.to_string(),
                    attempts: failed_attempts,
                })
            }
            ThrottlePolicy::Notify => {
                self.record_outcome(&name, DispatchOutcome::Throttled, started);
                tracing::warn!(
                    dispatch_id = %dispatch_id,
                    backend = %name,
                    retry_count = stats.retry_count,
                    runtime_ms = stats.total_runtime_ms,
                    "Backend throttled after exhausting retries, returning empty response"
                );
                self.events.notify(&DispatchEvent::Throttled { backend: name });
                Ok(PromptOutcome {
                    response: empty,
                    stats,
                })
            }
        }
    }

    /// Select from `state`, resetting the throttle state once if nothing is eligible
    async fn select_backend(
        &self,
        state: &ThrottleState,
        dispatch_id: DispatchId,
    ) -> AppResult<&BackendDescriptor> {
        let registry = &self.config.target_models;
        match backends::select(state, registry) {
            Ok(backend) => Ok(backend),
            Err(first) => {
                let (fresh, did_reset) = self.throttles.reset_if_exhausted().await;
                if did_reset {
                    let cooldown = self.config.balancer.totally_throttled_timeout();
                    tracing::warn!(
                        dispatch_id = %dispatch_id,
                        total_backends = registry.len(),
                        cooldown_seconds = cooldown.as_secs_f64(),
                        error = %first,
                        "Every backend is throttled, resetting throttle state"
                    );
                    self.metrics.record_total_throttle_reset();
                    self.events.notify(&DispatchEvent::TotallyThrottled { cooldown });
                }
                Ok(backends::select(&fresh, registry)?)
            }
        }
    }

    fn record_outcome(&self, backend: &BackendName, outcome: DispatchOutcome, started: Instant) {
        if let Err(e) =
            self.metrics
                .record_dispatch(backend.as_str(), outcome, started.elapsed().as_secs_f64())
        {
            tracing::warn!(backend = %backend, error = %e, "Failed to record dispatch metrics");
        }
    }
}
