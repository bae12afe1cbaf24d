//! Prometheus metrics for the load balancer
//!
//! Tracks dispatch outcomes, retries, throttling, token usage and latency per
//! backend. The `backend` label is bounded by the configured registry.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Final outcome of one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An attempt returned a response
    Success,
    /// Retries exhausted, caller asked for an empty response instead of an error
    Throttled,
    /// Retries exhausted, dispatch returned `BackendThrottled`
    Failed,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Throttled => "throttled",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of one comparison iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Success,
    Error,
}

impl IterationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Metrics collector
///
/// Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    dispatches_total: IntCounterVec,
    dispatch_duration: HistogramVec,
    retries_total: IntCounterVec,
    throttles_total: IntCounterVec,
    total_throttle_resets: IntCounter,
    tokens_total: IntCounterVec,
    comparison_iterations_total: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create a new Metrics instance with its own registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: N backends × 3 outcomes
        let dispatches_total = IntCounterVec::new(
            Opts::new(
                "llm_balancer_dispatches_total",
                "Total single-prompt dispatches by backend and outcome",
            ),
            &["backend", "outcome"],
        )?;

        let dispatch_duration = HistogramVec::new(
            HistogramOpts::new(
                "llm_balancer_dispatch_duration_seconds",
                "Wall-clock time of a dispatch including retries",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["backend"],
        )?;

        let retries_total = IntCounterVec::new(
            Opts::new(
                "llm_balancer_retries_total",
                "Failed invocation attempts by backend",
            ),
            &["backend"],
        )?;

        let throttles_total = IntCounterVec::new(
            Opts::new(
                "llm_balancer_throttles_total",
                "Times a backend was throttled after exhausting retries",
            ),
            &["backend"],
        )?;

        // Alert on sustained increments: every backend is failing at once.
        let total_throttle_resets = IntCounter::with_opts(Opts::new(
            "llm_balancer_total_throttle_resets_total",
            "Times every backend was throttled and the throttle state was rebuilt",
        ))?;

        // Platforms that do not report a metric contribute nothing.
        let tokens_total = IntCounterVec::new(
            Opts::new(
                "llm_balancer_tokens_total",
                "Platform-reported tokens by backend and direction",
            ),
            &["backend", "direction"],
        )?;

        let comparison_iterations_total = IntCounterVec::new(
            Opts::new(
                "llm_balancer_comparison_iterations_total",
                "Comparison iterations by backend and outcome",
            ),
            &["backend", "outcome"],
        )?;

        registry.register(Box::new(dispatches_total.clone()))?;
        registry.register(Box::new(dispatch_duration.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(throttles_total.clone()))?;
        registry.register(Box::new(total_throttle_resets.clone()))?;
        registry.register(Box::new(tokens_total.clone()))?;
        registry.register(Box::new(comparison_iterations_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            dispatches_total,
            dispatch_duration,
            retries_total,
            throttles_total,
            total_throttle_resets,
            tokens_total,
            comparison_iterations_total,
        })
    }

    /// Record a completed dispatch and its latency
    ///
    /// # Errors
    ///
    /// Returns an error if `elapsed_seconds` is NaN, infinite or negative, since
    /// such values corrupt histogram percentiles.
    pub fn record_dispatch(
        &self,
        backend: &str,
        outcome: DispatchOutcome,
        elapsed_seconds: f64,
    ) -> Result<(), prometheus::Error> {
        if !elapsed_seconds.is_finite() || elapsed_seconds < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite and non-negative, got: {}",
                elapsed_seconds
            )));
        }

        self.dispatches_total
            .get_metric_with_label_values(&[backend, outcome.as_str()])?
            .inc();
        self.dispatch_duration
            .get_metric_with_label_values(&[backend])?
            .observe(elapsed_seconds);
        Ok(())
    }

    pub fn record_retry(&self, backend: &str) {
        self.retries_total.with_label_values(&[backend]).inc();
    }

    pub fn record_throttle(&self, backend: &str) {
        self.throttles_total.with_label_values(&[backend]).inc();
    }

    pub fn record_total_throttle_reset(&self) {
        self.total_throttle_resets.inc();
    }

    pub fn record_tokens(&self, backend: &str, input_tokens: u64, output_tokens: u64) {
        self.tokens_total
            .with_label_values(&[backend, "input"])
            .inc_by(input_tokens);
        self.tokens_total
            .with_label_values(&[backend, "output"])
            .inc_by(output_tokens);
    }

    pub fn record_comparison_iteration(&self, backend: &str, outcome: IterationOutcome) {
        self.comparison_iterations_total
            .with_label_values(&[backend, outcome.as_str()])
            .inc();
    }

    /// Current value of the retry counter for one backend
    pub fn retries_for(&self, backend: &str) -> u64 {
        self.retries_total.with_label_values(&[backend]).get()
    }

    /// Current value of the throttle counter for one backend
    pub fn throttles_for(&self, backend: &str) -> u64 {
        self.throttles_total.with_label_values(&[backend]).get()
    }

    pub fn total_throttle_resets(&self) -> u64 {
        self.total_throttle_resets.get()
    }

    /// Encode every metric in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();

        tracing::debug!(
            metric_family_count = metric_families.len(),
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Metrics output is not valid UTF-8: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_dispatch_renders_labels() {
        let metrics = Metrics::new().expect("Failed to create test metrics");

        metrics
            .record_dispatch("titan", DispatchOutcome::Success, 0.4)
            .expect("Test operation should succeed");
        metrics
            .record_dispatch("gemini", DispatchOutcome::Throttled, 2.0)
            .expect("Test operation should succeed");

        let output = metrics.render().expect("Failed to render test metrics");
        assert!(output.contains("# TYPE llm_balancer_dispatches_total counter"));
        assert!(output.contains("backend=\"titan\""));
        assert!(output.contains("outcome=\"throttled\""));
        assert!(output.contains("llm_balancer_dispatch_duration_seconds_bucket"));
    }

    #[test]
    fn test_record_dispatch_rejects_invalid_durations() {
        let metrics = Metrics::new().expect("Failed to create test metrics");

        for bad in [f64::NAN, f64::INFINITY, -1.0] {
            assert!(
                metrics
                    .record_dispatch("titan", DispatchOutcome::Success, bad)
                    .is_err(),
                "{} should be rejected",
                bad
            );
        }
        assert!(
            metrics
                .record_dispatch("titan", DispatchOutcome::Success, 0.0)
                .is_ok()
        );
    }

    #[test]
    fn test_counters_accumulate_per_backend() {
        let metrics = Metrics::new().expect("Failed to create test metrics");

        metrics.record_retry("a");
        metrics.record_retry("a");
        metrics.record_retry("b");
        metrics.record_throttle("a");
        metrics.record_total_throttle_reset();

        assert_eq!(metrics.retries_for("a"), 2);
        assert_eq!(metrics.retries_for("b"), 1);
        assert_eq!(metrics.throttles_for("a"), 1);
        assert_eq!(metrics.throttles_for("b"), 0);
        assert_eq!(metrics.total_throttle_resets(), 1);
    }

    #[test]
    fn test_tokens_split_by_direction() {
        let metrics = Metrics::new().expect("Failed to create test metrics");
        metrics.record_tokens("a", 120, 30);
        metrics.record_comparison_iteration("a", IterationOutcome::Error);

        let output = metrics.render().expect("Failed to render test metrics");
        assert!(output.contains("llm_balancer_tokens_total{backend=\"a\",direction=\"input\"} 120"));
        assert!(output.contains("llm_balancer_tokens_total{backend=\"a\",direction=\"output\"} 30"));
        assert!(output.contains("llm_balancer_comparison_iterations_total"));
    }

    #[test]
    fn test_metrics_clones_share_registry() {
        let metrics = Metrics::new().expect("Failed to create test metrics");
        let cloned = metrics.clone();
        metrics.record_throttle("a");
        assert_eq!(cloned.throttles_for("a"), 1);
    }
}
