/// Tests for the retry loop of a single dispatch
///
/// Verifies retry counting, retry events and the two throttle policies once a
/// backend exhausts `max_retries_on_failure`.
mod common;

use common::{ScriptedFactory, config_with, record};
use llm_loadbalancer::dispatch::{Dispatcher, ThrottlePolicy};
use llm_loadbalancer::error::AppError;
use llm_loadbalancer::events::{DispatchEvent, EventKind};

/// SCENARIO: Backend fails twice, then answers; max 3 attempts
///
/// EXPECTED: Response returned with retry_count 2, two retry events with
/// zero-based attempts 0 and 1, no throttle
#[tokio::test]
async fn test_recovers_after_failures_and_reports_retry_count() {
    let factory = ScriptedFactory::new();
    factory.fail_then_ok("a", 2, "finally");
    let dispatcher = Dispatcher::builder(config_with(3, 0.0, &[("a", 1.0)]))
        .connector_factory(factory.clone())
        .build()
        .expect("dispatcher should build");
    let retries = record(dispatcher.events(), EventKind::Retry);
    let throttles = record(dispatcher.events(), EventKind::Throttled);

    let outcome = dispatcher.run_single_prompt("question").await.unwrap();

    assert_eq!(outcome.response.content, "finally");
    assert_eq!(outcome.stats.retry_count, 2);
    assert_eq!(outcome.stats.model_name, "a");
    assert_eq!(outcome.stats.hosting_platform, "openai");
    assert_eq!(factory.calls("a"), 3);

    let attempts: Vec<usize> = retries
        .lock()
        .unwrap()
        .iter()
        .map(|e| match e {
            DispatchEvent::Retry { attempt, .. } => *attempt,
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
    assert_eq!(attempts, vec![0, 1]);
    assert!(throttles.lock().unwrap().is_empty());
    assert!(
        !dispatcher
            .throttle_snapshot()
            .await
            .unwrap()
            .get(&"a".into())
            .unwrap()
            .is_throttled()
    );
}

/// SCENARIO: Registry [A], max 2, A fails twice then would succeed, notify policy
///
/// EXPECTED: throttled event for A, retry_count 2, empty response, A throttled
#[tokio::test]
async fn test_exhaustion_with_notify_policy_fires_throttled_event() {
    let factory = ScriptedFactory::new();
    factory.fail_then_ok("a", 2, "too late");
    let dispatcher = Dispatcher::builder(config_with(2, 0.0, &[("a", 1.0)]))
        .connector_factory(factory.clone())
        .build()
        .unwrap();
    let retries = record(dispatcher.events(), EventKind::Retry);
    let throttles = record(dispatcher.events(), EventKind::Throttled);

    let outcome = dispatcher
        .run_single_prompt_with("question", ThrottlePolicy::Notify)
        .await
        .unwrap();

    assert_eq!(outcome.stats.retry_count, 2);
    assert!(outcome.response.content.is_empty());
    assert_eq!(outcome.stats.total_input_tokens, 0);
    assert_eq!(outcome.stats.total_output_tokens, 0);
    assert_eq!(retries.lock().unwrap().len(), 2);

    let throttles = throttles.lock().unwrap();
    assert_eq!(throttles.len(), 1);
    assert_eq!(
        throttles[0],
        DispatchEvent::Throttled {
            backend: "a".into()
        }
    );

    let snapshot = dispatcher.throttle_snapshot().await.unwrap();
    let record = snapshot.get(&"a".into()).unwrap();
    assert!(record.is_throttled());
    assert!(record.last_throttled_at() > 0);
}

/// SCENARIO: Backend always fails under the default (fail) policy
///
/// EXPECTED: BackendThrottled error, backend throttled, no throttled event
#[tokio::test]
async fn test_exhaustion_with_fail_policy_returns_error() {
    let factory = ScriptedFactory::new();
    factory.always_fail("a");
    let dispatcher = Dispatcher::builder(config_with(3, 0.0, &[("a", 1.0)]))
        .connector_factory(factory.clone())
        .build()
        .unwrap();
    let throttles = record(dispatcher.events(), EventKind::Throttled);

    let err = dispatcher.run_single_prompt("question").await.unwrap_err();

    assert!(
        matches!(err, AppError::BackendThrottled { ref backend, attempts: 3 } if backend == "a"),
        "got: {:?}",
        err
    );
    assert!(throttles.lock().unwrap().is_empty());
    assert_eq!(dispatcher.metrics().throttles_for("a"), 1);
    assert_eq!(dispatcher.metrics().retries_for("a"), 3);
}

/// SCENARIO: max_retries_on_failure = 0 with a failing connector
///
/// EXPECTED: Connector never called, retry_count 0, no retry event, throttled
#[tokio::test]
async fn test_zero_retries_throttles_immediately() {
    let factory = ScriptedFactory::new();
    factory.always_fail("a");
    let dispatcher = Dispatcher::builder(config_with(0, 0.0, &[("a", 1.0)]))
        .connector_factory(factory.clone())
        .build()
        .unwrap();
    let retries = record(dispatcher.events(), EventKind::Retry);
    let throttles = record(dispatcher.events(), EventKind::Throttled);

    let outcome = dispatcher
        .run_single_prompt_with("question", ThrottlePolicy::Notify)
        .await
        .unwrap();

    assert_eq!(outcome.stats.retry_count, 0);
    assert_eq!(factory.calls("a"), 0);
    assert!(retries.lock().unwrap().is_empty());
    assert_eq!(throttles.lock().unwrap().len(), 1);
}

/// SCENARIO: Selected backend has no connector available
///
/// EXPECTED: Factory error propagates untouched, nothing is throttled
#[tokio::test]
async fn test_connector_resolution_failure_propagates() {
    let factory = ScriptedFactory::new();
    let dispatcher = Dispatcher::builder(config_with(3, 0.0, &[("unscripted", 1.0)]))
        .connector_factory(factory)
        .build()
        .unwrap();

    let err = dispatcher.run_single_prompt("question").await.unwrap_err();
    assert!(matches!(err, AppError::UnknownBackend(ref name) if name == "unscripted"));
    assert!(
        !dispatcher
            .throttle_snapshot()
            .await
            .unwrap()
            .get(&"unscripted".into())
            .unwrap()
            .is_throttled()
    );
}

/// SCENARIO: Successful dispatch
///
/// EXPECTED: Token counts from the connector appear in the stats report and metrics
#[tokio::test]
async fn test_stats_report_carries_connector_tokens() {
    let factory = ScriptedFactory::new();
    factory.always_ok("a", "hello");
    let dispatcher = Dispatcher::builder(config_with(1, 0.0, &[("a", 1.0)]))
        .connector_factory(factory)
        .build()
        .unwrap();

    let outcome = dispatcher.run_single_prompt("hi").await.unwrap();
    assert_eq!(outcome.stats.total_input_tokens, common::INPUT_TOKENS);
    assert_eq!(outcome.stats.total_output_tokens, common::OUTPUT_TOKENS);

    let rendered = dispatcher.metrics().render().unwrap();
    assert!(rendered.contains("llm_balancer_dispatches_total{backend=\"a\",outcome=\"success\"} 1"));
}
