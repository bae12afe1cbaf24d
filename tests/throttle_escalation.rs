/// Tests for throttle expiry, total-throttle reset and throttle-aware selection
mod common;

use common::{ManualClock, ScriptedFactory, config_with, record};
use llm_loadbalancer::dispatch::{Dispatcher, ThrottlePolicy};
use llm_loadbalancer::events::{DispatchEvent, EventKind};
use std::time::Duration;

const START_MS: u64 = 1_700_000_000_000;

/// SCENARIO: Both backends get throttled, then a third dispatch arrives
///
/// EXPECTED: Exactly one totally_throttled event carrying the configured
/// cooldown; the state is rebuilt and, after a success, every record is clear
#[tokio::test]
async fn test_all_throttled_resets_once_and_clears_every_record() {
    let factory = ScriptedFactory::new();
    factory.fail_then_ok("a", 1, "a ok");
    factory.fail_then_ok("b", 1, "b ok");
    let clock = ManualClock::starting_at(START_MS);
    let dispatcher = Dispatcher::builder(config_with(1, 0.0, &[("a", 1.0), ("b", 1.0)]))
        .connector_factory(factory.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    let total = record(dispatcher.events(), EventKind::TotallyThrottled);

    // Each backend fails its first call; the second dispatch can only pick the
    // backend that is still eligible.
    for _ in 0..2 {
        dispatcher
            .run_single_prompt_with("q", ThrottlePolicy::Notify)
            .await
            .unwrap();
    }
    let snapshot = dispatcher.throttle_snapshot().await.unwrap();
    assert!(snapshot.is_exhausted(), "both backends should be throttled");
    assert!(total.lock().unwrap().is_empty());

    let outcome = dispatcher.run_single_prompt("q").await.unwrap();
    assert!(outcome.response.content.ends_with("ok"));

    let total = total.lock().unwrap();
    assert_eq!(total.len(), 1);
    assert_eq!(
        total[0],
        DispatchEvent::TotallyThrottled {
            cooldown: Duration::from_secs(30)
        }
    );
    let snapshot = dispatcher.throttle_snapshot().await.unwrap();
    assert!(snapshot.iter().all(|(_, r)| !r.is_throttled()));
    assert_eq!(dispatcher.metrics().total_throttle_resets(), 1);
}

/// SCENARIO: Single backend throttled, clock moves past throttle_timeout
///
/// EXPECTED: The next dispatch expires the throttle instead of resetting
#[tokio::test]
async fn test_throttle_expires_after_timeout() {
    let factory = ScriptedFactory::new();
    factory.fail_then_ok("a", 1, "back");
    let clock = ManualClock::starting_at(START_MS);
    let dispatcher = Dispatcher::builder(config_with(1, 0.0, &[("a", 1.0)]))
        .connector_factory(factory.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    let total = record(dispatcher.events(), EventKind::TotallyThrottled);

    dispatcher
        .run_single_prompt_with("q", ThrottlePolicy::Notify)
        .await
        .unwrap();
    let record_a = dispatcher
        .throttle_snapshot()
        .await
        .unwrap()
        .get(&"a".into())
        .cloned()
        .unwrap();
    assert!(record_a.is_throttled());
    assert_eq!(record_a.last_throttled_at(), START_MS);

    clock.advance(Duration::from_secs(61));
    let outcome = dispatcher.run_single_prompt("q").await.unwrap();

    assert_eq!(outcome.response.content, "back");
    assert!(total.lock().unwrap().is_empty(), "expiry is not a total reset");
}

/// SCENARIO: Throttle timeout has not elapsed yet
///
/// EXPECTED: The single throttled backend forces a total reset
#[tokio::test]
async fn test_throttle_within_timeout_forces_reset() {
    let factory = ScriptedFactory::new();
    factory.fail_then_ok("a", 1, "back");
    let clock = ManualClock::starting_at(START_MS);
    let dispatcher = Dispatcher::builder(config_with(1, 0.0, &[("a", 1.0)]))
        .connector_factory(factory.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    let total = record(dispatcher.events(), EventKind::TotallyThrottled);

    dispatcher
        .run_single_prompt_with("q", ThrottlePolicy::Notify)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(59));
    dispatcher.run_single_prompt("q").await.unwrap();

    assert_eq!(total.lock().unwrap().len(), 1);
}

/// SCENARIO: A heavy backend keeps failing next to a healthy light one
///
/// EXPECTED: Once the heavy backend is throttled, every dispatch goes to the
/// light one despite the weights (regression: selection must skip throttled)
#[tokio::test]
async fn test_selection_skips_throttled_backends() {
    let factory = ScriptedFactory::new();
    factory.always_fail("heavy");
    factory.always_ok("light", "fine");
    let clock = ManualClock::starting_at(START_MS);
    let dispatcher = Dispatcher::builder(config_with(1, 0.0, &[("heavy", 100.0), ("light", 1.0)]))
        .connector_factory(factory.clone())
        .clock(clock)
        .build()
        .unwrap();

    let mut throttled = false;
    for _ in 0..200 {
        dispatcher
            .run_single_prompt_with("q", ThrottlePolicy::Notify)
            .await
            .unwrap();
        if dispatcher
            .throttle_snapshot()
            .await
            .unwrap()
            .get(&"heavy".into())
            .unwrap()
            .is_throttled()
        {
            throttled = true;
            break;
        }
    }
    assert!(throttled, "heavy backend should have been selected and throttled");

    let heavy_calls = factory.calls("heavy");
    for _ in 0..50 {
        let outcome = dispatcher.run_single_prompt("q").await.unwrap();
        assert_eq!(outcome.stats.model_name, "light");
    }
    assert_eq!(factory.calls("heavy"), heavy_calls);
}
