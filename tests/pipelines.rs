//! Integration tests for rxflow
//!
//! Exercises operator chains across threads: many rails emitting
//! concurrently, cancellation racing emission, and retries inside a join.

use std::{
  collections::HashSet,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
  time::Duration,
};

use rxflow::{
  prelude::*,
  testing::{RecordingDiagnostics, TestSubscriber},
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn threaded_rails(
  rails: i64,
  per_rail: i64,
) -> impl ParallelPublisher<i64, FlowError> + ParallelPublisherExt {
  source::rails(
    (0..rails)
      .map(|r| source::from_iter(r * per_rail..(r + 1) * per_rail).subscribe_on_thread())
      .collect(),
  )
}

#[test]
fn join_delivers_every_value_from_concurrent_rails_exactly_once() {
  const RAILS: i64 = 8;
  const PER_RAIL: i64 = 10_000;

  let out = TestSubscriber::<i64, FlowError>::new();
  threaded_rails(RAILS, PER_RAIL)
    .join_with(JoinConfig::new().prefetch(64))
    .subscribe_with(out.clone());

  assert!(out.await_terminal(TIMEOUT));
  assert_eq!(out.completions(), 1);
  assert!(out.errors().is_empty());
  assert_eq!(out.overlaps(), 0);

  let values = out.values();
  let unique: HashSet<_> = values.iter().copied().collect();
  assert_eq!(values.len(), (RAILS * PER_RAIL) as usize);
  assert_eq!(unique.len(), values.len());
}

#[test]
fn join_keeps_per_rail_order_under_concurrency() {
  const PER_RAIL: i64 = 5_000;

  let out = TestSubscriber::<i64, FlowError>::new();
  threaded_rails(4, PER_RAIL).join().subscribe_with(out.clone());
  assert!(out.await_terminal(TIMEOUT));

  let values = out.values();
  for rail in 0..4 {
    let seen: Vec<_> = values.iter().copied().filter(|v| v / PER_RAIL == rail).collect();
    assert!(seen.into_iter().eq(rail * PER_RAIL..(rail + 1) * PER_RAIL));
  }
}

#[test]
fn join_honours_demand_granted_in_small_steps() {
  const TOTAL: usize = 4 * 1_000;

  let out = TestSubscriber::<i64, FlowError>::with_request(0);
  threaded_rails(4, 1_000)
    .join_with(JoinConfig::new().prefetch(16))
    .subscribe_with(out.clone());

  let mut granted = 0;
  while granted < TOTAL {
    out.request(7);
    granted = (granted + 7).min(TOTAL);
    assert!(out.await_values(granted, TIMEOUT));
    assert!(out.value_count() <= granted);
  }
  assert!(out.await_terminal(TIMEOUT));
  assert_eq!(out.value_count(), TOTAL);
  assert_eq!(out.overlaps(), 0);
}

#[test]
fn cancelling_an_endless_join_stops_delivery() {
  let out = TestSubscriber::<u64, FlowError>::with_request(100);
  let endless = (0..4).map(|r| source::from_iter(r * 1_000_000..).subscribe_on_thread());
  source::rails(endless.collect())
    .join()
    .subscribe_with(out.clone());

  assert!(out.await_values(100, TIMEOUT));
  out.cancel();
  out.request(100);
  std::thread::sleep(Duration::from_millis(50));
  assert_eq!(out.value_count(), 100);
  assert!(!out.is_terminated());
}

#[test]
fn bounded_join_with_a_misbehaving_rail_overflows() {
  let diagnostics = Arc::new(RecordingDiagnostics::default());
  let greedy = source::from_fn(|mut s: BoxedSubscriber<i32, FlowError>| {
    s.on_subscribe(EmptySubscription::shared());
    // Ignores demand entirely.
    for v in 0..10 {
      s.on_next(v);
    }
    s.on_complete();
  });

  let out = TestSubscriber::<i32, FlowError>::with_request(0);
  source::rails(vec![greedy])
    .join_with(JoinConfig::new().prefetch(4).bounded().diagnostics(diagnostics.clone()))
    .subscribe_with(out.clone());

  assert_eq!(out.errors(), vec![FlowError::Overflow(BufferOverflow { rail: 0, capacity: 4 })]);
  assert!(out.values().is_empty());
  assert!(diagnostics.dropped_count() > 0);
}

#[test]
fn retried_rails_recover_inside_a_join() {
  let attempts = Arc::new(AtomicUsize::new(0));
  let flaky_rail = |base: i32| {
    let attempts = attempts.clone();
    let failed = Arc::new(AtomicUsize::new(0));
    source::from_fn(move |mut s: BoxedSubscriber<i32, FlowError>| {
      attempts.fetch_add(1, Ordering::SeqCst);
      if failed.fetch_add(1, Ordering::SeqCst) == 0 {
        s.on_subscribe(EmptySubscription::shared());
        s.on_error("transient".into());
      } else {
        source::from_iter(base..base + 100).subscribe(s);
      }
    })
    .retry(2)
    .subscribe_on_thread()
  };

  let out = TestSubscriber::<i32, FlowError>::new();
  source::rails(vec![flaky_rail(0), flaky_rail(100), flaky_rail(200)])
    .join()
    .subscribe_with(out.clone());

  assert!(out.await_terminal(TIMEOUT));
  let mut values = out.values();
  values.sort_unstable();
  assert!(values.into_iter().eq(0..300));
  assert_eq!(attempts.load(Ordering::SeqCst), 6);
}

#[test]
fn retry_gives_up_after_budget() {
  let attempts = Arc::new(AtomicUsize::new(0));
  let always_failing = {
    let attempts = attempts.clone();
    source::from_fn(move |mut s: BoxedSubscriber<i32, FlowError>| {
      attempts.fetch_add(1, Ordering::SeqCst);
      s.on_subscribe(EmptySubscription::shared());
      s.on_error("down".into());
    })
  };

  let out = TestSubscriber::new();
  always_failing.retry(5).subscribe_with(out.clone());
  assert_eq!(attempts.load(Ordering::SeqCst), 6);
  assert_eq!(out.errors(), vec![FlowError::Upstream("down".into())]);
}

#[test]
fn skip_until_passes_everything_from_a_threaded_source_once_open() {
  let out = TestSubscriber::<i32, FlowError>::new();
  source::from_iter(0..10_000)
    .subscribe_on_thread()
    .skip_until(source::just(()))
    .subscribe_with(out.clone());

  assert!(out.await_terminal(TIMEOUT));
  assert!(out.values().into_iter().eq(0..10_000));
  assert_eq!(out.overlaps(), 0);
}

#[test]
fn skip_until_failing_gate_ends_the_pipeline() {
  let out = TestSubscriber::<i32, FlowError>::new();
  source::from_iter(0..10)
    .skip_until(source::fail::<(), _>(FlowError::from("gate broke")))
    .subscribe_with(out.clone());

  assert!(out.values().is_empty());
  assert_eq!(out.errors(), vec![FlowError::Upstream("gate broke".into())]);
}
