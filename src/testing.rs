//! Recording subscriber, hand-driven publisher and diagnostics sink for
//! tests.

use std::{
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, OnceLock,
  },
  thread,
  time::{Duration, Instant},
};

use crate::{
  diagnostics::{Diagnostics, DroppedSignal, ProtocolViolation},
  publisher::{Publisher, PublisherExt},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef, UNBOUNDED},
  sync::{lock, DemandCounter},
};

struct Record<T, E> {
  values: Vec<T>,
  errors: Vec<E>,
  completions: usize,
}

struct Recorder<T, E> {
  record: Mutex<Record<T, E>>,
  subscription: OnceLock<SubscriptionRef>,
  subscriptions: AtomicUsize,
  in_call: AtomicBool,
  overlaps: AtomicUsize,
  terminated: AtomicBool,
}

/// A subscriber that records every signal.
///
/// Clones share the same record, so one clone can be subscribed while the
/// test keeps another to inspect results, grant demand, or cancel. Calls
/// that overlap in time are counted in [`overlaps`](Self::overlaps).
pub struct TestSubscriber<T, E> {
  recorder: Arc<Recorder<T, E>>,
  initial_request: u64,
}

impl<T, E> Clone for TestSubscriber<T, E> {
  fn clone(&self) -> Self {
    Self { recorder: self.recorder.clone(), initial_request: self.initial_request }
  }
}

impl<T, E> Default for TestSubscriber<T, E> {
  fn default() -> Self { Self::new() }
}

impl<T, E> TestSubscriber<T, E> {
  /// Requests unbounded demand on subscribe.
  pub fn new() -> Self { Self::with_request(UNBOUNDED) }

  /// Requests `n` on subscribe; zero requests nothing.
  pub fn with_request(n: u64) -> Self {
    let recorder = Recorder {
      record: Mutex::new(Record { values: vec![], errors: vec![], completions: 0 }),
      subscription: OnceLock::new(),
      subscriptions: AtomicUsize::new(0),
      in_call: AtomicBool::new(false),
      overlaps: AtomicUsize::new(0),
      terminated: AtomicBool::new(false),
    };
    Self { recorder: Arc::new(recorder), initial_request: n }
  }

  pub fn request(&self, n: u64) {
    if let Some(s) = self.recorder.subscription.get() {
      s.request(n);
    }
  }

  pub fn cancel(&self) {
    if let Some(s) = self.recorder.subscription.get() {
      s.cancel();
    }
  }

  pub fn value_count(&self) -> usize { lock(&self.recorder.record).values.len() }

  pub fn completions(&self) -> usize { lock(&self.recorder.record).completions }

  pub fn subscriptions(&self) -> usize { self.recorder.subscriptions.load(Ordering::SeqCst) }

  pub fn overlaps(&self) -> usize { self.recorder.overlaps.load(Ordering::SeqCst) }

  pub fn is_terminated(&self) -> bool { self.recorder.terminated.load(Ordering::SeqCst) }

  /// Polls until a terminal signal arrives or `timeout` passes.
  pub fn await_terminal(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !self.is_terminated() {
      if Instant::now() >= deadline {
        return false;
      }
      thread::yield_now();
    }
    true
  }

  /// Polls until at least `n` values arrived or `timeout` passes.
  pub fn await_values(&self, n: usize, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while self.value_count() < n {
      if Instant::now() >= deadline {
        return false;
      }
      thread::yield_now();
    }
    true
  }

  fn enter(&self) {
    if self.recorder.in_call.swap(true, Ordering::SeqCst) {
      self.recorder.overlaps.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn exit(&self) { self.recorder.in_call.store(false, Ordering::SeqCst); }
}

impl<T: Clone, E> TestSubscriber<T, E> {
  pub fn values(&self) -> Vec<T> { lock(&self.recorder.record).values.clone() }
}

impl<T, E: Clone> TestSubscriber<T, E> {
  pub fn errors(&self) -> Vec<E> { lock(&self.recorder.record).errors.clone() }
}

impl<T, E> Subscriber<T, E> for TestSubscriber<T, E> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.recorder.subscriptions.fetch_add(1, Ordering::SeqCst);
    if let Err(duplicate) = self.recorder.subscription.set(subscription.clone()) {
      duplicate.cancel();
      return;
    }
    if self.initial_request != 0 {
      subscription.request(self.initial_request);
    }
  }

  fn on_next(&mut self, value: T) {
    self.enter();
    lock(&self.recorder.record).values.push(value);
    self.exit();
  }

  fn on_error(self, err: E) {
    self.enter();
    lock(&self.recorder.record).errors.push(err);
    self.recorder.terminated.store(true, Ordering::SeqCst);
    self.exit();
  }

  fn on_complete(self) {
    self.enter();
    lock(&self.recorder.record).completions += 1;
    self.recorder.terminated.store(true, Ordering::SeqCst);
    self.exit();
  }
}

#[derive(Default)]
struct Upstream {
  requested: DemandCounter,
  cancelled: AtomicBool,
}

impl Subscription for Upstream {
  fn request(&self, n: u64) { self.requested.add(n); }

  fn cancel(&self) { self.cancelled.store(true, Ordering::SeqCst); }
}

struct Source<T, E> {
  subscriber: Mutex<Option<BoxedSubscriber<T, E>>>,
  upstream: Mutex<Option<Arc<Upstream>>>,
  subscriptions: AtomicUsize,
}

/// A publisher driven by hand from the test body.
///
/// Each `subscribe` replaces the current subscriber. Signals are pushed with
/// [`next`](Self::next), [`error`](Self::error) and
/// [`complete`](Self::complete) regardless of demand or cancellation, so
/// tests can also play a misbehaving upstream.
pub struct TestPublisher<T, E> {
  source: Arc<Source<T, E>>,
}

impl<T, E> Clone for TestPublisher<T, E> {
  fn clone(&self) -> Self { Self { source: self.source.clone() } }
}

impl<T, E> Default for TestPublisher<T, E> {
  fn default() -> Self { Self::new() }
}

impl<T, E> TestPublisher<T, E> {
  pub fn new() -> Self {
    let source = Source {
      subscriber: Mutex::new(None),
      upstream: Mutex::new(None),
      subscriptions: AtomicUsize::new(0),
    };
    Self { source: Arc::new(source) }
  }

  pub fn next(&self, value: T) {
    let taken = lock(&self.source.subscriber).take();
    if let Some(mut subscriber) = taken {
      subscriber.on_next(value);
      let mut slot = lock(&self.source.subscriber);
      // Keep a subscriber installed meanwhile by a resubscription.
      if slot.is_none() {
        *slot = Some(subscriber);
      }
    }
  }

  pub fn error(&self, err: E) {
    let taken = lock(&self.source.subscriber).take();
    if let Some(subscriber) = taken {
      subscriber.on_error(err);
    }
  }

  pub fn complete(&self) {
    let taken = lock(&self.source.subscriber).take();
    if let Some(subscriber) = taken {
      subscriber.on_complete();
    }
  }

  pub fn subscriptions(&self) -> usize { self.source.subscriptions.load(Ordering::SeqCst) }

  /// Demand granted to the latest subscription.
  pub fn requested(&self) -> u64 {
    lock(&self.source.upstream).as_ref().map_or(0, |u| u.requested.get())
  }

  /// Whether the latest subscription was cancelled.
  pub fn is_cancelled(&self) -> bool {
    lock(&self.source.upstream).as_ref().map_or(false, |u| u.cancelled.load(Ordering::SeqCst))
  }
}

impl<T, E> PublisherExt for TestPublisher<T, E> {}

impl<T, E> Publisher<T, E> for TestPublisher<T, E> {
  fn subscribe(&self, mut subscriber: BoxedSubscriber<T, E>) {
    let upstream = Arc::new(Upstream::default());
    self.source.subscriptions.fetch_add(1, Ordering::SeqCst);
    *lock(&self.source.upstream) = Some(upstream.clone());
    subscriber.on_subscribe(upstream);
    *lock(&self.source.subscriber) = Some(subscriber);
  }
}

/// Diagnostics sink that keeps everything it is told.
#[derive(Default)]
pub struct RecordingDiagnostics {
  violations: Mutex<Vec<ProtocolViolation>>,
  dropped: Mutex<Vec<DroppedSignal>>,
}

impl RecordingDiagnostics {
  pub fn violations(&self) -> Vec<ProtocolViolation> { lock(&self.violations).clone() }

  pub fn dropped_count(&self) -> usize { lock(&self.dropped).len() }

  /// Dropped errors of type `E`, in drop order.
  pub fn dropped_errors<E: Clone + 'static>(&self) -> Vec<E> {
    lock(&self.dropped)
      .iter()
      .filter_map(|s| match s {
        DroppedSignal::Error(e) => e.downcast_ref::<E>().cloned(),
        _ => None,
      })
      .collect()
  }

  /// Dropped values of type `T`, in drop order.
  pub fn dropped_values<T: Clone + 'static>(&self) -> Vec<T> {
    lock(&self.dropped)
      .iter()
      .filter_map(|s| match s {
        DroppedSignal::Next(v) => v.downcast_ref::<T>().cloned(),
        _ => None,
      })
      .collect()
  }
}

impl Diagnostics for RecordingDiagnostics {
  fn protocol_violation(&self, violation: ProtocolViolation) {
    lock(&self.violations).push(violation);
  }

  fn signal_dropped(&self, signal: DroppedSignal) { lock(&self.dropped).push(signal); }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::subscription::EmptySubscription;

  #[test]
  fn publisher_records_demand_and_cancellation() {
    let upstream = TestPublisher::<i32, ()>::new();
    let out = TestSubscriber::with_request(3);
    upstream.subscribe_with(out.clone());
    assert_eq!(upstream.subscriptions(), 1);
    assert_eq!(upstream.requested(), 3);

    upstream.next(7);
    out.cancel();
    assert!(upstream.is_cancelled());
    assert_eq!(out.values(), vec![7]);
  }

  #[test]
  fn subscriber_cancels_a_second_subscription() {
    let second = TestPublisher::<i32, ()>::new();
    let mut out = TestSubscriber::<i32, ()>::new();
    out.on_subscribe(EmptySubscription::shared());
    second.subscribe(Box::new(out.clone()));
    assert_eq!(out.subscriptions(), 2);
    assert!(second.is_cancelled());
  }

  #[test]
  fn diagnostics_downcast_dropped_signals() {
    let sink = RecordingDiagnostics::default();
    sink.signal_dropped(DroppedSignal::next(1u8));
    sink.signal_dropped(DroppedSignal::error("late"));
    sink.protocol_violation(ProtocolViolation::NonPositiveRequest(0));
    assert_eq!(sink.dropped_count(), 2);
    assert_eq!(sink.dropped_values::<u8>(), vec![1]);
    assert_eq!(sink.dropped_errors::<&str>(), vec!["late"]);
    assert_eq!(sink.violations(), vec![ProtocolViolation::NonPositiveRequest(0)]);
  }
}
