//! Retry operator implementation
//!
//! Resubscribes to the source when it errors, up to a configured number of
//! times. Demand granted by the downstream carries over: each new attempt is
//! asked for what was requested minus what earlier attempts delivered.
//!
//! Resubscription runs on a work-counter loop. A source that errors inside
//! `subscribe` only bumps the counter, and the loop already running further
//! up the stack starts the next attempt, so even an unbounded retry of a
//! synchronously failing source runs in constant stack.
//!
//! ```
//! use std::sync::{
//!   atomic::{AtomicUsize, Ordering},
//!   Arc,
//! };
//!
//! use rxflow::{prelude::*, testing::TestSubscriber};
//!
//! let attempts = Arc::new(AtomicUsize::new(0));
//! let flaky = {
//!   let attempts = attempts.clone();
//!   source::from_fn(move |mut s: BoxedSubscriber<i32, FlowError>| {
//!     s.on_subscribe(EmptySubscription::shared());
//!     if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
//!       s.on_error("unavailable".into());
//!     } else {
//!       s.on_next(1);
//!       s.on_complete();
//!     }
//!   })
//! };
//!
//! let out = TestSubscriber::new();
//! flaky.retry(3).subscribe_with(out.clone());
//! assert_eq!(out.values(), vec![1]);
//! assert_eq!(attempts.load(Ordering::SeqCst), 3);
//! ```

use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc, Mutex,
};

use crate::{
  diagnostics::{self, DiagnosticsRef, DroppedSignal},
  publisher::{Publisher, PublisherExt},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef, UNBOUNDED},
  sync::{lock, SubscriptionArbiter, WorkCounter},
};

/// A configuration struct for retry.
///
/// ```
/// use rxflow::ops::retry::RetryConfig;
///
/// let config = RetryConfig::new().times(5).reset_on_success();
/// assert_eq!(config.retries(), Some(5));
/// assert_eq!(RetryConfig::new().forever().retries(), None);
/// ```
#[derive(Clone, Default)]
pub struct RetryConfig {
  times: u64,
  reset_on_success: bool,
  diagnostics: Option<DiagnosticsRef>,
}

impl RetryConfig {
  /// No retries: the first error goes downstream.
  pub fn new() -> Self { Self::default() }

  /// Allows `times` resubscriptions, i.e. at most `times + 1` attempts.
  pub fn times(mut self, times: u64) -> Self {
    self.times = times;
    self
  }

  pub fn forever(mut self) -> Self {
    self.times = UNBOUNDED;
    self
  }

  /// Restores the full retry budget whenever an attempt delivers a value.
  pub fn reset_on_success(mut self) -> Self {
    self.reset_on_success = true;
    self
  }

  pub fn diagnostics(mut self, diagnostics: DiagnosticsRef) -> Self {
    self.diagnostics = Some(diagnostics);
    self
  }

  /// Allowed resubscriptions, `None` meaning no limit.
  pub fn retries(&self) -> Option<u64> { (self.times != UNBOUNDED).then_some(self.times) }
}

#[derive(Clone)]
pub struct RetryOp<P> {
  source: P,
  config: RetryConfig,
}

impl<P> RetryOp<P> {
  pub fn new(source: P, config: RetryConfig) -> Self { Self { source, config } }
}

impl<P> PublisherExt for RetryOp<P> {}

impl<P, T, E> Publisher<T, E> for RetryOp<P>
where
  P: Publisher<T, E> + Clone + Send + Sync + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  fn subscribe(&self, mut subscriber: BoxedSubscriber<T, E>) {
    let diagnostics = self.config.diagnostics.clone().unwrap_or_else(diagnostics::global);
    let shared = Arc::new(RetryShared {
      source: self.source.clone(),
      arbiter: SubscriptionArbiter::new(diagnostics.clone()),
      work: WorkCounter::new(),
      budget: self.config.times,
      remaining: AtomicU64::new(self.config.times),
      reset_on_success: self.config.reset_on_success,
      produced: AtomicU64::new(0),
      parked: Mutex::new(None),
      diagnostics,
    });
    subscriber.on_subscribe(Arc::new(RetrySubscription(shared.clone())));
    *lock(&shared.parked) = Some(subscriber);
    shared.resubscribe();
  }
}

struct RetryShared<P, T, E> {
  source: P,
  arbiter: SubscriptionArbiter,
  work: WorkCounter,
  budget: u64,
  // Only the live attempt touches these two.
  remaining: AtomicU64,
  produced: AtomicU64,
  reset_on_success: bool,
  // The downstream between attempts.
  parked: Mutex<Option<BoxedSubscriber<T, E>>>,
  diagnostics: DiagnosticsRef,
}

impl<P, T, E> RetryShared<P, T, E>
where
  P: Publisher<T, E> + Clone + Send + Sync + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  fn resubscribe(self: &Arc<Self>) {
    if !self.work.enter() {
      return;
    }
    let mut missed = 1;
    loop {
      if self.arbiter.is_cancelled() {
        // Stays owned, so nothing is ever subscribed again.
        lock(&self.parked).take();
        return;
      }
      self.arbiter.produced(self.produced.swap(0, Ordering::AcqRel));
      let parked = lock(&self.parked).take();
      if let Some(actual) = parked {
        self.source.subscribe(Box::new(RetryAttempt { shared: self.clone(), actual }));
      }
      missed = self.work.leave(missed);
      if missed == 0 {
        break;
      }
    }
  }
}

struct RetrySubscription<P, T, E>(Arc<RetryShared<P, T, E>>);

impl<P, T, E> Subscription for RetrySubscription<P, T, E>
where
  P: Send + Sync,
  T: Send,
  E: Send,
{
  fn request(&self, n: u64) { self.0.arbiter.request(n) }

  fn cancel(&self) { self.0.arbiter.cancel() }
}

struct RetryAttempt<P, T, E> {
  shared: Arc<RetryShared<P, T, E>>,
  actual: BoxedSubscriber<T, E>,
}

impl<P, T, E> Subscriber<T, E> for RetryAttempt<P, T, E>
where
  P: Publisher<T, E> + Clone + Send + Sync + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.shared.arbiter.set(subscription)
  }

  fn on_next(&mut self, value: T) {
    self.shared.produced.fetch_add(1, Ordering::AcqRel);
    if self.shared.reset_on_success {
      self.shared.remaining.store(self.shared.budget, Ordering::Release);
    }
    self.actual.on_next(value);
  }

  fn on_error(self, err: E) {
    let Self { shared, actual } = self;
    if shared.arbiter.is_cancelled() {
      shared.diagnostics.signal_dropped(DroppedSignal::error(err));
      return;
    }
    let remaining = shared.remaining.load(Ordering::Acquire);
    if remaining == 0 {
      actual.on_error(err);
      return;
    }
    if remaining != UNBOUNDED {
      shared.remaining.store(remaining - 1, Ordering::Release);
    }
    tracing::trace!(remaining, "resubscribing after upstream error");
    *lock(&shared.parked) = Some(actual);
    shared.resubscribe();
  }

  fn on_complete(self) { self.actual.on_complete() }
}
