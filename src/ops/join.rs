//! Join operator
//!
//! Merges the rails of a [`ParallelPublisher`] into one sequential publisher.
//! Values carry no ordering guarantee across rails; within a rail they keep
//! their order. Each rail is prefetched and replenished once three quarters
//! of its prefetch has been consumed, so fast rails cannot starve the others
//! and the downstream never sees more than it requested.
//!
//! ```
//! use rxflow::{prelude::*, testing::TestSubscriber};
//!
//! let rails = source::rails(vec![source::from_iter(0..3), source::from_iter(10..13)]);
//! let out = TestSubscriber::<i32, FlowError>::new();
//! rails.join().subscribe_with(out.clone());
//!
//! let mut values = out.values();
//! values.sort();
//! assert_eq!(values, vec![0, 1, 2, 10, 11, 12]);
//! assert_eq!(out.completions(), 1);
//! ```

use std::{
  ops::ControlFlow,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex, OnceLock,
  },
};

use crossbeam_queue::{ArrayQueue, SegQueue};
use smallvec::SmallVec;

use crate::{
  diagnostics::{self, DiagnosticsRef, DroppedSignal},
  error::BufferOverflow,
  publisher::{ParallelPublisher, Publisher, PublisherExt},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{validate_request, Subscription, SubscriptionRef},
  sync::{lock, AtomicSlot, DemandCounter, DrainLoop, ErrorSlot},
};

/// Prefetch used when none is configured.
pub const DEFAULT_PREFETCH: usize = 256;

/// How a rail buffers values the downstream has not asked for yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferPolicy {
  /// Grows as needed. A rail that ignores demand costs memory, not
  /// correctness.
  #[default]
  Unbounded,
  /// Holds at most `prefetch` values. A rail exceeding it fails the pipeline
  /// with [`BufferOverflow`].
  Bounded,
}

/// Configuration for [`JoinOp`].
///
/// ```
/// use rxflow::ops::join::{BufferPolicy, JoinConfig};
///
/// let config = JoinConfig::new().prefetch(64).bounded();
/// assert_eq!(config.prefetch_size(), 64);
/// assert_eq!(config.limit(), 48);
/// assert_eq!(config.policy(), BufferPolicy::Bounded);
/// ```
#[derive(Clone)]
pub struct JoinConfig {
  prefetch: usize,
  policy: BufferPolicy,
  diagnostics: Option<DiagnosticsRef>,
}

impl Default for JoinConfig {
  fn default() -> Self {
    Self { prefetch: DEFAULT_PREFETCH, policy: BufferPolicy::Unbounded, diagnostics: None }
  }
}

impl JoinConfig {
  pub fn new() -> Self { Self::default() }

  /// Values requested from each rail up front. Zero is treated as one.
  pub fn prefetch(mut self, prefetch: usize) -> Self {
    self.prefetch = prefetch.max(1);
    self
  }

  pub fn bounded(mut self) -> Self {
    self.policy = BufferPolicy::Bounded;
    self
  }

  pub fn unbounded(mut self) -> Self {
    self.policy = BufferPolicy::Unbounded;
    self
  }

  pub fn diagnostics(mut self, diagnostics: DiagnosticsRef) -> Self {
    self.diagnostics = Some(diagnostics);
    self
  }

  pub fn prefetch_size(&self) -> usize { self.prefetch }

  pub fn policy(&self) -> BufferPolicy { self.policy }

  /// Consumed values after which a rail is replenished.
  pub fn limit(&self) -> u64 {
    let prefetch = self.prefetch as u64;
    prefetch - (prefetch >> 2)
  }
}

#[derive(Clone)]
pub struct JoinOp<P> {
  source: P,
  config: JoinConfig,
}

impl<P> JoinOp<P> {
  pub fn new(source: P, config: JoinConfig) -> Self { Self { source, config } }
}

impl<P> PublisherExt for JoinOp<P> {}

impl<P, T, E> Publisher<T, E> for JoinOp<P>
where
  P: ParallelPublisher<T, E>,
  T: Send + 'static,
  E: From<BufferOverflow> + Send + 'static,
{
  fn subscribe(&self, subscriber: BoxedSubscriber<T, E>) {
    let parallelism = self.source.parallelism();
    let diagnostics = self.config.diagnostics.clone().unwrap_or_else(diagnostics::global);
    let shared = Arc::new(JoinShared::new(parallelism, &self.config, diagnostics));
    shared.start(subscriber);

    let rails = (0..parallelism)
      .map(|index| {
        Box::new(RailSubscriber { shared: shared.clone(), index }) as BoxedSubscriber<T, E>
      })
      .collect();
    self.source.subscribe_rails(rails);
  }
}

enum RailQueue<T> {
  Unbounded(SegQueue<T>),
  Bounded(ArrayQueue<T>),
}

impl<T> RailQueue<T> {
  fn push(&self, value: T) -> Result<(), T> {
    match self {
      RailQueue::Unbounded(q) => {
        q.push(value);
        Ok(())
      }
      RailQueue::Bounded(q) => q.push(value),
    }
  }

  fn pop(&self) -> Option<T> {
    match self {
      RailQueue::Unbounded(q) => q.pop(),
      RailQueue::Bounded(q) => q.pop(),
    }
  }

  fn is_empty(&self) -> bool {
    match self {
      RailQueue::Unbounded(q) => q.is_empty(),
      RailQueue::Bounded(q) => q.is_empty(),
    }
  }
}

struct Rail<T> {
  slot: AtomicSlot,
  // Created by the first value that has to wait.
  queue: OnceLock<RailQueue<T>>,
  // Owner-only: values taken from this rail since its last replenish.
  produced: AtomicU64,
  done: AtomicBool,
}

impl<T> Rail<T> {
  fn new() -> Self {
    Self {
      slot: AtomicSlot::new(),
      queue: OnceLock::new(),
      produced: AtomicU64::new(0),
      done: AtomicBool::new(false),
    }
  }

  fn poll(&self) -> Option<T> { self.queue.get()?.pop() }

  fn is_empty(&self) -> bool { self.queue.get().map_or(true, RailQueue::is_empty) }
}

struct JoinShared<T, E> {
  // Owner-only.
  actual: Mutex<Option<BoxedSubscriber<T, E>>>,
  rails: SmallVec<[Rail<T>; 4]>,
  drain: DrainLoop,
  requested: DemandCounter,
  error: ErrorSlot<E>,
  remaining: AtomicUsize,
  // Owner-only: the rail the next pass polls first.
  cursor: AtomicUsize,
  cancelled: AtomicBool,
  terminated: AtomicBool,
  prefetch: usize,
  limit: u64,
  policy: BufferPolicy,
  diagnostics: DiagnosticsRef,
}

impl<T, E> JoinShared<T, E>
where
  T: Send + 'static,
  E: From<BufferOverflow> + Send + 'static,
{
  fn new(parallelism: usize, config: &JoinConfig, diagnostics: DiagnosticsRef) -> Self {
    Self {
      actual: Mutex::new(None),
      rails: (0..parallelism).map(|_| Rail::new()).collect(),
      drain: DrainLoop::new(),
      requested: DemandCounter::new(),
      error: ErrorSlot::new(),
      remaining: AtomicUsize::new(parallelism),
      cursor: AtomicUsize::new(0),
      cancelled: AtomicBool::new(false),
      terminated: AtomicBool::new(false),
      prefetch: config.prefetch,
      limit: config.limit(),
      policy: config.policy,
      diagnostics,
    }
  }

  /// Delivers `on_subscribe` while owning the drain, so requests made from
  /// inside it are picked up by the first pass instead of recursing.
  fn start(self: &Arc<Self>, mut subscriber: BoxedSubscriber<T, E>) {
    let owner = self.drain.work().enter();
    debug_assert!(owner, "a fresh join is idle");
    subscriber.on_subscribe(Arc::new(JoinSubscription(self.clone())));
    *lock(&self.actual) = Some(subscriber);
    self.drain.run_owned(|| self.pass());
  }

  fn on_subscribe(&self, index: usize, subscription: SubscriptionRef) {
    if self.rails[index].slot.try_set(subscription.clone(), &*self.diagnostics) {
      subscription.request(self.prefetch as u64);
    }
  }

  fn on_next(&self, index: usize, value: T) {
    if self.terminated.load(Ordering::Acquire) {
      self.diagnostics.signal_dropped(DroppedSignal::next(value));
      return;
    }
    let rail = &self.rails[index];
    if self.drain.work().try_enter_exclusive() {
      let direct = self.requested.get() != 0
        && rail.is_empty()
        && !self.cancelled.load(Ordering::Acquire)
        && !self.error.is_set();
      if direct {
        if let Some(actual) = lock(&self.actual).as_mut() {
          actual.on_next(value);
        }
        self.requested.subtract(1);
        self.replenish(rail, 1);
      } else {
        self.offer(index, value);
      }
      if self.drain.work().leave(1) == 0 {
        return;
      }
    } else {
      self.offer(index, value);
      if !self.drain.work().enter() {
        return;
      }
    }
    self.drain.run_owned(|| self.pass());
  }

  fn on_error(&self, err: E) {
    if self.terminated.load(Ordering::Acquire) {
      self.diagnostics.signal_dropped(DroppedSignal::error(err));
      return;
    }
    match self.error.try_set(err) {
      Ok(()) => {
        self.cancel_rails();
        self.drain.schedule(|| self.pass());
        // A cancel holding the drain never runs another pass, so nobody else
        // will take the error.
        if self.cancelled.load(Ordering::Acquire) {
          if let Some(err) = self.error.terminate() {
            self.diagnostics.signal_dropped(DroppedSignal::error(err));
          }
        }
      }
      Err(err) => self.diagnostics.signal_dropped(DroppedSignal::error(err)),
    }
  }

  fn on_complete(&self, index: usize) {
    if !self.rails[index].done.swap(true, Ordering::AcqRel) {
      self.remaining.fetch_sub(1, Ordering::AcqRel);
    }
    self.drain.schedule(|| self.pass());
  }

  fn request(&self, n: u64) {
    if validate_request(n, &*self.diagnostics) {
      self.requested.add(n);
      self.drain.schedule(|| self.pass());
    }
  }

  fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    self.terminated.store(true, Ordering::Release);
    self.cancel_rails();
    // Idle: clean up now and keep the counter raised for good. Otherwise the
    // running pass sees the flag.
    if self.drain.work().enter() {
      self.clear_rails();
      lock(&self.actual).take();
    }
  }

  fn offer(&self, index: usize, value: T) {
    let rail = &self.rails[index];
    let queue = rail.queue.get_or_init(|| match self.policy {
      BufferPolicy::Unbounded => RailQueue::Unbounded(SegQueue::new()),
      BufferPolicy::Bounded => RailQueue::Bounded(ArrayQueue::new(self.prefetch)),
    });
    if let Err(value) = queue.push(value) {
      self.diagnostics.signal_dropped(DroppedSignal::next(value));
      self.on_error(E::from(BufferOverflow { rail: index, capacity: self.prefetch }));
    }
  }

  /// Owner-only.
  fn replenish(&self, rail: &Rail<T>, n: u64) {
    let produced = rail.produced.load(Ordering::Relaxed) + n;
    if produced >= self.limit {
      rail.produced.store(0, Ordering::Relaxed);
      rail.slot.request(produced);
    } else {
      rail.produced.store(produced, Ordering::Relaxed);
    }
  }

  fn cancel_rails(&self) {
    for rail in &self.rails {
      rail.slot.cancel();
    }
  }

  fn clear_rails(&self) {
    for rail in &self.rails {
      while let Some(value) = rail.poll() {
        self.diagnostics.signal_dropped(DroppedSignal::next(value));
      }
    }
  }

  fn is_drained(&self) -> bool {
    self.remaining.load(Ordering::Acquire) == 0 && self.rails.iter().all(Rail::is_empty)
  }

  fn pass(&self) -> ControlFlow<()> {
    let mut actual = lock(&self.actual);
    let requested = self.requested.get();
    let mut emitted = 0u64;
    let rails = self.rails.len();
    // Resume where the last pass stopped, so a rail that keeps refilling
    // cannot be served first every time.
    let mut index = self.cursor.load(Ordering::Relaxed);

    'emit: while emitted != requested {
      self.check_terminated(&mut actual)?;
      // Read before polling: a rail that finishes mid-round must still have
      // its last values taken on the next round.
      let done = self.remaining.load(Ordering::Acquire) == 0;
      let mut empty = true;
      for _ in 0..rails {
        let rail = &self.rails[index];
        index = (index + 1) % rails;
        let Some(value) = rail.poll() else { continue };
        empty = false;
        if let Some(a) = actual.as_mut() {
          a.on_next(value);
        }
        self.replenish(rail, 1);
        emitted += 1;
        if emitted == requested {
          break 'emit;
        }
      }
      if empty {
        if done {
          return self.complete(&mut actual);
        }
        break;
      }
    }
    self.cursor.store(index, Ordering::Relaxed);

    if emitted == requested {
      self.check_terminated(&mut actual)?;
      if self.is_drained() {
        return self.complete(&mut actual);
      }
    }

    if emitted != 0 {
      self.requested.subtract(emitted);
    }
    ControlFlow::Continue(())
  }

  fn check_terminated(&self, actual: &mut Option<BoxedSubscriber<T, E>>) -> ControlFlow<()> {
    if self.cancelled.load(Ordering::Acquire) {
      self.clear_rails();
      if let Some(err) = self.error.terminate() {
        self.diagnostics.signal_dropped(DroppedSignal::error(err));
      }
      actual.take();
      return ControlFlow::Break(());
    }
    if self.error.has_error() {
      self.terminated.store(true, Ordering::Release);
      self.clear_rails();
      if let (Some(err), Some(a)) = (self.error.terminate(), actual.take()) {
        tracing::debug!(rails = self.rails.len(), "join terminated with error");
        a.on_error(err);
      }
      return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
  }

  fn complete(&self, actual: &mut Option<BoxedSubscriber<T, E>>) -> ControlFlow<()> {
    self.terminated.store(true, Ordering::Release);
    if let Some(a) = actual.take() {
      tracing::trace!(rails = self.rails.len(), "join completed");
      a.on_complete();
    }
    ControlFlow::Break(())
  }
}

struct JoinSubscription<T, E>(Arc<JoinShared<T, E>>);

impl<T, E> Subscription for JoinSubscription<T, E>
where
  T: Send + 'static,
  E: From<BufferOverflow> + Send + 'static,
{
  fn request(&self, n: u64) { self.0.request(n) }

  fn cancel(&self) { self.0.cancel() }
}

struct RailSubscriber<T, E> {
  shared: Arc<JoinShared<T, E>>,
  index: usize,
}

impl<T, E> Subscriber<T, E> for RailSubscriber<T, E>
where
  T: Send + 'static,
  E: From<BufferOverflow> + Send + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.shared.on_subscribe(self.index, subscription)
  }

  fn on_next(&mut self, value: T) { self.shared.on_next(self.index, value) }

  fn on_error(self, err: E) { self.shared.on_error(err) }

  fn on_complete(self) { self.shared.on_complete(self.index) }
}
