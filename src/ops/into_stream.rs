//! IntoStream operator
//!
//! Consumes a publisher as a [`futures::Stream`] of `Result<T, E>`. Demand is
//! requested in batches and topped up after three quarters of a batch has
//! been polled, so a slow consumer holds at most one batch in memory.
//!
//! ```
//! use futures::{executor::block_on, StreamExt};
//! use rxflow::prelude::*;
//!
//! let stream = source::from_iter(1..=3).into_stream();
//! let values: Vec<Result<i32, FlowError>> = block_on(stream.collect());
//! assert_eq!(values, vec![Ok(1), Ok(2), Ok(3)]);
//! ```
//!
//! Dropping the stream cancels the subscription.

use std::{
  pin::Pin,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
  },
  task::{Context, Poll},
};

use crossbeam_queue::SegQueue;
use futures::{task::AtomicWaker, Stream};

use crate::{
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{SubscriptionRef, UNBOUNDED},
};

struct StreamShared<T, E> {
  queue: SegQueue<Result<T, E>>,
  done: AtomicBool,
  waker: AtomicWaker,
  subscription: OnceLock<SubscriptionRef>,
}

/// A `Stream` yielding `Ok` for every value and a final `Err` if the
/// publisher fails. It ends after the error or on completion.
pub struct IntoStream<T, E> {
  shared: Arc<StreamShared<T, E>>,
  batch: u64,
  limit: u64,
  consumed: u64,
}

impl<T, E> IntoStream<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  pub const DEFAULT_BATCH: u64 = 128;

  /// Subscribes to `publisher`, requesting `batch` values at a time.
  /// [`UNBOUNDED`] requests everything at once.
  pub fn new<P>(publisher: &P, batch: u64) -> Self
  where
    P: Publisher<T, E> + ?Sized,
  {
    let batch = batch.max(1);
    let shared = Arc::new(StreamShared {
      queue: SegQueue::new(),
      done: AtomicBool::new(false),
      waker: AtomicWaker::new(),
      subscription: OnceLock::new(),
    });
    publisher.subscribe(Box::new(StreamSubscriber { shared: shared.clone(), batch }));
    Self { shared, batch, limit: batch - (batch >> 2), consumed: 0 }
  }
}

impl<T, E> IntoStream<T, E> {
  fn pop(&mut self) -> Option<Result<T, E>> {
    let item = self.shared.queue.pop()?;
    if item.is_ok() && self.batch != UNBOUNDED {
      self.consumed += 1;
      if self.consumed >= self.limit {
        if let Some(s) = self.shared.subscription.get() {
          s.request(self.consumed);
        }
        self.consumed = 0;
      }
    }
    Some(item)
  }
}

impl<T, E> Stream for IntoStream<T, E> {
  type Item = Result<T, E>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    if let Some(item) = this.pop() {
      return Poll::Ready(Some(item));
    }
    this.shared.waker.register(cx.waker());
    // Re-check after registering so a signal racing with registration is
    // not missed. `done` is set after the last push.
    let done = this.shared.done.load(Ordering::Acquire);
    match this.pop() {
      Some(item) => Poll::Ready(Some(item)),
      None if done => Poll::Ready(None),
      None => Poll::Pending,
    }
  }
}

impl<T, E> Drop for IntoStream<T, E> {
  fn drop(&mut self) {
    if let Some(s) = self.shared.subscription.get() {
      s.cancel();
    }
  }
}

struct StreamSubscriber<T, E> {
  shared: Arc<StreamShared<T, E>>,
  batch: u64,
}

impl<T, E> Subscriber<T, E> for StreamSubscriber<T, E> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    match self.shared.subscription.set(subscription.clone()) {
      Ok(()) => subscription.request(self.batch),
      Err(duplicate) => duplicate.cancel(),
    }
  }

  fn on_next(&mut self, value: T) {
    self.shared.queue.push(Ok(value));
    self.shared.waker.wake();
  }

  fn on_error(self, err: E) {
    self.shared.queue.push(Err(err));
    self.shared.done.store(true, Ordering::Release);
    self.shared.waker.wake();
  }

  fn on_complete(self) {
    self.shared.done.store(true, Ordering::Release);
    self.shared.waker.wake();
  }
}

#[cfg(test)]
mod tests {
  use futures::{executor::block_on, StreamExt};

  use super::*;
  use crate::{
    error::FlowError,
    ops::join::JoinConfig,
    publisher::{ParallelPublisherExt, PublisherExt},
    source,
    testing::TestPublisher,
  };

  #[tokio::test]
  async fn yields_values_then_ends() {
    let values: Vec<_> = source::from_iter(0..1_000)
      .into_stream_batched(16)
      .map(|r: Result<i32, FlowError>| r.unwrap())
      .collect()
      .await;
    assert!(values.into_iter().eq(0..1_000));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn receives_from_concurrent_rails() {
    let rails = source::rails(
      (0..4).map(|r| source::from_iter(r * 250..(r + 1) * 250).subscribe_on_thread()).collect(),
    );
    let mut values: Vec<i32> = rails
      .join_with(JoinConfig::new().prefetch(32))
      .into_stream()
      .map(|r: Result<i32, FlowError>| r.unwrap())
      .collect()
      .await;
    values.sort_unstable();
    assert!(values.into_iter().eq(0..1_000));
  }

  #[tokio::test]
  async fn error_is_the_last_item() {
    let items: Vec<Result<i32, &str>> = source::fail("boom").into_stream().collect().await;
    assert_eq!(items, vec![Err("boom")]);
  }

  #[test]
  fn tops_up_demand_after_three_quarters() {
    let upstream = TestPublisher::<i32, &str>::new();
    let mut stream = upstream.clone().into_stream_batched(4);
    assert_eq!(upstream.requested(), 4);
    for v in 0..4 {
      upstream.next(v);
    }
    assert_eq!(block_on(stream.next()), Some(Ok(0)));
    assert_eq!(block_on(stream.next()), Some(Ok(1)));
    assert_eq!(upstream.requested(), 4);
    assert_eq!(block_on(stream.next()), Some(Ok(2)));
    assert_eq!(upstream.requested(), 7);
  }

  #[test]
  fn drop_cancels_upstream() {
    let upstream = TestPublisher::<i32, &str>::new();
    let stream = upstream.clone().into_stream();
    assert!(!upstream.is_cancelled());
    drop(stream);
    assert!(upstream.is_cancelled());
  }
}
