//! Publisher traits and the operator entry points.
//!
//! A [`Publisher`] accepts subscribers; a [`ParallelPublisher`] accepts one
//! subscriber per rail. Operators are reached through the extension
//! traits [`PublisherExt`] and [`ParallelPublisherExt`].

use std::sync::Arc;

use crate::{
  diagnostics::DiagnosticsRef,
  ops::{
    into_stream::IntoStream,
    join::{JoinConfig, JoinOp},
    retry::{RetryConfig, RetryOp},
    skip_until::SkipUntilOp,
    subscribe_on::SubscribeOnThread,
  },
  subscriber::{BoxedSubscriber, FnSubscriber, Subscriber},
};

/// A source of values that honours demand.
///
/// `subscribe` takes `&self` so the same publisher can be subscribed again,
/// which is what `retry` relies on.
pub trait Publisher<Item, Err> {
  fn subscribe(&self, subscriber: BoxedSubscriber<Item, Err>);
}

impl<P, Item, Err> Publisher<Item, Err> for Arc<P>
where
  P: Publisher<Item, Err> + ?Sized,
{
  #[inline]
  fn subscribe(&self, subscriber: BoxedSubscriber<Item, Err>) { (**self).subscribe(subscriber) }
}

impl<P, Item, Err> Publisher<Item, Err> for Box<P>
where
  P: Publisher<Item, Err> + ?Sized,
{
  #[inline]
  fn subscribe(&self, subscriber: BoxedSubscriber<Item, Err>) { (**self).subscribe(subscriber) }
}

pub type BoxedPublisher<Item, Err> = Box<dyn Publisher<Item, Err> + Send + Sync>;

/// A publisher made of independent rails, each subscribed separately.
pub trait ParallelPublisher<Item, Err> {
  fn parallelism(&self) -> usize;

  /// Subscribes one subscriber per rail. `subscribers.len()` must equal
  /// [`parallelism`](Self::parallelism).
  fn subscribe_rails(&self, subscribers: Vec<BoxedSubscriber<Item, Err>>);
}

impl<P, Item, Err> ParallelPublisher<Item, Err> for Arc<P>
where
  P: ParallelPublisher<Item, Err> + ?Sized,
{
  fn parallelism(&self) -> usize { (**self).parallelism() }

  fn subscribe_rails(&self, subscribers: Vec<BoxedSubscriber<Item, Err>>) {
    (**self).subscribe_rails(subscribers)
  }
}

/// Operators over any [`Publisher`].
///
/// Each publisher type opts in with an empty `impl PublisherExt for ... {}`.
/// The item and error types are method parameters rather than trait
/// parameters, so sources that are generic over their error type stay usable
/// until the pipeline is finally subscribed.
pub trait PublisherExt: Sized {
  /// Subscribes a concrete subscriber, boxing it.
  fn subscribe_with<Item, Err, S>(&self, subscriber: S)
  where
    Self: Publisher<Item, Err>,
    S: Subscriber<Item, Err> + Send + 'static,
  {
    self.subscribe(Box::new(subscriber))
  }

  /// Subscribes a closure with unbounded demand.
  fn subscribe_fn<Item, Err, F>(&self, next: F)
  where
    Self: Publisher<Item, Err>,
    F: FnMut(Item) + Send + 'static,
    Err: Send + 'static,
  {
    self.subscribe(Box::new(FnSubscriber::new(next)))
  }

  /// Erases the publisher type, e.g. to mix sources in one collection.
  fn box_it<Item, Err>(self) -> BoxedPublisher<Item, Err>
  where
    Self: Publisher<Item, Err> + Send + Sync + 'static,
  {
    Box::new(self)
  }

  /// Drops values until `other` signals its first value or completes.
  ///
  /// ```
  /// use rxflow::{prelude::*, testing::TestSubscriber};
  ///
  /// let out = TestSubscriber::<i32, FlowError>::new();
  /// source::from_iter(vec![1, 2, 3])
  ///   .skip_until(source::empty::<()>())
  ///   .subscribe_with(out.clone());
  /// assert_eq!(out.values(), vec![1, 2, 3]);
  /// ```
  fn skip_until<O, U>(self, other: O) -> SkipUntilOp<Self, O, U> {
    SkipUntilOp::new(self, other, None)
  }

  fn skip_until_with<O, U>(self, other: O, diagnostics: DiagnosticsRef) -> SkipUntilOp<Self, O, U> {
    SkipUntilOp::new(self, other, Some(diagnostics))
  }

  /// Resubscribes on error, at most `times` times.
  fn retry(self, times: u64) -> RetryOp<Self> { RetryOp::new(self, RetryConfig::new().times(times)) }

  /// Resubscribes on every error.
  fn retry_forever(self) -> RetryOp<Self> { RetryOp::new(self, RetryConfig::new().forever()) }

  fn retry_with(self, config: RetryConfig) -> RetryOp<Self> { RetryOp::new(self, config) }

  /// Subscribes to `self` on a freshly spawned thread.
  fn subscribe_on_thread(self) -> SubscribeOnThread<Self> { SubscribeOnThread::new(self) }

  /// Consumes the publisher as a `futures::Stream`.
  fn into_stream<Item, Err>(self) -> IntoStream<Item, Err>
  where
    Self: Publisher<Item, Err>,
    Item: Send + 'static,
    Err: Send + 'static,
  {
    IntoStream::new(&self, IntoStream::<Item, Err>::DEFAULT_BATCH)
  }

  /// Like [`into_stream`](Self::into_stream), requesting `batch` values at a
  /// time.
  fn into_stream_batched<Item, Err>(self, batch: u64) -> IntoStream<Item, Err>
  where
    Self: Publisher<Item, Err>,
    Item: Send + 'static,
    Err: Send + 'static,
  {
    IntoStream::new(&self, batch)
  }
}

impl<Item, Err> PublisherExt for BoxedPublisher<Item, Err> {}

impl<P: ?Sized> PublisherExt for Arc<P> {}

/// Operators over any [`ParallelPublisher`]. Opted into per type, like
/// [`PublisherExt`].
pub trait ParallelPublisherExt: Sized {
  /// Merges all rails into one sequence, fairly and without ordering.
  fn join(self) -> JoinOp<Self> { JoinOp::new(self, JoinConfig::default()) }

  fn join_with(self, config: JoinConfig) -> JoinOp<Self> { JoinOp::new(self, config) }
}
