//! Ready-made publishers.
//!
//! These are the leaves of a pipeline: they honour demand, complete or fail
//! on their own, and can be subscribed any number of times.

use std::{iter, marker::PhantomData};

use crate::{
  diagnostics::{self, DiagnosticsRef, ProtocolViolation},
  publisher::{ParallelPublisher, ParallelPublisherExt, Publisher, PublisherExt},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::EmptySubscription,
};

mod from_iter;
pub use from_iter::FromIter;

/// Emits the items of `iter`, as many as requested, then completes.
///
/// The iterable is cloned on every subscription. Completion is signalled as
/// soon as the iterator runs dry, without waiting for further demand.
///
/// ```
/// use rxflow::{prelude::*, testing::TestSubscriber};
///
/// let out = TestSubscriber::<i32, FlowError>::with_request(2);
/// source::from_iter(vec![1, 2, 3]).subscribe_with(out.clone());
/// assert_eq!(out.values(), vec![1, 2]);
///
/// out.request(1);
/// assert_eq!(out.values(), vec![1, 2, 3]);
/// assert_eq!(out.completions(), 1);
/// ```
pub fn from_iter<I>(iter: I) -> FromIter<I>
where
  I: IntoIterator + Clone,
{
  FromIter::new(iter)
}

/// Emits `value` once, then completes.
pub fn just<T: Clone>(value: T) -> FromIter<iter::Once<T>> { FromIter::new(iter::once(value)) }

/// Completes immediately.
pub fn empty<T>() -> Empty<T> { Empty(PhantomData) }

/// Fails immediately with a clone of `err`.
pub fn fail<T, E: Clone>(err: E) -> Fail<T, E> { Fail { err, _marker: PhantomData } }

/// A publisher backed by a closure that drives the subscriber by hand.
///
/// The closure is responsible for the whole protocol, including calling
/// `on_subscribe` first.
pub fn from_fn<F>(subscribe: F) -> FromFn<F> { FromFn(subscribe) }

/// Groups independent publishers into a parallel publisher, one rail each.
pub fn rails<P>(rails: Vec<P>) -> Rails<P> { Rails { rails, diagnostics: None } }

pub struct Empty<T>(PhantomData<fn() -> T>);

impl<T> Clone for Empty<T> {
  fn clone(&self) -> Self { Empty(PhantomData) }
}

impl<T> PublisherExt for Empty<T> {}

impl<T, E> Publisher<T, E> for Empty<T> {
  fn subscribe(&self, mut subscriber: BoxedSubscriber<T, E>) {
    subscriber.on_subscribe(EmptySubscription::shared());
    subscriber.on_complete();
  }
}

pub struct Fail<T, E> {
  err: E,
  _marker: PhantomData<fn() -> T>,
}

impl<T, E: Clone> Clone for Fail<T, E> {
  fn clone(&self) -> Self { Fail { err: self.err.clone(), _marker: PhantomData } }
}

impl<T, E> PublisherExt for Fail<T, E> {}

impl<T, E: Clone> Publisher<T, E> for Fail<T, E> {
  fn subscribe(&self, mut subscriber: BoxedSubscriber<T, E>) {
    subscriber.on_subscribe(EmptySubscription::shared());
    subscriber.on_error(self.err.clone());
  }
}

#[derive(Clone)]
pub struct FromFn<F>(F);

impl<F> PublisherExt for FromFn<F> {}

impl<F, T, E> Publisher<T, E> for FromFn<F>
where
  F: Fn(BoxedSubscriber<T, E>),
{
  #[inline]
  fn subscribe(&self, subscriber: BoxedSubscriber<T, E>) { (self.0)(subscriber) }
}

#[derive(Clone)]
pub struct Rails<P> {
  rails: Vec<P>,
  diagnostics: Option<DiagnosticsRef>,
}

impl<P> Rails<P> {
  /// Reports a subscriber count that does not match the rails to
  /// `diagnostics` instead of the global sink.
  pub fn with_diagnostics(mut self, diagnostics: DiagnosticsRef) -> Self {
    self.diagnostics = Some(diagnostics);
    self
  }
}

impl<P> ParallelPublisherExt for Rails<P> {}

impl<P, T, E> ParallelPublisher<T, E> for Rails<P>
where
  P: Publisher<T, E>,
{
  fn parallelism(&self) -> usize { self.rails.len() }

  fn subscribe_rails(&self, subscribers: Vec<BoxedSubscriber<T, E>>) {
    // Rails without a subscriber stay unsubscribed; surplus subscribers are
    // completed.
    if subscribers.len() != self.rails.len() {
      let diagnostics = self.diagnostics.clone().unwrap_or_else(diagnostics::global);
      diagnostics.protocol_violation(ProtocolViolation::RailCountMismatch {
        rails: self.rails.len(),
        subscribers: subscribers.len(),
      });
    }
    let mut subscribers = subscribers.into_iter();
    for (rail, subscriber) in self.rails.iter().zip(subscribers.by_ref()) {
      rail.subscribe(subscriber);
    }
    for mut surplus in subscribers {
      surplus.on_subscribe(EmptySubscription::shared());
      surplus.on_complete();
    }
  }
}
