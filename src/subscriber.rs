//! Subscriber trait and implementations
//!
//! The Subscriber is the consumer side of the protocol. It receives exactly
//! one `on_subscribe`, then any number of `on_next` calls bounded by the
//! demand it granted, then at most one terminal signal.

use crate::{
  diagnostics::{self, DiagnosticsRef, DroppedSignal},
  subscription::{SubscriptionRef, UNBOUNDED},
};

// ============================================================================
// Subscriber Trait
// ============================================================================

/// Subscriber trait: the consumer of a [`Publisher`](crate::publisher::Publisher)
pub trait Subscriber<Item, Err> {
  /// Receives the subscription. Called once, before any other signal.
  fn on_subscribe(&mut self, subscription: SubscriptionRef);

  /// Receive the next value. Never called concurrently with itself.
  fn on_next(&mut self, value: Item);

  /// Handle an error from the publisher
  ///
  /// This consumes the subscriber, as no more signals can follow an error.
  fn on_error(self, err: Err);

  /// Handle completion of the publisher
  ///
  /// This consumes the subscriber, as no more signals can follow completion.
  fn on_complete(self);
}

// ============================================================================
// DynSubscriber Trait - Object-safe Subscriber
// ============================================================================

/// Helper trait to enable object-safe subscribers (`Box<dyn DynSubscriber>`)
///
/// `Subscriber` is not object-safe because its terminal methods take `self`
/// by value. `DynSubscriber` mirrors the interface with boxed receivers.
pub trait DynSubscriber<Item, Err> {
  fn box_subscribe(&mut self, subscription: SubscriptionRef);
  fn box_next(&mut self, value: Item);
  fn box_error(self: Box<Self>, err: Err);
  fn box_complete(self: Box<Self>);
}

impl<T, Item, Err> DynSubscriber<Item, Err> for T
where
  T: Subscriber<Item, Err>,
{
  fn box_subscribe(&mut self, subscription: SubscriptionRef) { self.on_subscribe(subscription); }
  fn box_next(&mut self, value: Item) { self.on_next(value); }
  fn box_error(self: Box<Self>, err: Err) { self.on_error(err); }
  fn box_complete(self: Box<Self>) { self.on_complete(); }
}

/// Boxed subscriber that can move between threads.
pub type BoxedSubscriber<Item, Err> = Box<dyn DynSubscriber<Item, Err> + Send>;

impl<Item, Err> Subscriber<Item, Err> for BoxedSubscriber<Item, Err> {
  #[inline]
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    (**self).box_subscribe(subscription)
  }

  #[inline]
  fn on_next(&mut self, value: Item) { (**self).box_next(value) }

  #[inline]
  fn on_error(self, err: Err) { self.box_error(err) }

  #[inline]
  fn on_complete(self) { self.box_complete() }
}

/// Option subscriber - None ignores all signals, Some delegates to inner
impl<S, Item, Err> Subscriber<Item, Err> for Option<S>
where
  S: Subscriber<Item, Err>,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if let Some(inner) = self {
      inner.on_subscribe(subscription);
    }
  }

  fn on_next(&mut self, value: Item) {
    if let Some(inner) = self {
      inner.on_next(value);
    }
  }

  fn on_error(self, err: Err) {
    if let Some(inner) = self {
      inner.on_error(err);
    }
  }

  fn on_complete(self) {
    if let Some(inner) = self {
      inner.on_complete();
    }
  }
}

// ============================================================================
// FnSubscriber - Closure adapter
// ============================================================================

/// Closure subscriber that requests unbounded demand.
///
/// The closure handles values. Completion is ignored; an error has nowhere to
/// go and is handed to the diagnostics sink as a dropped signal.
pub struct FnSubscriber<F> {
  next: F,
  diagnostics: DiagnosticsRef,
}

impl<F> FnSubscriber<F> {
  pub fn new(next: F) -> Self { Self { next, diagnostics: diagnostics::global() } }

  pub fn with_diagnostics(next: F, diagnostics: DiagnosticsRef) -> Self {
    Self { next, diagnostics }
  }
}

impl<F, Item, Err> Subscriber<Item, Err> for FnSubscriber<F>
where
  F: FnMut(Item),
  Err: Send + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) { subscription.request(UNBOUNDED); }

  #[inline]
  fn on_next(&mut self, value: Item) { (self.next)(value) }

  fn on_error(self, err: Err) { self.diagnostics.signal_dropped(DroppedSignal::error(err)); }

  fn on_complete(self) {}
}
