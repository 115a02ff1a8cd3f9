//! Skip-until operator
//!
//! Suppresses values from the main publisher until the other publisher emits
//! its first value or completes. The gate opens once and stays open. While it
//! is closed every dropped main value is replaced with `request(1)`, so main
//! keeps flowing without buffering.
//!
//! Main and other may signal from different threads; everything reaching the
//! downstream goes through a [`SerializedSubscriber`].

use std::{
  marker::PhantomData,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use crate::{
  diagnostics::{self, DiagnosticsRef, DroppedSignal},
  publisher::{Publisher, PublisherExt},
  serialized::SerializedSubscriber,
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{
    validate_request, EmptySubscription, Subscription, SubscriptionRef, UNBOUNDED,
  },
  sync::AtomicSlot,
};

pub struct SkipUntilOp<S, O, U> {
  source: S,
  other: O,
  diagnostics: Option<DiagnosticsRef>,
  _marker: PhantomData<fn() -> U>,
}

impl<S: Clone, O: Clone, U> Clone for SkipUntilOp<S, O, U> {
  fn clone(&self) -> Self {
    Self {
      source: self.source.clone(),
      other: self.other.clone(),
      diagnostics: self.diagnostics.clone(),
      _marker: PhantomData,
    }
  }
}

impl<S, O, U> SkipUntilOp<S, O, U> {
  pub fn new(source: S, other: O, diagnostics: Option<DiagnosticsRef>) -> Self {
    Self { source, other, diagnostics, _marker: PhantomData }
  }
}

impl<S, O, U> PublisherExt for SkipUntilOp<S, O, U> {}

impl<S, O, T, U, E> Publisher<T, E> for SkipUntilOp<S, O, U>
where
  S: Publisher<T, E>,
  O: Publisher<U, E>,
  T: Send + 'static,
  U: 'static,
  E: Send + 'static,
{
  fn subscribe(&self, subscriber: BoxedSubscriber<T, E>) {
    let diagnostics = self.diagnostics.clone().unwrap_or_else(diagnostics::global);
    let gate = Arc::new(Gate {
      main: AtomicSlot::new(),
      other: AtomicSlot::new(),
      open: AtomicBool::new(false),
      subscribed: AtomicBool::new(false),
      actual: SerializedSubscriber::new(subscriber, diagnostics.clone()),
      diagnostics,
    });
    self.other.subscribe(Box::new(OtherSubscriber { gate: gate.clone() }));
    self.source.subscribe(Box::new(MainSubscriber { gate }));
  }
}

struct Gate<T, E> {
  main: AtomicSlot,
  other: AtomicSlot,
  open: AtomicBool,
  subscribed: AtomicBool,
  actual: SerializedSubscriber<T, E>,
  diagnostics: DiagnosticsRef,
}

impl<T, E> Gate<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  #[inline]
  fn is_open(&self) -> bool { self.open.load(Ordering::Acquire) }

  fn open(&self) {
    if !self.open.swap(true, Ordering::AcqRel) {
      self.other.cancel();
      tracing::debug!("skip_until gate opened");
    }
  }

  /// The downstream gets exactly one subscription, whichever path gets here
  /// first.
  fn subscribe_downstream(&self, subscription: SubscriptionRef) {
    if !self.subscribed.swap(true, Ordering::AcqRel) {
      self.actual.set_subscription(subscription);
    }
  }

  fn fail_from_other(&self, err: E) {
    self.main.cancel();
    self.subscribe_downstream(EmptySubscription::shared());
    self.actual.error(err);
  }
}

struct GateSubscription<T, E>(Arc<Gate<T, E>>);

impl<T, E> Subscription for GateSubscription<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  fn request(&self, n: u64) {
    if validate_request(n, &*self.0.diagnostics) {
      self.0.main.request(n);
    }
  }

  fn cancel(&self) {
    self.0.main.cancel();
    self.0.other.cancel();
  }
}

struct MainSubscriber<T, E> {
  gate: Arc<Gate<T, E>>,
}

impl<T, E> Subscriber<T, E> for MainSubscriber<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.gate.main.try_set(subscription, &*self.gate.diagnostics) {
      self.gate.subscribe_downstream(Arc::new(GateSubscription(self.gate.clone())));
    }
  }

  fn on_next(&mut self, value: T) {
    if self.gate.is_open() {
      self.gate.actual.next(value);
    } else {
      self.gate.main.request(1);
    }
  }

  fn on_error(self, err: E) {
    self.gate.other.cancel();
    self.gate.actual.error(err);
  }

  fn on_complete(self) {
    self.gate.other.cancel();
    self.gate.actual.complete();
  }
}

struct OtherSubscriber<T, E> {
  gate: Arc<Gate<T, E>>,
}

impl<T, U, E> Subscriber<U, E> for OtherSubscriber<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.gate.other.try_set(subscription.clone(), &*self.gate.diagnostics) {
      subscription.request(UNBOUNDED);
    }
  }

  fn on_next(&mut self, _value: U) { self.gate.open(); }

  fn on_error(self, err: E) {
    if self.gate.is_open() {
      self.gate.diagnostics.signal_dropped(DroppedSignal::error(err));
    } else {
      self.gate.fail_from_other(err);
    }
  }

  fn on_complete(self) { self.gate.open(); }
}
