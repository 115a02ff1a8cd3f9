//! Subscription: the demand and cancellation half of the protocol.
//!
//! A [`Subscription`] is handed to a subscriber exactly once, through
//! `on_subscribe`. The subscriber uses it to grant demand with
//! [`request`](Subscription::request) and to stop the flow with
//! [`cancel`](Subscription::cancel). Both methods take `&self` because a
//! subscription is shared between the consumer thread and whatever thread the
//! producer happens to run on.

use std::{
  fmt::{Debug, Formatter},
  sync::Arc,
};

use crate::diagnostics::{Diagnostics, ProtocolViolation};

/// Demand value meaning "never constrain emission". Counters holding it are
/// never decremented.
pub const UNBOUNDED: u64 = u64::MAX;

/// Capability to request values from, or cancel, an upstream producer.
pub trait Subscription: Send + Sync {
  /// Grants `n` more values of demand. Demand is cumulative and saturates at
  /// [`UNBOUNDED`]. Zero is a protocol violation and is ignored.
  fn request(&self, n: u64);

  /// Asks the producer to stop. Idempotent; the producer may still deliver a
  /// few in-flight values but never another terminal signal.
  fn cancel(&self);
}

/// Shared handle to a subscription.
pub type SubscriptionRef = Arc<dyn Subscription>;

impl Debug for dyn Subscription {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str("dyn Subscription") }
}

impl<S: Subscription + ?Sized> Subscription for Arc<S> {
  #[inline]
  fn request(&self, n: u64) { (**self).request(n) }

  #[inline]
  fn cancel(&self) { (**self).cancel() }
}

impl<S: Subscription + ?Sized> Subscription for Box<S> {
  #[inline]
  fn request(&self, n: u64) { (**self).request(n) }

  #[inline]
  fn cancel(&self) { (**self).cancel() }
}

/// A subscription that does nothing.
///
/// Given to subscribers that must be terminated before any upstream exists,
/// so that `on_subscribe` still precedes the terminal signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySubscription;

impl EmptySubscription {
  pub fn shared() -> SubscriptionRef { Arc::new(EmptySubscription) }
}

impl Subscription for EmptySubscription {
  fn request(&self, _n: u64) {}

  fn cancel(&self) {}
}

/// Checks a request amount, reporting zero as a protocol violation.
///
/// Returns `true` when the amount may be applied.
#[inline]
pub fn validate_request(n: u64, diagnostics: &dyn Diagnostics) -> bool {
  if n == 0 {
    diagnostics.protocol_violation(ProtocolViolation::NonPositiveRequest(n));
    false
  } else {
    true
  }
}
