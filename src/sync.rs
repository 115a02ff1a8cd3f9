//! Lock-free coordination primitives shared by every operator.
//!
//! | Type | Role |
//! |------|------|
//! | [`AtomicSlot`] | single-assignment subscription holder with a cancelled state |
//! | [`DemandCounter`] | saturating outstanding-demand counter |
//! | [`WorkCounter`] / [`DrainLoop`] | serializes concurrent drain requests onto one pass |
//! | [`ErrorSlot`] | first-wins terminal error holder |
//! | [`SubscriptionArbiter`] | switches between successive upstreams, carrying demand over |
//!
//! The few `Mutex`es used next to these primitives are only ever locked by
//! the thread that owns the work counter, so they are never contended and
//! never block.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod arbiter;
pub mod atomic_slot;
pub mod demand;
pub mod drain;
pub mod error_slot;

pub use arbiter::SubscriptionArbiter;
pub use atomic_slot::AtomicSlot;
pub use demand::DemandCounter;
pub use drain::{DrainLoop, WorkCounter};
pub use error_slot::ErrorSlot;

/// Locks an owner-only cell. A panic inside a previous owner's pass does not
/// make the data any less consistent than the atomics around it, so poisoning
/// is ignored.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
