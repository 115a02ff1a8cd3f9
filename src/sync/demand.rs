use std::sync::atomic::{AtomicU64, Ordering};

use crate::subscription::UNBOUNDED;

/// Outstanding demand, saturating at [`UNBOUNDED`].
///
/// Consumers add through `request(n)`, producers subtract what they actually
/// emitted. Once unbounded, the counter stays unbounded.
#[derive(Debug, Default)]
pub struct DemandCounter(AtomicU64);

impl DemandCounter {
  pub const fn new() -> Self { Self(AtomicU64::new(0)) }

  #[inline]
  pub fn get(&self) -> u64 { self.0.load(Ordering::Acquire) }

  #[inline]
  pub fn is_unbounded(&self) -> bool { self.get() == UNBOUNDED }

  /// Adds `n`, clamping at [`UNBOUNDED`]. Returns the value before the add,
  /// so a caller seeing `0` knows it moved demand off zero.
  pub fn add(&self, n: u64) -> u64 {
    let mut current = self.0.load(Ordering::Acquire);
    loop {
      if current == UNBOUNDED {
        return UNBOUNDED;
      }
      let next = current.saturating_add(n);
      match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
        Ok(prev) => return prev,
        Err(actual) => current = actual,
      }
    }
  }

  /// Resets to zero, returning what was accumulated. Used for "missed"
  /// accumulators drained by a work-counter owner.
  #[inline]
  pub fn take(&self) -> u64 { self.0.swap(0, Ordering::AcqRel) }

  /// Subtracts `n` emitted values. Returns the value after the subtraction.
  ///
  /// An unbounded counter is left alone. Subtracting more than is
  /// outstanding clamps at zero; callers that care check with
  /// [`get`](Self::get) first.
  pub fn subtract(&self, n: u64) -> u64 {
    let mut current = self.0.load(Ordering::Acquire);
    loop {
      if current == UNBOUNDED {
        return UNBOUNDED;
      }
      let next = current.saturating_sub(n);
      match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => return next,
        Err(actual) => current = actual,
      }
    }
  }
}
