//! Work-counter drain loop.
//!
//! Any number of threads may ask for a drain. The one that moves the counter
//! off zero becomes the owner and runs passes; everyone else just bumps the
//! counter and returns. After each pass the owner subtracts the count it has
//! observed, and runs again if anything arrived meanwhile. Notifications
//! therefore collapse into a bounded number of serialized passes, and a
//! notification arriving mid-pass always causes one more pass.

use std::{
  ops::ControlFlow,
  sync::atomic::{AtomicUsize, Ordering},
};

/// Counter of owed drain passes. Zero iff no pass is logically owed.
#[derive(Debug, Default)]
pub struct WorkCounter(AtomicUsize);

impl WorkCounter {
  pub const fn new() -> Self { Self(AtomicUsize::new(0)) }

  /// Registers a request for a pass. Returns `true` if the caller became the
  /// owner and must now run the loop.
  #[inline]
  pub fn enter(&self) -> bool { self.0.fetch_add(1, Ordering::AcqRel) == 0 }

  /// Takes ownership only if nobody is draining. Used by fast paths that want
  /// to deliver directly instead of queueing.
  #[inline]
  pub fn try_enter_exclusive(&self) -> bool {
    self.0.load(Ordering::Relaxed) == 0
      && self.0.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed).is_ok()
  }

  /// Gives back `missed` observed requests. Returns how many are still owed;
  /// the owner must run another pass unless this is zero.
  #[inline]
  pub fn leave(&self, missed: usize) -> usize { self.0.fetch_sub(missed, Ordering::AcqRel) - missed }

  #[inline]
  pub fn is_idle(&self) -> bool { self.0.load(Ordering::Acquire) == 0 }
}

/// A [`WorkCounter`] packaged with the canonical owner loop.
#[derive(Debug, Default)]
pub struct DrainLoop {
  work: WorkCounter,
}

impl DrainLoop {
  pub const fn new() -> Self { Self { work: WorkCounter::new() } }

  pub fn work(&self) -> &WorkCounter { &self.work }

  /// Requests a pass. If no pass is running, the calling thread runs `pass`
  /// until no request is owed; otherwise the running owner will pick this
  /// request up. Returns whether the caller became the owner.
  ///
  /// A pass returning `Break` keeps the counter raised forever: the
  /// coordinator has terminated and no pass may ever run again.
  pub fn schedule<F>(&self, pass: F) -> bool
  where
    F: FnMut() -> ControlFlow<()>,
  {
    if !self.work.enter() {
      return false;
    }
    self.run_owned(pass);
    true
  }

  /// Runs the loop for a caller that already owns the counter with one
  /// observed request.
  pub fn run_owned<F>(&self, mut pass: F)
  where
    F: FnMut() -> ControlFlow<()>,
  {
    let mut missed = 1;
    loop {
      if pass().is_break() {
        return;
      }
      missed = self.work.leave(missed);
      if missed == 0 {
        break;
      }
    }
  }
}
