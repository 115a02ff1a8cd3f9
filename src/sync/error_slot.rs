use std::{
  hint,
  sync::{
    atomic::{AtomicU8, Ordering},
    Mutex,
  },
};

use super::lock;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const SET: u8 = 2;
const TERMINATED: u8 = 3;

/// Holds the first terminal error of a coordinator.
///
/// The first `try_set` wins by CAS; later errors are handed back so the
/// caller can report them as dropped. `terminate` hands the error to exactly
/// one drain pass.
#[derive(Debug)]
pub struct ErrorSlot<E> {
  state: AtomicU8,
  error: Mutex<Option<E>>,
}

impl<E> Default for ErrorSlot<E> {
  fn default() -> Self { Self::new() }
}

impl<E> ErrorSlot<E> {
  pub const fn new() -> Self { Self { state: AtomicU8::new(EMPTY), error: Mutex::new(None) } }

  /// Records `err` if no error was recorded yet, otherwise returns it.
  pub fn try_set(&self, err: E) -> Result<(), E> {
    if self.state.compare_exchange(EMPTY, WRITING, Ordering::AcqRel, Ordering::Acquire).is_err() {
      return Err(err);
    }
    *lock(&self.error) = Some(err);
    self.state.store(SET, Ordering::Release);
    Ok(())
  }

  /// Whether an error is recorded and not yet taken.
  #[inline]
  pub fn has_error(&self) -> bool { self.state.load(Ordering::Acquire) == SET }

  /// Whether an error was ever recorded, taken or not.
  #[inline]
  pub fn is_set(&self) -> bool { self.state.load(Ordering::Acquire) != EMPTY }

  /// Takes the recorded error. Returns it at most once over the slot's
  /// lifetime.
  pub fn terminate(&self) -> Option<E> {
    loop {
      match self.state.compare_exchange(SET, TERMINATED, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => return lock(&self.error).take(),
        // The winner is between its CAS and its store.
        Err(WRITING) => hint::spin_loop(),
        Err(_) => return None,
      }
    }
  }
}
