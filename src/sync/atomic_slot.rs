use std::sync::{
  atomic::{AtomicU8, Ordering},
  OnceLock,
};

use crate::{
  diagnostics::{Diagnostics, ProtocolViolation},
  subscription::SubscriptionRef,
};

const EMPTY: u8 = 0;
const SETTING: u8 = 1;
const SET: u8 = 2;
const CANCELLED: u8 = 3;

/// Single-assignment holder for one upstream subscription.
///
/// Exactly one `try_set` ever wins. The cancelled state is terminal: a slot
/// cancelled before its subscription arrives cancels that subscription on
/// arrival.
#[derive(Debug, Default)]
pub struct AtomicSlot {
  state: AtomicU8,
  value: OnceLock<SubscriptionRef>,
}

impl AtomicSlot {
  pub const fn new() -> Self { Self { state: AtomicU8::new(EMPTY), value: OnceLock::new() } }

  /// Stores `subscription` if the slot is empty.
  ///
  /// On failure the incoming subscription is cancelled, and unless the slot
  /// was cancelled, a duplicate subscription is reported. A cancel racing with
  /// the store also makes this return `false`; the caller must then not
  /// request from `subscription`.
  pub fn try_set(&self, subscription: SubscriptionRef, diagnostics: &dyn Diagnostics) -> bool {
    match self.state.compare_exchange(EMPTY, SETTING, Ordering::AcqRel, Ordering::Acquire) {
      Ok(_) => {
        // Only the SETTING winner ever writes the cell.
        let _ = self.value.set(subscription.clone());
        if self.state.compare_exchange(SETTING, SET, Ordering::AcqRel, Ordering::Acquire).is_ok() {
          true
        } else {
          subscription.cancel();
          false
        }
      }
      Err(current) => {
        subscription.cancel();
        if current != CANCELLED {
          diagnostics.protocol_violation(ProtocolViolation::DuplicateSubscription);
        }
        false
      }
    }
  }

  /// The live subscription, if one is set and not cancelled.
  #[inline]
  pub fn get(&self) -> Option<&SubscriptionRef> {
    if self.state.load(Ordering::Acquire) == SET { self.value.get() } else { None }
  }

  #[inline]
  pub fn is_cancelled(&self) -> bool { self.state.load(Ordering::Acquire) == CANCELLED }

  /// Forwards a request to the live subscription, if any.
  #[inline]
  pub fn request(&self, n: u64) {
    if let Some(s) = self.get() {
      s.request(n);
    }
  }

  /// Moves the slot to the cancelled state and returns the subscription it
  /// held, without cancelling it. Later calls return `None`.
  pub fn get_and_cancel(&self) -> Option<SubscriptionRef> {
    if self.state.load(Ordering::Acquire) == CANCELLED {
      return None;
    }
    match self.state.swap(CANCELLED, Ordering::AcqRel) {
      SET => self.value.get().cloned(),
      _ => None,
    }
  }

  /// Cancels the slot and whatever it held. Idempotent.
  pub fn cancel(&self) {
    if let Some(s) = self.get_and_cancel() {
      s.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      atomic::{AtomicUsize, Ordering},
      Arc, Barrier,
    },
    thread,
  };

  use super::*;
  use crate::{subscription::Subscription, testing::RecordingDiagnostics};

  #[derive(Default)]
  struct Recorder {
    requested: AtomicUsize,
    cancelled: AtomicUsize,
  }

  impl Subscription for Recorder {
    fn request(&self, n: u64) { self.requested.fetch_add(n as usize, Ordering::SeqCst); }
    fn cancel(&self) { self.cancelled.fetch_add(1, Ordering::SeqCst); }
  }

  #[test]
  fn set_then_request() {
    let diagnostics = RecordingDiagnostics::default();
    let slot = AtomicSlot::new();
    let recorder = Arc::new(Recorder::default());
    assert!(slot.try_set(recorder.clone(), &diagnostics));
    slot.request(3);
    assert_eq!(recorder.requested.load(Ordering::SeqCst), 3);
    assert!(slot.get().is_some());
  }

  #[test]
  fn second_set_is_cancelled_and_reported() {
    let diagnostics = RecordingDiagnostics::default();
    let slot = AtomicSlot::new();
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    assert!(slot.try_set(first.clone(), &diagnostics));
    assert!(!slot.try_set(second.clone(), &diagnostics));
    assert_eq!(second.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(first.cancelled.load(Ordering::SeqCst), 0);
    assert_eq!(diagnostics.violations(), vec![ProtocolViolation::DuplicateSubscription]);
  }

  #[test]
  fn set_after_cancel_is_silent() {
    let diagnostics = RecordingDiagnostics::default();
    let slot = AtomicSlot::new();
    slot.cancel();
    let late = Arc::new(Recorder::default());
    assert!(!slot.try_set(late.clone(), &diagnostics));
    assert_eq!(late.cancelled.load(Ordering::SeqCst), 1);
    assert!(diagnostics.violations().is_empty());
  }

  #[test]
  fn cancel_is_idempotent() {
    let diagnostics = RecordingDiagnostics::default();
    let slot = AtomicSlot::new();
    let recorder = Arc::new(Recorder::default());
    slot.try_set(recorder.clone(), &diagnostics);
    slot.cancel();
    slot.cancel();
    assert_eq!(recorder.cancelled.load(Ordering::SeqCst), 1);
    assert!(slot.is_cancelled());
    assert!(slot.get().is_none());
    assert!(slot.get_and_cancel().is_none());
  }

  #[test]
  fn racing_sets_have_one_winner() {
    for _ in 0..200 {
      let diagnostics = Arc::new(RecordingDiagnostics::default());
      let slot = Arc::new(AtomicSlot::new());
      let barrier = Arc::new(Barrier::new(2));
      let recorders = [Arc::new(Recorder::default()), Arc::new(Recorder::default())];

      let handles: Vec<_> = recorders
        .iter()
        .cloned()
        .map(|recorder| {
          let (slot, barrier, diagnostics) = (slot.clone(), barrier.clone(), diagnostics.clone());
          thread::spawn(move || {
            barrier.wait();
            slot.try_set(recorder, &*diagnostics)
          })
        })
        .collect();
      let wins: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

      assert_eq!(wins.iter().filter(|w| **w).count(), 1);
      let cancelled: usize = recorders.iter().map(|p| p.cancelled.load(Ordering::SeqCst)).sum();
      assert_eq!(cancelled, 1);
      assert_eq!(diagnostics.violations(), vec![ProtocolViolation::DuplicateSubscription]);
    }
  }
}
