use std::sync::{
  atomic::{AtomicBool, AtomicU64, Ordering},
  Mutex,
};

use super::{lock, DemandCounter, WorkCounter};
use crate::{
  diagnostics::{DiagnosticsRef, ProtocolViolation},
  subscription::{validate_request, SubscriptionRef, UNBOUNDED},
};

/// Fronts a sequence of upstream subscriptions as a single subscription.
///
/// Downstream demand is tracked across switches: when a new upstream is
/// [`set`](Self::set), it receives whatever demand is still outstanding,
/// i.e. everything requested so far minus everything reported as
/// [`produced`](Self::produced). Requests, production reports, switches and
/// cancellation all funnel into one work-counter drain, so they may arrive
/// from any thread.
pub struct SubscriptionArbiter {
  work: WorkCounter,
  missed_requested: DemandCounter,
  missed_produced: AtomicU64,
  missed_subscription: Mutex<Option<SubscriptionRef>>,
  // Owner-only below.
  requested: AtomicU64,
  actual: Mutex<Option<SubscriptionRef>>,
  cancelled: AtomicBool,
  diagnostics: DiagnosticsRef,
}

impl SubscriptionArbiter {
  pub fn new(diagnostics: DiagnosticsRef) -> Self {
    Self {
      work: WorkCounter::new(),
      missed_requested: DemandCounter::new(),
      missed_produced: AtomicU64::new(0),
      missed_subscription: Mutex::new(None),
      requested: AtomicU64::new(0),
      actual: Mutex::new(None),
      cancelled: AtomicBool::new(false),
      diagnostics,
    }
  }

  pub fn request(&self, n: u64) {
    if validate_request(n, &*self.diagnostics) {
      self.missed_requested.add(n);
      self.drain();
    }
  }

  /// Reports `n` values delivered by the current upstream.
  pub fn produced(&self, n: u64) {
    if n != 0 {
      self.missed_produced.fetch_add(n, Ordering::AcqRel);
      self.drain();
    }
  }

  /// Switches to a new upstream. The previous one is assumed finished and is
  /// not cancelled.
  pub fn set(&self, subscription: SubscriptionRef) {
    if self.is_cancelled() {
      subscription.cancel();
      return;
    }
    *lock(&self.missed_subscription) = Some(subscription);
    self.drain();
  }

  pub fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      self.drain();
    }
  }

  #[inline]
  pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }

  /// Outstanding demand as of the last drain pass.
  pub fn requested(&self) -> u64 { self.requested.load(Ordering::Acquire) }

  fn drain(&self) {
    if !self.work.enter() {
      return;
    }

    let mut missed = 1;
    let mut request_amount = 0u64;
    let mut request_target: Option<SubscriptionRef> = None;
    loop {
      let incoming = lock(&self.missed_subscription).take();
      let mr = self.missed_requested.take();
      let mp = self.missed_produced.swap(0, Ordering::AcqRel);

      if self.is_cancelled() {
        let current = lock(&self.actual).take();
        if let Some(s) = current {
          s.cancel();
        }
        if let Some(s) = incoming {
          s.cancel();
        }
        request_amount = 0;
        request_target = None;
      } else {
        let mut r = self.requested.load(Ordering::Relaxed);
        if r != UNBOUNDED {
          let total = r.saturating_add(mr);
          r = if total == UNBOUNDED {
            total
          } else if let Some(left) = total.checked_sub(mp) {
            left
          } else {
            self.diagnostics.protocol_violation(ProtocolViolation::ProducedMoreThanRequested {
              requested: total,
              produced: mp,
            });
            0
          };
          self.requested.store(r, Ordering::Release);
        }

        let mut actual = lock(&self.actual);
        if let Some(s) = incoming {
          *actual = Some(s.clone());
          request_amount = r;
          request_target = if r != 0 { Some(s) } else { None };
        } else if mr != 0 {
          if let Some(s) = actual.as_ref() {
            request_amount = request_amount.saturating_add(mr);
            request_target = Some(s.clone());
          }
        }
      }

      missed = self.work.leave(missed);
      if missed == 0 {
        break;
      }
    }

    if let Some(target) = request_target {
      if request_amount != 0 {
        target.request(request_amount);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicU64, AtomicUsize},
    Arc,
  };

  use super::*;
  use crate::{subscription::Subscription, testing::RecordingDiagnostics};

  #[derive(Default)]
  struct Recorder {
    requested: AtomicU64,
    cancelled: AtomicUsize,
  }

  impl Subscription for Recorder {
    fn request(&self, n: u64) {
      let _ = self.requested.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| {
        Some(r.saturating_add(n))
      });
    }
    fn cancel(&self) { self.cancelled.fetch_add(1, Ordering::SeqCst); }
  }

  fn arbiter() -> (SubscriptionArbiter, Arc<RecordingDiagnostics>) {
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    (SubscriptionArbiter::new(diagnostics.clone()), diagnostics)
  }

  #[test]
  fn demand_before_upstream_is_replayed() {
    let (arbiter, _) = arbiter();
    arbiter.request(5);
    arbiter.request(2);
    let upstream = Arc::new(Recorder::default());
    arbiter.set(upstream.clone());
    assert_eq!(upstream.requested.load(Ordering::SeqCst), 7);
  }

  #[test]
  fn switch_reissues_outstanding_demand() {
    let (arbiter, _) = arbiter();
    let first = Arc::new(Recorder::default());
    arbiter.set(first.clone());
    arbiter.request(10);
    assert_eq!(first.requested.load(Ordering::SeqCst), 10);

    arbiter.produced(4);
    let second = Arc::new(Recorder::default());
    arbiter.set(second.clone());
    assert_eq!(second.requested.load(Ordering::SeqCst), 6);
    assert_eq!(arbiter.requested(), 6);
    assert_eq!(first.cancelled.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn unbounded_demand_survives_production() {
    let (arbiter, _) = arbiter();
    arbiter.request(UNBOUNDED);
    arbiter.produced(1_000);
    let upstream = Arc::new(Recorder::default());
    arbiter.set(upstream.clone());
    assert_eq!(upstream.requested.load(Ordering::SeqCst), UNBOUNDED);
  }

  #[test]
  fn over_production_is_reported() {
    let (arbiter, diagnostics) = arbiter();
    arbiter.request(1);
    arbiter.produced(3);
    assert_eq!(arbiter.requested(), 0);
    assert_eq!(
      diagnostics.violations(),
      vec![ProtocolViolation::ProducedMoreThanRequested { requested: 1, produced: 3 }]
    );
  }

  #[test]
  fn cancel_reaches_current_and_later_upstreams() {
    let (arbiter, _) = arbiter();
    let current = Arc::new(Recorder::default());
    arbiter.set(current.clone());
    arbiter.cancel();
    arbiter.cancel();
    assert_eq!(current.cancelled.load(Ordering::SeqCst), 1);

    let late = Arc::new(Recorder::default());
    arbiter.set(late.clone());
    assert_eq!(late.cancelled.load(Ordering::SeqCst), 1);
    arbiter.request(1);
    assert_eq!(late.requested.load(Ordering::SeqCst), 0);
  }
}
