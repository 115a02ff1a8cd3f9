//! Serializing emitter.
//!
//! [`SerializedSubscriber`] lets several threads signal one downstream
//! subscriber at the same time. Whoever wins the work counter delivers; a
//! caller that loses the race enqueues its signal and returns, and the winner
//! flushes the queue before giving up ownership. The downstream therefore
//! sees one call at a time, in queue order, with:
//!
//! - `on_subscribe` before anything else;
//! - exactly one terminal signal, after which nothing is delivered.
//!
//! Signals rejected because a terminal was already committed go to the
//! diagnostics sink.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Mutex, OnceLock,
};

use crossbeam_queue::SegQueue;

use crate::{
  diagnostics::{DiagnosticsRef, DroppedSignal, ProtocolViolation},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::SubscriptionRef,
  sync::{lock, WorkCounter},
};

enum Signal<T, E> {
  Next(T),
  Error(E),
  Complete,
}

struct Downstream<T, E> {
  actual: Option<BoxedSubscriber<T, E>>,
  subscribed: bool,
}

pub struct SerializedSubscriber<T, E> {
  work: WorkCounter,
  queue: SegQueue<Signal<T, E>>,
  terminated: AtomicBool,
  subscription: OnceLock<SubscriptionRef>,
  downstream: Mutex<Downstream<T, E>>,
  diagnostics: DiagnosticsRef,
}

impl<T, E> SerializedSubscriber<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  pub fn new(actual: BoxedSubscriber<T, E>, diagnostics: DiagnosticsRef) -> Self {
    Self {
      work: WorkCounter::new(),
      queue: SegQueue::new(),
      terminated: AtomicBool::new(false),
      subscription: OnceLock::new(),
      downstream: Mutex::new(Downstream { actual: Some(actual), subscribed: false }),
      diagnostics,
    }
  }

  /// Hands the subscription to the downstream. Signals committed before this
  /// are held back until it has been delivered.
  pub fn set_subscription(&self, subscription: SubscriptionRef) {
    if let Err(duplicate) = self.subscription.set(subscription) {
      duplicate.cancel();
      self.diagnostics.protocol_violation(ProtocolViolation::DuplicateSubscription);
      return;
    }
    self.drain();
  }

  pub fn next(&self, value: T) {
    if self.terminated.load(Ordering::Acquire) {
      self.diagnostics.signal_dropped(DroppedSignal::next(value));
      return;
    }
    // Fast path: nobody is delivering and nothing is queued ahead of us.
    if self.subscription.get().is_some() && self.work.try_enter_exclusive() {
      if self.queue.is_empty() {
        let mut guard = lock(&self.downstream);
        let downstream = &mut *guard;
        match downstream.actual.as_mut() {
          Some(actual) if downstream.subscribed => actual.on_next(value),
          _ => self.queue.push(Signal::Next(value)),
        }
      } else {
        self.queue.push(Signal::Next(value));
      }
      if self.work.leave(1) == 0 {
        return;
      }
      self.drain_loop();
      return;
    }
    self.queue.push(Signal::Next(value));
    self.drain();
  }

  pub fn error(&self, err: E) {
    if self.terminated.swap(true, Ordering::AcqRel) {
      self.diagnostics.signal_dropped(DroppedSignal::error(err));
      return;
    }
    self.queue.push(Signal::Error(err));
    self.drain();
  }

  pub fn complete(&self) {
    if self.terminated.swap(true, Ordering::AcqRel) {
      self.diagnostics.signal_dropped(DroppedSignal::Complete);
      return;
    }
    self.queue.push(Signal::Complete);
    self.drain();
  }

  /// Whether a terminal signal has been committed.
  #[inline]
  pub fn is_terminated(&self) -> bool { self.terminated.load(Ordering::Acquire) }

  fn drain(&self) {
    if self.work.enter() {
      self.drain_loop();
    }
  }

  fn drain_loop(&self) {
    let mut missed = 1;
    loop {
      self.flush();
      missed = self.work.leave(missed);
      if missed == 0 {
        break;
      }
    }
  }

  fn flush(&self) {
    let mut guard = lock(&self.downstream);
    let downstream = &mut *guard;
    if !downstream.subscribed {
      let Some(subscription) = self.subscription.get() else { return };
      downstream.subscribed = true;
      if let Some(actual) = downstream.actual.as_mut() {
        actual.on_subscribe(subscription.clone());
      }
    }

    while let Some(signal) = self.queue.pop() {
      match signal {
        Signal::Next(value) => match downstream.actual.as_mut() {
          Some(actual) => actual.on_next(value),
          None => self.diagnostics.signal_dropped(DroppedSignal::next(value)),
        },
        Signal::Error(err) => match downstream.actual.take() {
          Some(actual) => actual.on_error(err),
          None => self.diagnostics.signal_dropped(DroppedSignal::error(err)),
        },
        Signal::Complete => match downstream.actual.take() {
          Some(actual) => actual.on_complete(),
          None => self.diagnostics.signal_dropped(DroppedSignal::Complete),
        },
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{Arc, Barrier},
    thread,
  };

  use super::*;
  use crate::{
    subscription::EmptySubscription,
    testing::{RecordingDiagnostics, TestSubscriber},
  };

  fn serialized(
    recorder: &TestSubscriber<usize, &'static str>,
  ) -> (Arc<SerializedSubscriber<usize, &'static str>>, Arc<RecordingDiagnostics>) {
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    let s = SerializedSubscriber::new(Box::new(recorder.clone()), diagnostics.clone());
    (Arc::new(s), diagnostics)
  }

  #[test]
  fn signals_before_subscribe_wait_for_it() {
    let recorder = TestSubscriber::new();
    let (s, _) = serialized(&recorder);
    s.next(1);
    s.complete();
    assert_eq!(recorder.subscriptions(), 0);
    assert!(recorder.values().is_empty());

    s.set_subscription(EmptySubscription::shared());
    assert_eq!(recorder.subscriptions(), 1);
    assert_eq!(recorder.values(), vec![1]);
    assert_eq!(recorder.completions(), 1);
  }

  #[test]
  fn only_first_terminal_is_delivered() {
    let recorder = TestSubscriber::new();
    let (s, diagnostics) = serialized(&recorder);
    s.set_subscription(EmptySubscription::shared());
    s.error("boom");
    s.complete();
    s.next(7);
    s.error("again");

    assert_eq!(recorder.errors(), vec!["boom"]);
    assert_eq!(recorder.completions(), 0);
    assert!(recorder.values().is_empty());
    assert_eq!(diagnostics.dropped_count(), 3);
    assert_eq!(diagnostics.dropped_errors::<&str>(), vec!["again"]);
  }

  #[test]
  fn second_subscription_is_rejected() {
    let recorder = TestSubscriber::new();
    let (s, diagnostics) = serialized(&recorder);
    s.set_subscription(EmptySubscription::shared());
    s.set_subscription(EmptySubscription::shared());
    assert_eq!(recorder.subscriptions(), 1);
    assert_eq!(diagnostics.violations(), vec![ProtocolViolation::DuplicateSubscription]);
  }

  #[test]
  fn concurrent_producers_never_overlap() {
    const THREADS: usize = 6;
    const PER_THREAD: usize = 5_000;

    let recorder = TestSubscriber::new();
    let (s, _) = serialized(&recorder);
    s.set_subscription(EmptySubscription::shared());

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
      .map(|t| {
        let (s, barrier) = (s.clone(), barrier.clone());
        thread::spawn(move || {
          barrier.wait();
          for i in 0..PER_THREAD {
            s.next(t * PER_THREAD + i);
          }
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    s.complete();

    let mut values = recorder.values();
    assert_eq!(recorder.overlaps(), 0);
    assert_eq!(values.len(), THREADS * PER_THREAD);
    values.sort_unstable();
    assert!(values.iter().copied().eq(0..THREADS * PER_THREAD));
    assert_eq!(recorder.completions(), 1);
  }

  #[test]
  fn racing_terminals_deliver_exactly_one() {
    for _ in 0..100 {
      let recorder = TestSubscriber::new();
      let (s, _) = serialized(&recorder);
      s.set_subscription(EmptySubscription::shared());
      let barrier = Arc::new(Barrier::new(2));
      let a = {
        let (s, barrier) = (s.clone(), barrier.clone());
        thread::spawn(move || {
          barrier.wait();
          s.error("boom");
        })
      };
      let b = {
        let (s, barrier) = (s.clone(), barrier.clone());
        thread::spawn(move || {
          barrier.wait();
          s.complete();
        })
      };
      a.join().unwrap();
      b.join().unwrap();
      assert_eq!(recorder.errors().len() + recorder.completions(), 1);
    }
  }
}
