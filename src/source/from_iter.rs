use std::{
  iter::Peekable,
  ops::ControlFlow,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
  },
};

use crate::{
  diagnostics::{self, DiagnosticsRef},
  publisher::{Publisher, PublisherExt},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{validate_request, EmptySubscription, Subscription},
  sync::{lock, DemandCounter, DrainLoop},
};

/// Publisher over a cloneable iterable. See [`from_iter`](super::from_iter).
#[derive(Clone)]
pub struct FromIter<I> {
  iter: I,
  diagnostics: Option<DiagnosticsRef>,
}

impl<I> FromIter<I>
where
  I: IntoIterator + Clone,
{
  pub fn new(iter: I) -> Self { Self { iter, diagnostics: None } }

  pub fn with_diagnostics(iter: I, diagnostics: DiagnosticsRef) -> Self {
    Self { iter, diagnostics: Some(diagnostics) }
  }
}

impl<I> PublisherExt for FromIter<I> {}

impl<I, E> Publisher<I::Item, E> for FromIter<I>
where
  I: IntoIterator + Clone,
  I::IntoIter: Send + 'static,
  I::Item: Send + 'static,
  E: Send + 'static,
{
  fn subscribe(&self, mut subscriber: BoxedSubscriber<I::Item, E>) {
    let mut iter = self.iter.clone().into_iter().peekable();
    if iter.peek().is_none() {
      subscriber.on_subscribe(EmptySubscription::shared());
      subscriber.on_complete();
      return;
    }

    let emitter = Arc::new(IterEmitter {
      drain: DrainLoop::new(),
      requested: DemandCounter::new(),
      cancelled: AtomicBool::new(false),
      state: Mutex::new(IterState { iter, actual: None }),
      diagnostics: self.diagnostics.clone().unwrap_or_else(diagnostics::global),
    });
    // Own the drain across `on_subscribe`, so requests made from inside it
    // are served by the loop below instead of recursing.
    emitter.drain.work().enter();
    subscriber.on_subscribe(emitter.clone());
    lock(&emitter.state).actual = Some(subscriber);
    emitter.drain.run_owned(|| emitter.emit());
  }
}

struct IterState<It: Iterator, E> {
  iter: Peekable<It>,
  actual: Option<BoxedSubscriber<It::Item, E>>,
}

struct IterEmitter<It: Iterator, E> {
  drain: DrainLoop,
  requested: DemandCounter,
  cancelled: AtomicBool,
  // Owner-only.
  state: Mutex<IterState<It, E>>,
  diagnostics: DiagnosticsRef,
}

impl<It, E> IterEmitter<It, E>
where
  It: Iterator + Send,
  It::Item: Send,
{
  fn emit(&self) -> ControlFlow<()> {
    let mut state = lock(&self.state);
    let requested = self.requested.get();
    let mut emitted = 0;
    while emitted != requested {
      if self.cancelled.load(Ordering::Acquire) {
        state.actual = None;
        return ControlFlow::Break(());
      }
      let Some(value) = state.iter.next() else { break };
      if let Some(actual) = state.actual.as_mut() {
        actual.on_next(value);
      }
      emitted += 1;
    }

    if self.cancelled.load(Ordering::Acquire) {
      state.actual = None;
      return ControlFlow::Break(());
    }
    if state.iter.peek().is_none() {
      if let Some(actual) = state.actual.take() {
        actual.on_complete();
      }
      return ControlFlow::Break(());
    }
    if emitted != 0 {
      self.requested.subtract(emitted);
    }
    ControlFlow::Continue(())
  }
}

impl<It, E> Subscription for IterEmitter<It, E>
where
  It: Iterator + Send,
  It::Item: Send,
{
  fn request(&self, n: u64) {
    if validate_request(n, &*self.diagnostics) {
      self.requested.add(n);
      self.drain.schedule(|| self.emit());
    }
  }

  fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      self.drain.schedule(|| self.emit());
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{thread, time::Duration};

  use bencher::{benchmark_group, Bencher};

  use super::*;
  use crate::{
    source::from_iter,
    subscription::UNBOUNDED,
    testing::{RecordingDiagnostics, TestSubscriber},
  };

  #[test]
  fn emits_only_what_is_requested() {
    let out = TestSubscriber::<i32, ()>::with_request(0);
    from_iter(0..10).subscribe_with(out.clone());
    assert!(out.values().is_empty());

    out.request(3);
    assert_eq!(out.values(), vec![0, 1, 2]);
    out.request(UNBOUNDED);
    assert_eq!(out.value_count(), 10);
    assert_eq!(out.completions(), 1);
  }

  #[test]
  fn completes_without_extra_demand() {
    let out = TestSubscriber::<i32, ()>::with_request(3);
    from_iter(vec![1, 2, 3]).subscribe_with(out.clone());
    assert_eq!(out.values(), vec![1, 2, 3]);
    assert_eq!(out.completions(), 1);
  }

  #[test]
  fn empty_iterator_completes_on_subscribe() {
    let out = TestSubscriber::<i32, ()>::with_request(0);
    from_iter(Vec::<i32>::new()).subscribe_with(out.clone());
    assert_eq!(out.subscriptions(), 1);
    assert_eq!(out.completions(), 1);
  }

  #[test]
  fn cancel_stops_emission() {
    let out = TestSubscriber::<i32, ()>::with_request(2);
    from_iter(0..10).subscribe_with(out.clone());
    out.cancel();
    out.request(5);
    assert_eq!(out.values(), vec![0, 1]);
    assert!(!out.is_terminated());
  }

  #[test]
  fn zero_request_is_reported_and_ignored() {
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    let out = TestSubscriber::<i32, ()>::with_request(0);
    FromIter::with_diagnostics(0..3, diagnostics.clone()).subscribe_with(out.clone());
    out.request(0);
    assert!(out.values().is_empty());
    assert_eq!(diagnostics.violations().len(), 1);
  }

  #[test]
  fn requests_from_other_threads_are_serialized() {
    let out = TestSubscriber::<usize, ()>::with_request(0);
    from_iter(0..4_000).subscribe_with(out.clone());
    let handles: Vec<_> = (0..4)
      .map(|_| {
        let out = out.clone();
        thread::spawn(move || {
          for _ in 0..1_000 {
            out.request(1);
          }
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    assert!(out.await_terminal(Duration::from_secs(5)));
    assert_eq!(out.overlaps(), 0);
    assert!(out.values().into_iter().eq(0..4_000));
  }

  #[test]
  fn bench() { do_bench(); }

  benchmark_group!(do_bench, bench_from_range);

  fn bench_from_range(b: &mut Bencher) {
    b.iter(|| {
      let out = TestSubscriber::<i32, ()>::new();
      from_iter(0..1_000).subscribe_with(out.clone());
      out.value_count()
    });
  }
}
