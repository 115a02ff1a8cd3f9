use std::thread;

use crate::{
  publisher::{Publisher, PublisherExt},
  subscriber::BoxedSubscriber,
};

/// Subscribes to the source on a new thread, so it emits from there.
///
/// Each subscription gets its own thread. Combined with a join, this is the
/// simplest way to run every rail concurrently.
#[derive(Clone)]
pub struct SubscribeOnThread<P> {
  source: P,
}

impl<P> SubscribeOnThread<P> {
  pub fn new(source: P) -> Self { Self { source } }
}

impl<P> PublisherExt for SubscribeOnThread<P> {}

impl<P, T, E> Publisher<T, E> for SubscribeOnThread<P>
where
  P: Publisher<T, E> + Clone + Send + 'static,
  T: 'static,
  E: 'static,
{
  fn subscribe(&self, subscriber: BoxedSubscriber<T, E>) {
    let source = self.source.clone();
    let spawned = thread::Builder::new()
      .name("rxflow-subscribe-on".into())
      .spawn(move || source.subscribe(subscriber));
    if let Err(err) = spawned {
      tracing::error!(%err, "failed to spawn subscribe_on thread");
    }
  }
}
