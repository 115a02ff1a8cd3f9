//! # rxflow: demand-driven reactive streams
//!
//! Publishers, subscribers and subscriptions following the Reactive Streams
//! protocol: values only flow after they were requested, and every subscriber
//! sees its signals one at a time even when producers run on many threads.
//!
//! ## Quick Start
//!
//! ```rust
//! use rxflow::{prelude::*, testing::TestSubscriber};
//!
//! let rails = source::rails(vec![
//!   source::from_iter(vec![1, 3, 5]),
//!   source::from_iter(vec![2, 4, 6]),
//! ]);
//!
//! let out = TestSubscriber::<i32, FlowError>::new();
//! rails.join().subscribe_with(out.clone());
//!
//! let mut values = out.values();
//! values.sort();
//! assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);
//! assert_eq!(out.completions(), 1);
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Publisher`] | Accepts subscribers and emits only what they requested |
//! | [`ParallelPublisher`] | A fixed number of independent rails |
//! | [`Subscriber`] | Consumes `on_subscribe`, `on_next`, `on_error` and `on_complete` |
//! | [`Subscription`] | `request(n)` and `cancel()`, callable from any thread |
//!
//! ## Operators
//!
//! - [`join`](ParallelPublisherExt::join) merges all rails of a parallel
//!   publisher into one sequence.
//! - [`skip_until`](PublisherExt::skip_until) drops values until another
//!   publisher signals.
//! - [`retry`](PublisherExt::retry) resubscribes on error, carrying demand
//!   over.
//! - [`subscribe_on_thread`](PublisherExt::subscribe_on_thread) and
//!   [`into_stream`](PublisherExt::into_stream) bridge to threads and async
//!   code.
//!
//! Problems that are not the pipeline's own error, such as protocol
//! violations or signals arriving after termination, go to the
//! [`diagnostics`] sink, which logs through `tracing` by default.
//!
//! [`Publisher`]: publisher::Publisher
//! [`ParallelPublisher`]: publisher::ParallelPublisher
//! [`Subscriber`]: subscriber::Subscriber
//! [`Subscription`]: subscription::Subscription

pub mod diagnostics;
pub mod error;
pub mod ops;
pub mod prelude;
pub mod publisher;
pub mod serialized;
pub mod source;
pub mod subscriber;
pub mod subscription;
pub mod sync;
pub mod testing;

// Re-export the prelude module
pub use prelude::*;

// Run the README examples as doctests.
#[cfg(doctest)]
mod __markdown_doctests {
  mod readme {
    #![doc = include_str!("../README.md")]
  }
}
