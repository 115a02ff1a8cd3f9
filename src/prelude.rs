//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

// Configuration
pub use crate::ops::{
  join::{BufferPolicy, JoinConfig},
  retry::RetryConfig,
};
// Diagnostics
pub use crate::diagnostics::{Diagnostics, DiagnosticsRef, DroppedSignal, ProtocolViolation};
// Errors
pub use crate::error::{BufferOverflow, FlowError};
// Operators
pub use crate::ops::{
  into_stream::IntoStream, join::JoinOp, retry::RetryOp, skip_until::SkipUntilOp,
  subscribe_on::SubscribeOnThread,
};
// Core traits
pub use crate::publisher::{
  BoxedPublisher, ParallelPublisher, ParallelPublisherExt, Publisher, PublisherExt,
};
// Creation
pub use crate::source;
pub use crate::subscriber::{BoxedSubscriber, DynSubscriber, FnSubscriber, Subscriber};
// Subscription
pub use crate::subscription::*;
