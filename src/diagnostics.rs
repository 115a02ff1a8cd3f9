//! Side channel for protocol violations and dropped signals.
//!
//! Signal delivery must never unwind through producer code, so problems that
//! are not the pipeline's own terminal error are reported here instead:
//!
//! - protocol violations, such as a second subscription offered to a slot or a
//!   request for zero values;
//! - signals that arrive after the pipeline already terminated, such as a
//!   second error from another rail.
//!
//! Every operator takes a [`DiagnosticsRef`] at construction. Without one it
//! uses the process-wide sink returned by [`global`], which logs through
//! `tracing` unless another sink was installed with [`set_global`].

use std::{
  any::Any,
  fmt::{Debug, Formatter},
  sync::Arc,
};

use once_cell::sync::OnceCell;
use thiserror::Error;

/// A breach of the subscriber/subscription contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
  #[error("a subscription was already set; the incoming one was cancelled")]
  DuplicateSubscription,
  #[error("request amount must be positive, got {0}")]
  NonPositiveRequest(u64),
  #[error("produced {produced} values but only {requested} were requested")]
  ProducedMoreThanRequested { requested: u64, produced: u64 },
  #[error("{subscribers} subscribers offered to {rails} rails")]
  RailCountMismatch { rails: usize, subscribers: usize },
}

/// A signal that could not be delivered because the pipeline had terminated.
pub enum DroppedSignal {
  Next(Box<dyn Any + Send>),
  Error(Box<dyn Any + Send>),
  Complete,
}

impl DroppedSignal {
  pub fn next<T: Send + 'static>(value: T) -> Self { DroppedSignal::Next(Box::new(value)) }

  pub fn error<E: Send + 'static>(err: E) -> Self { DroppedSignal::Error(Box::new(err)) }

  pub fn kind(&self) -> &'static str {
    match self {
      DroppedSignal::Next(_) => "next",
      DroppedSignal::Error(_) => "error",
      DroppedSignal::Complete => "complete",
    }
  }
}

impl Debug for DroppedSignal {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("DroppedSignal").field(&self.kind()).finish()
  }
}

/// Pluggable sink for everything that must not travel the signal path.
pub trait Diagnostics: Send + Sync {
  fn protocol_violation(&self, violation: ProtocolViolation);

  fn signal_dropped(&self, signal: DroppedSignal);
}

pub type DiagnosticsRef = Arc<dyn Diagnostics>;

/// Default sink: logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
  fn protocol_violation(&self, violation: ProtocolViolation) {
    tracing::warn!(%violation, "reactive streams protocol violation");
  }

  fn signal_dropped(&self, signal: DroppedSignal) {
    tracing::debug!(kind = signal.kind(), "signal dropped after termination");
  }
}

static GLOBAL: OnceCell<DiagnosticsRef> = OnceCell::new();

/// Installs the process-wide default sink.
///
/// Only the first call wins; later calls get their sink back as `Err`. Must
/// happen before the first operator is built to affect it.
pub fn set_global(diagnostics: DiagnosticsRef) -> Result<(), DiagnosticsRef> {
  GLOBAL.set(diagnostics)
}

/// The process-wide default sink.
pub fn global() -> DiagnosticsRef { GLOBAL.get_or_init(|| Arc::new(TracingDiagnostics)).clone() }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dropped_signal_kind() {
    assert_eq!(DroppedSignal::next(1).kind(), "next");
    assert_eq!(DroppedSignal::error("e").kind(), "error");
    assert_eq!(DroppedSignal::Complete.kind(), "complete");
  }

  #[test]
  fn violation_messages() {
    assert_eq!(
      ProtocolViolation::NonPositiveRequest(0).to_string(),
      "request amount must be positive, got 0"
    );
  }

  #[test]
  fn tracing_sink_accepts_reports() {
    let sink = TracingDiagnostics;
    sink.protocol_violation(ProtocolViolation::DuplicateSubscription);
    sink.signal_dropped(DroppedSignal::Complete);
  }
}
