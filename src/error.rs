use thiserror::Error;

/// A rail delivered more values than its bounded buffer holds.
///
/// Bounded buffers are sized to the rail's prefetch, so this only happens
/// when the rail ignored the demand it was given.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rail {rail} overflowed its buffer of {capacity} values")]
pub struct BufferOverflow {
  pub rail: usize,
  pub capacity: usize,
}

/// Ready-made error type for pipelines that do not bring their own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
  #[error("upstream failed: {0}")]
  Upstream(String),
  #[error(transparent)]
  Overflow(#[from] BufferOverflow),
}

impl From<&str> for FlowError {
  fn from(msg: &str) -> Self { FlowError::Upstream(msg.to_owned()) }
}

impl From<String> for FlowError {
  fn from(msg: String) -> Self { FlowError::Upstream(msg) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn overflow_converts_and_displays() {
    let err = FlowError::from(BufferOverflow { rail: 2, capacity: 8 });
    assert_eq!(err.to_string(), "rail 2 overflowed its buffer of 8 values");
    assert_eq!(err, FlowError::Overflow(BufferOverflow { rail: 2, capacity: 8 }));
  }

  #[test]
  fn messages_become_upstream_errors() {
    assert_eq!(FlowError::from("down"), FlowError::Upstream("down".to_owned()));
    assert_eq!(FlowError::from("down").to_string(), "upstream failed: down");
  }
}
