//! Error types for `cohort-core`.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::experiment::ExperimentStatus;

/// What a caller attempted when an [`Error::InvalidTransition`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
  /// Move the experiment to another status.
  Status(ExperimentStatus),
  /// Replace the variant list.
  EditVariants,
}

impl fmt::Display for Attempt {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Status(to) => write!(f, "move to {to}"),
      Self::EditVariants => f.write_str("edit variants"),
    }
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid experiment definition: {0}")]
  Validation(String),

  #[error("invalid transition: cannot {attempted} while {from}")]
  InvalidTransition {
    from:      ExperimentStatus,
    attempted: Attempt,
  },

  #[error("experiment not found: {0}")]
  NotFound(Uuid),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  pub(crate) fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
