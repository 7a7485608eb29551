//! Assignments: the persisted, once-only outcome of bucketing an identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{bucket::hash_hex, experiment::ExperimentStatus};

/// Where an identity landed. `not_eligible` is never stored, so it is not a
/// member of this enum; see [`AssignOutcome::NotEligible`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "variant", rename_all = "snake_case")]
pub enum Allocation {
  Variant(String),
  /// Fell outside the experiment's traffic allocation.
  Excluded,
}

impl Allocation {
  pub fn variant(&self) -> Option<&str> {
    match self {
      Self::Variant(name) => Some(name),
      Self::Excluded => None,
    }
  }

  pub fn is_excluded(&self) -> bool { matches!(self, Self::Excluded) }
}

/// A persisted assignment. At most one exists per `(experiment_id, identity)`
/// and it is never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
  pub id:            Uuid,
  pub experiment_id: Uuid,
  pub identity:      String,
  pub allocation:    Allocation,
  /// The segment the identity was evaluated under.
  pub segment:       String,
  pub assigned_at:   DateTime<Utc>,
  /// Raw allocation hash, kept for auditing the bucketing decision.
  #[serde(with = "hash_hex")]
  pub identity_hash: u64,
}

/// Why an identity was not considered for an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ineligibility {
  NotRunning { status: ExperimentStatus },
  /// Before `start_date` or at/after `end_date`.
  OutsideSchedule,
  SegmentMismatch { segment: String },
}

/// Result of [`crate::engine::AssignmentEngine::assign`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignOutcome {
  Assigned { assignment: Assignment },
  Excluded { assignment: Assignment },
  NotEligible { reason: Ineligibility },
}

impl AssignOutcome {
  pub fn variant(&self) -> Option<&str> {
    match self {
      Self::Assigned { assignment } => assignment.allocation.variant(),
      _ => None,
    }
  }

  pub fn assignment(&self) -> Option<&Assignment> {
    match self {
      Self::Assigned { assignment } | Self::Excluded { assignment } => {
        Some(assignment)
      }
      Self::NotEligible { .. } => None,
    }
  }

  /// Whether the outcome reflects a persisted row.
  pub fn is_persisted(&self) -> bool { self.assignment().is_some() }
}

impl From<Assignment> for AssignOutcome {
  fn from(assignment: Assignment) -> Self {
    if assignment.allocation.is_excluded() {
      Self::Excluded { assignment }
    } else {
      Self::Assigned { assignment }
    }
  }
}
