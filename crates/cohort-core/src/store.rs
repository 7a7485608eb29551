//! The `ExperimentStore` trait.
//!
//! Implemented by storage backends (`cohort-store-sqlite`, and
//! [`crate::memory::MemoryStore`] for tests). The engine components hold an
//! explicit handle to a store; there is no global registry.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  assignment::Assignment,
  conversion::ConversionEvent,
  experiment::{Experiment, ExperimentStatus, Variant},
};

/// Outcome of [`ExperimentStore::insert_assignment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
  /// The candidate row was written.
  Inserted(Assignment),
  /// A row for the same `(experiment_id, identity)` already existed; the
  /// candidate was discarded and the persisted row is returned.
  Existing(Assignment),
}

impl InsertOutcome {
  pub fn into_assignment(self) -> Assignment {
    match self {
      Self::Inserted(a) | Self::Existing(a) => a,
    }
  }
}

/// Abstraction over a durable experiment store.
///
/// Assignment and conversion writes are append-only. Experiments are mutated
/// only through conditional updates so that concurrent writers cannot both
/// apply a change from the same starting state.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait ExperimentStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Experiments ───────────────────────────────────────────────────────

  /// Persist a new experiment definition.
  fn insert_experiment(
    &self,
    experiment: Experiment,
  ) -> impl Future<Output = Result<Experiment, Self::Error>> + Send + '_;

  /// Retrieve an experiment by id. Returns `None` if not found.
  fn get_experiment(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Experiment>, Self::Error>> + Send + '_;

  /// List experiments in creation order, optionally filtered by status.
  fn list_experiments(
    &self,
    status: Option<ExperimentStatus>,
  ) -> impl Future<Output = Result<Vec<Experiment>, Self::Error>> + Send + '_;

  /// Set `status = to` only if it is currently `from`. Returns whether the
  /// row changed.
  fn update_status(
    &self,
    id: Uuid,
    from: ExperimentStatus,
    to: ExperimentStatus,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Replace the variant list only if the experiment is still a draft.
  /// Returns whether the row changed.
  fn update_variants(
    &self,
    id: Uuid,
    variants: Vec<Variant>,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Assignments ───────────────────────────────────────────────────────

  fn find_assignment<'a>(
    &'a self,
    experiment_id: Uuid,
    identity: &'a str,
  ) -> impl Future<Output = Result<Option<Assignment>, Self::Error>> + Send + 'a;

  /// Insert `assignment` unless a row for its `(experiment_id, identity)`
  /// already exists, in which case return that row.
  ///
  /// Must be a single atomic operation backed by a storage-level uniqueness
  /// constraint; check-then-insert from the caller's side is not sufficient
  /// once more than one process shares the store.
  fn insert_assignment(
    &self,
    assignment: Assignment,
  ) -> impl Future<Output = Result<InsertOutcome, Self::Error>> + Send + '_;

  /// All assignments for an experiment, including excluded ones.
  fn assignments_for(
    &self,
    experiment_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Assignment>, Self::Error>> + Send + '_;

  // ── Conversions ───────────────────────────────────────────────────────

  fn append_conversion(
    &self,
    event: ConversionEvent,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn conversions_for(
    &self,
    experiment_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ConversionEvent>, Self::Error>> + Send + '_;
}
