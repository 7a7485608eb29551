//! [`MemoryStore`] — an in-process [`ExperimentStore`] for tests and
//! embedding.
//!
//! Every conditional write goes through a single `DashMap` shard lock, so
//! `update_status`, `update_variants` and `insert_assignment` are atomic per
//! key just as the SQL statements are in the SQLite backend.

use std::{convert::Infallible, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

use crate::{
  assignment::Assignment,
  conversion::ConversionEvent,
  experiment::{Experiment, ExperimentStatus, Variant},
  store::{ExperimentStore, InsertOutcome},
};

/// Cloning is cheap — all maps are reference-counted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  experiments: Arc<DashMap<Uuid, Experiment>>,
  assignments: Arc<DashMap<(Uuid, String), Assignment>>,
  conversions: Arc<DashMap<Uuid, Vec<ConversionEvent>>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }
}

impl ExperimentStore for MemoryStore {
  type Error = Infallible;

  async fn insert_experiment(&self, experiment: Experiment) -> Result<Experiment, Infallible> {
    self.experiments.insert(experiment.id, experiment.clone());
    Ok(experiment)
  }

  async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>, Infallible> {
    Ok(self.experiments.get(&id).map(|e| e.clone()))
  }

  async fn list_experiments(
    &self,
    status: Option<ExperimentStatus>,
  ) -> Result<Vec<Experiment>, Infallible> {
    let mut all: Vec<Experiment> = self
      .experiments
      .iter()
      .filter(|e| status.is_none_or(|s| e.status == s))
      .map(|e| e.clone())
      .collect();
    all.sort_by_key(|e| e.created_at);
    Ok(all)
  }

  async fn update_status(
    &self,
    id:   Uuid,
    from: ExperimentStatus,
    to:   ExperimentStatus,
    at:   DateTime<Utc>,
  ) -> Result<bool, Infallible> {
    let Some(mut exp) = self.experiments.get_mut(&id) else {
      return Ok(false);
    };
    if exp.status != from {
      return Ok(false);
    }
    exp.status = to;
    exp.updated_at = at;
    Ok(true)
  }

  async fn update_variants(
    &self,
    id:       Uuid,
    variants: Vec<Variant>,
    at:       DateTime<Utc>,
  ) -> Result<bool, Infallible> {
    let Some(mut exp) = self.experiments.get_mut(&id) else {
      return Ok(false);
    };
    if exp.status != ExperimentStatus::Draft {
      return Ok(false);
    }
    exp.variants = variants;
    exp.updated_at = at;
    Ok(true)
  }

  async fn find_assignment<'a>(
    &'a self,
    experiment_id: Uuid,
    identity:      &'a str,
  ) -> Result<Option<Assignment>, Infallible> {
    Ok(
      self
        .assignments
        .get(&(experiment_id, identity.to_owned()))
        .map(|a| a.clone()),
    )
  }

  async fn insert_assignment(&self, assignment: Assignment) -> Result<InsertOutcome, Infallible> {
    let key = (assignment.experiment_id, assignment.identity.clone());
    Ok(match self.assignments.entry(key) {
      Entry::Occupied(existing) => InsertOutcome::Existing(existing.get().clone()),
      Entry::Vacant(slot) => {
        slot.insert(assignment.clone());
        InsertOutcome::Inserted(assignment)
      }
    })
  }

  async fn assignments_for(&self, experiment_id: Uuid) -> Result<Vec<Assignment>, Infallible> {
    Ok(
      self
        .assignments
        .iter()
        .filter(|a| a.experiment_id == experiment_id)
        .map(|a| a.clone())
        .collect(),
    )
  }

  async fn append_conversion(&self, event: ConversionEvent) -> Result<(), Infallible> {
    self.conversions.entry(event.experiment_id).or_default().push(event);
    Ok(())
  }

  async fn conversions_for(
    &self,
    experiment_id: Uuid,
  ) -> Result<Vec<ConversionEvent>, Infallible> {
    Ok(
      self
        .conversions
        .get(&experiment_id)
        .map(|events| events.clone())
        .unwrap_or_default(),
    )
  }
}
