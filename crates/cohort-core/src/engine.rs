//! [`AssignmentEngine`] — deterministic, idempotent, race-safe assignment.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
  Error, Result,
  assignment::{AssignOutcome, Assignment, Ineligibility},
  bucket,
  experiment::ExperimentStatus,
  store::{ExperimentStore, InsertOutcome},
};

pub struct AssignmentEngine<S> {
  store: Arc<S>,
}

impl<S> Clone for AssignmentEngine<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: ExperimentStore> AssignmentEngine<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Assign `identity` to a variant of `experiment_id`.
  ///
  /// Eligibility is checked first and never writes. An existing assignment
  /// is returned unchanged. Otherwise the identity is bucketed and the
  /// result inserted; if a concurrent caller inserted first, their row wins
  /// and is returned instead.
  pub async fn assign(
    &self,
    experiment_id: Uuid,
    identity: &str,
    segment: &str,
  ) -> Result<AssignOutcome> {
    if identity.is_empty() {
      return Err(Error::validation("identity must not be empty"));
    }

    let experiment = self
      .store
      .get_experiment(experiment_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound(experiment_id))?;

    if experiment.status != ExperimentStatus::Running {
      return Ok(AssignOutcome::NotEligible {
        reason: Ineligibility::NotRunning { status: experiment.status },
      });
    }
    let now = Utc::now();
    if !experiment.is_scheduled_at(now) {
      return Ok(AssignOutcome::NotEligible { reason: Ineligibility::OutsideSchedule });
    }
    if !experiment.accepts_segment(segment) {
      return Ok(AssignOutcome::NotEligible {
        reason: Ineligibility::SegmentMismatch { segment: segment.to_owned() },
      });
    }

    if let Some(existing) = self
      .store
      .find_assignment(experiment_id, identity)
      .await
      .map_err(Error::store)?
    {
      return Ok(existing.into());
    }

    let computed = bucket::bucket(&experiment, identity)?;
    let candidate = Assignment {
      id: Uuid::new_v4(),
      experiment_id,
      identity: identity.to_owned(),
      allocation: computed.allocation,
      segment: segment.to_owned(),
      assigned_at: now,
      identity_hash: computed.identity_hash,
    };

    let assignment = match self
      .store
      .insert_assignment(candidate)
      .await
      .map_err(Error::store)?
    {
      InsertOutcome::Inserted(a) => {
        tracing::debug!(
          %experiment_id,
          identity,
          allocation = ?a.allocation,
          "identity assigned"
        );
        a
      }
      InsertOutcome::Existing(a) => {
        tracing::debug!(
          %experiment_id,
          identity,
          "concurrent first assignment won; returning persisted row"
        );
        a
      }
    };

    Ok(assignment.into())
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::HashMap, convert::Infallible};

  use chrono::{DateTime, Duration};

  use super::*;
  use crate::{
    assignment::Allocation,
    conversion::ConversionEvent,
    experiment::{Experiment, NewExperiment, Variant},
    memory::MemoryStore,
    registry::Registry,
  };

  async fn running(
    store: &Arc<MemoryStore>,
    weights: &[(&str, f64)],
    allocation: f64,
  ) -> Experiment {
    let registry = Registry::new(Arc::clone(store));
    let mut def = NewExperiment::new(
      "engine",
      weights.iter().map(|(n, w)| Variant::new(*n, *w)).collect(),
      ["web", "ios"],
    );
    def.traffic_allocation = allocation;
    let exp = registry.create(def).await.unwrap();
    registry.transition(exp.id, ExperimentStatus::Running).await.unwrap()
  }

  #[tokio::test]
  async fn repeated_assign_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let exp = running(&store, &[("A", 1.0), ("B", 1.0)], 1.0).await;
    let engine = AssignmentEngine::new(Arc::clone(&store));

    for i in 0..200 {
      let identity = format!("user-{i}");
      let first = engine.assign(exp.id, &identity, "web").await.unwrap();
      for _ in 0..3 {
        let again = engine.assign(exp.id, &identity, "web").await.unwrap();
        assert_eq!(again, first);
      }
    }
    assert_eq!(store.assignments_for(exp.id).await.unwrap().len(), 200);
  }

  #[tokio::test]
  async fn persisted_row_beats_recomputation() {
    let store = Arc::new(MemoryStore::new());
    let exp = running(&store, &[("A", 1.0), ("B", 1.0)], 1.0).await;
    let engine = AssignmentEngine::new(Arc::clone(&store));

    let first = engine.assign(exp.id, "u1", "ios").await.unwrap();
    // Later calls under another eligible segment still see the original row.
    let second = engine.assign(exp.id, "u1", "web").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(second.assignment().unwrap().segment, "ios");
  }

  #[tokio::test]
  async fn non_running_experiments_are_not_eligible() {
    let store = Arc::new(MemoryStore::new());
    let registry = Registry::new(Arc::clone(&store));
    let engine = AssignmentEngine::new(Arc::clone(&store));
    let exp = registry
      .create(NewExperiment::new("draft", vec![Variant::new("A", 1.0)], ["web"]))
      .await
      .unwrap();

    let out = engine.assign(exp.id, "u1", "web").await.unwrap();
    assert_eq!(
      out,
      AssignOutcome::NotEligible {
        reason: Ineligibility::NotRunning { status: ExperimentStatus::Draft },
      }
    );

    registry.transition(exp.id, ExperimentStatus::Running).await.unwrap();
    registry.transition(exp.id, ExperimentStatus::Paused).await.unwrap();
    let out = engine.assign(exp.id, "u1", "web").await.unwrap();
    assert!(matches!(out, AssignOutcome::NotEligible { .. }));
    assert!(store.assignments_for(exp.id).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn outside_schedule_is_not_eligible() {
    let store = Arc::new(MemoryStore::new());
    let registry = Registry::new(Arc::clone(&store));
    let engine = AssignmentEngine::new(Arc::clone(&store));
    let mut def = NewExperiment::new("ended", vec![Variant::new("A", 1.0)], ["web"]);
    def.start_date = Some(Utc::now() - Duration::days(2));
    def.end_date = Some(Utc::now() - Duration::days(1));
    let exp = registry.create(def).await.unwrap();
    registry.transition(exp.id, ExperimentStatus::Running).await.unwrap();

    let out = engine.assign(exp.id, "u1", "web").await.unwrap();
    assert_eq!(out, AssignOutcome::NotEligible { reason: Ineligibility::OutsideSchedule });
    assert!(store.assignments_for(exp.id).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn segment_gating_never_writes() {
    let store = Arc::new(MemoryStore::new());
    let exp = running(&store, &[("A", 1.0), ("B", 1.0)], 1.0).await;
    let engine = AssignmentEngine::new(Arc::clone(&store));

    for _ in 0..5 {
      let out = engine.assign(exp.id, "u1", "android").await.unwrap();
      assert_eq!(
        out,
        AssignOutcome::NotEligible {
          reason: Ineligibility::SegmentMismatch { segment: "android".into() },
        }
      );
    }
    assert!(store.find_assignment(exp.id, "u1").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn unknown_experiment_and_empty_identity_are_errors() {
    let store = Arc::new(MemoryStore::new());
    let exp = running(&store, &[("A", 1.0)], 1.0).await;
    let engine = AssignmentEngine::new(store);

    assert!(matches!(
      engine.assign(Uuid::new_v4(), "u1", "web").await,
      Err(Error::NotFound(_))
    ));
    assert!(matches!(
      engine.assign(exp.id, "", "web").await,
      Err(Error::Validation(_))
    ));
  }

  #[tokio::test]
  async fn excluded_outcomes_are_persisted() {
    let store = Arc::new(MemoryStore::new());
    let exp = running(&store, &[("A", 1.0)], 0.0).await;
    let engine = AssignmentEngine::new(Arc::clone(&store));

    let out = engine.assign(exp.id, "u1", "web").await.unwrap();
    assert!(matches!(out, AssignOutcome::Excluded { .. }));
    let row = store.find_assignment(exp.id, "u1").await.unwrap().unwrap();
    assert_eq!(row.allocation, Allocation::Excluded);
    assert_eq!(row.identity_hash, bucket::allocation_hash(exp.id, "u1"));
  }

  #[tokio::test]
  async fn even_split_across_100k_identities() {
    let store = Arc::new(MemoryStore::new());
    let exp = running(&store, &[("A", 1.0), ("B", 1.0)], 1.0).await;
    let engine = AssignmentEngine::new(Arc::clone(&store));

    let mut counts: HashMap<String, usize> = HashMap::new();
    for i in 0..100_000 {
      let out = engine.assign(exp.id, &format!("synthetic-{i}"), "web").await.unwrap();
      *counts.entry(out.variant().unwrap().to_owned()).or_default() += 1;
    }

    // ±2% of 50,000.
    for name in ["A", "B"] {
      let n = counts[name];
      assert!((49_000..=51_000).contains(&n), "{name} got {n}");
    }
  }

  #[tokio::test]
  async fn traffic_allocation_includes_expected_share() {
    let store = Arc::new(MemoryStore::new());
    let exp = running(&store, &[("A", 1.0), ("B", 1.0)], 0.3).await;
    let engine = AssignmentEngine::new(Arc::clone(&store));

    let mut included = 0usize;
    for i in 0..100_000 {
      let out = engine.assign(exp.id, &format!("synthetic-{i}"), "web").await.unwrap();
      if matches!(out, AssignOutcome::Assigned { .. }) {
        included += 1;
      }
    }
    let share = included as f64 / 100_000.0;
    assert!((share - 0.3).abs() <= 0.02, "included share was {share}");
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
  async fn concurrent_first_assignments_converge() {
    let store = Arc::new(MemoryStore::new());
    let exp = running(&store, &[("A", 1.0), ("B", 1.0), ("C", 1.0)], 1.0).await;
    let engine = AssignmentEngine::new(Arc::clone(&store));

    let id = exp.id;
    let barrier = Arc::new(tokio::sync::Barrier::new(32));
    let handles: Vec<_> = (0..32)
      .map(|_| {
        let engine = engine.clone();
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
          barrier.wait().await;
          engine.assign(id, "brand-new", "web").await.unwrap()
        })
      })
      .collect();

    let mut outcomes = Vec::new();
    for h in handles {
      outcomes.push(h.await.unwrap());
    }
    let first = outcomes[0].assignment().unwrap().id;
    assert!(outcomes.iter().all(|o| o.assignment().unwrap().id == first));
    assert_eq!(store.assignments_for(exp.id).await.unwrap().len(), 1);
  }

  // ── Lost insert race ────────────────────────────────────────────────────

  /// Hides existing rows from `find_assignment`, as if a concurrent writer
  /// inserted between the lookup and the insert.
  struct RacingStore(MemoryStore);

  impl ExperimentStore for RacingStore {
    type Error = Infallible;

    async fn insert_experiment(&self, e: Experiment) -> Result<Experiment, Infallible> {
      self.0.insert_experiment(e).await
    }

    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>, Infallible> {
      self.0.get_experiment(id).await
    }

    async fn list_experiments(
      &self,
      status: Option<ExperimentStatus>,
    ) -> Result<Vec<Experiment>, Infallible> {
      self.0.list_experiments(status).await
    }

    async fn update_status(
      &self,
      id: Uuid,
      from: ExperimentStatus,
      to: ExperimentStatus,
      at: DateTime<Utc>,
    ) -> Result<bool, Infallible> {
      self.0.update_status(id, from, to, at).await
    }

    async fn update_variants(
      &self,
      id: Uuid,
      variants: Vec<Variant>,
      at: DateTime<Utc>,
    ) -> Result<bool, Infallible> {
      self.0.update_variants(id, variants, at).await
    }

    async fn find_assignment<'a>(
      &'a self,
      _experiment_id: Uuid,
      _identity: &'a str,
    ) -> Result<Option<Assignment>, Infallible> {
      Ok(None)
    }

    async fn insert_assignment(&self, a: Assignment) -> Result<InsertOutcome, Infallible> {
      self.0.insert_assignment(a).await
    }

    async fn assignments_for(&self, id: Uuid) -> Result<Vec<Assignment>, Infallible> {
      self.0.assignments_for(id).await
    }

    async fn append_conversion(&self, e: ConversionEvent) -> Result<(), Infallible> {
      self.0.append_conversion(e).await
    }

    async fn conversions_for(&self, id: Uuid) -> Result<Vec<ConversionEvent>, Infallible> {
      self.0.conversions_for(id).await
    }
  }

  #[tokio::test]
  async fn lost_insert_race_returns_the_winner() {
    let store = Arc::new(RacingStore(MemoryStore::new()));
    let registry = Registry::new(Arc::clone(&store));
    let exp = registry
      .create(NewExperiment::new(
        "race",
        vec![Variant::new("A", 1.0), Variant::new("B", 1.0)],
        ["web"],
      ))
      .await
      .unwrap();
    registry.transition(exp.id, ExperimentStatus::Running).await.unwrap();

    // Whatever the hash says, the winner's row is the one that counts.
    let computed = bucket::bucket(&exp, "u1").unwrap();
    let other = if computed.allocation == Allocation::Variant("A".into()) { "B" } else { "A" };
    let winner = Assignment {
      id: Uuid::new_v4(),
      experiment_id: exp.id,
      identity: "u1".into(),
      allocation: Allocation::Variant(other.into()),
      segment: "web".into(),
      assigned_at: Utc::now(),
      identity_hash: computed.identity_hash,
    };
    store.0.insert_assignment(winner.clone()).await.unwrap();

    let engine = AssignmentEngine::new(Arc::clone(&store));
    let out = engine.assign(exp.id, "u1", "web").await.unwrap();
    assert_eq!(out, AssignOutcome::Assigned { assignment: winner });
    assert_eq!(store.0.assignments_for(exp.id).await.unwrap().len(), 1);
  }
}
