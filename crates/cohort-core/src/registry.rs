//! [`Registry`] — create, read and transition experiment definitions.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
  Error, Result,
  error::Attempt,
  experiment::{Experiment, ExperimentStatus, NewExperiment, Variant, validate_variants},
  store::ExperimentStore,
};

pub struct Registry<S> {
  store: Arc<S>,
}

impl<S> Clone for Registry<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: ExperimentStore> Registry<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Validate and persist a new experiment in [`ExperimentStatus::Draft`].
  pub async fn create(&self, definition: NewExperiment) -> Result<Experiment> {
    definition.validate()?;
    let experiment = definition.into_experiment(Utc::now())?;
    let experiment = self
      .store
      .insert_experiment(experiment)
      .await
      .map_err(Error::store)?;
    tracing::info!(
      experiment_id = %experiment.id,
      name = %experiment.name,
      variants = experiment.variants.len(),
      "experiment created"
    );
    Ok(experiment)
  }

  pub async fn get(&self, id: Uuid) -> Result<Experiment> {
    self
      .store
      .get_experiment(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound(id))
  }

  pub async fn list(&self, status: Option<ExperimentStatus>) -> Result<Vec<Experiment>> {
    self.store.list_experiments(status).await.map_err(Error::store)
  }

  /// Move an experiment along one of the permitted forward edges.
  ///
  /// The write is conditional on the status read here; if another writer
  /// moved the experiment first, the call fails against the new status.
  pub async fn transition(&self, id: Uuid, to: ExperimentStatus) -> Result<Experiment> {
    let mut experiment = self.get(id).await?;
    let from = experiment.status;
    if !from.can_transition_to(to) {
      return Err(Error::InvalidTransition { from, attempted: Attempt::Status(to) });
    }

    let now = Utc::now();
    let applied = self
      .store
      .update_status(id, from, to, now)
      .await
      .map_err(Error::store)?;
    if !applied {
      let current = self.get(id).await?;
      return Err(Error::InvalidTransition {
        from:      current.status,
        attempted: Attempt::Status(to),
      });
    }

    tracing::info!(experiment_id = %id, %from, %to, "experiment transitioned");
    experiment.status = to;
    experiment.updated_at = now;
    Ok(experiment)
  }

  /// Replace the variant list of a draft experiment.
  pub async fn update_variants(&self, id: Uuid, variants: Vec<Variant>) -> Result<Experiment> {
    let mut experiment = self.get(id).await?;
    if experiment.status != ExperimentStatus::Draft {
      return Err(Error::InvalidTransition {
        from:      experiment.status,
        attempted: Attempt::EditVariants,
      });
    }
    validate_variants(&variants)?;

    let now = Utc::now();
    let applied = self
      .store
      .update_variants(id, variants.clone(), now)
      .await
      .map_err(Error::store)?;
    if !applied {
      let current = self.get(id).await?;
      return Err(Error::InvalidTransition {
        from:      current.status,
        attempted: Attempt::EditVariants,
      });
    }

    tracing::info!(experiment_id = %id, variants = variants.len(), "variants updated");
    experiment.variants = variants;
    experiment.updated_at = now;
    Ok(experiment)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memory::MemoryStore;

  fn registry() -> Registry<MemoryStore> { Registry::new(Arc::new(MemoryStore::new())) }

  fn definition() -> NewExperiment {
    NewExperiment::new(
      "onboarding-copy",
      vec![Variant::new("A", 1.0), Variant::new("B", 1.0)],
      ["web"],
    )
  }

  #[tokio::test]
  async fn create_starts_in_draft_and_keeps_original_weights() {
    let r = registry();
    let mut def = definition();
    def.variants = vec![Variant::new("A", 2.0), Variant::new("B", 6.0)];
    let exp = r.create(def).await.unwrap();

    assert_eq!(exp.status, ExperimentStatus::Draft);
    assert_eq!(exp.variants[0].weight, 2.0);
    assert_eq!(exp.normalized_weights(), vec![0.25, 0.75]);
    assert_eq!(r.get(exp.id).await.unwrap().name, "onboarding-copy");
  }

  #[tokio::test]
  async fn create_rejects_invalid_definitions() {
    let r = registry();
    let mut def = definition();
    def.variants.clear();
    assert!(matches!(r.create(def).await, Err(Error::Validation(_))));

    let mut def = definition();
    def.segments.clear();
    assert!(matches!(r.create(def).await, Err(Error::Validation(_))));

    let mut def = definition();
    def.traffic_allocation = -0.1;
    assert!(matches!(r.create(def).await, Err(Error::Validation(_))));

    assert!(r.list(None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn get_missing_is_not_found() {
    let id = Uuid::new_v4();
    assert!(matches!(registry().get(id).await, Err(Error::NotFound(x)) if x == id));
  }

  #[tokio::test]
  async fn list_filters_by_status() {
    let r = registry();
    let a = r.create(definition()).await.unwrap();
    r.create(definition()).await.unwrap();
    r.transition(a.id, ExperimentStatus::Running).await.unwrap();

    assert_eq!(r.list(None).await.unwrap().len(), 2);
    let running = r.list(Some(ExperimentStatus::Running)).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, a.id);
    assert_eq!(r.list(Some(ExperimentStatus::Draft)).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn status_transitions_move_forward_only() {
    let r = registry();
    let exp = r.create(definition()).await.unwrap();

    let running = r.transition(exp.id, ExperimentStatus::Running).await.unwrap();
    assert_eq!(running.status, ExperimentStatus::Running);

    let err = r.transition(exp.id, ExperimentStatus::Draft).await.unwrap_err();
    assert!(matches!(
      err,
      Error::InvalidTransition {
        from:      ExperimentStatus::Running,
        attempted: Attempt::Status(ExperimentStatus::Draft),
      }
    ));

    r.transition(exp.id, ExperimentStatus::Paused).await.unwrap();
    r.transition(exp.id, ExperimentStatus::Running).await.unwrap();
    r.transition(exp.id, ExperimentStatus::Completed).await.unwrap();
    assert!(r.transition(exp.id, ExperimentStatus::Running).await.is_err());
    assert_eq!(r.get(exp.id).await.unwrap().status, ExperimentStatus::Completed);
  }

  #[tokio::test]
  async fn variants_editable_only_in_draft() {
    let r = registry();
    let exp = r.create(definition()).await.unwrap();

    let edited = r
      .update_variants(exp.id, vec![Variant::new("A", 1.0), Variant::new("C", 3.0)])
      .await
      .unwrap();
    assert_eq!(edited.variants[1].name, "C");
    assert!(matches!(
      r.update_variants(exp.id, vec![]).await,
      Err(Error::Validation(_))
    ));

    r.transition(exp.id, ExperimentStatus::Running).await.unwrap();
    let err = r
      .update_variants(exp.id, vec![Variant::new("Z", 1.0)])
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      Error::InvalidTransition { attempted: Attempt::EditVariants, .. }
    ));
    assert_eq!(r.get(exp.id).await.unwrap().variants[1].name, "C");
  }
}
