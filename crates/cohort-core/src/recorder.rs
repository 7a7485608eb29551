//! [`ConversionRecorder`] — append conversion events for assigned identities.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
  Error, Result,
  assignment::Allocation,
  conversion::{ConversionEvent, Properties, RecordOutcome, validate_sample},
  store::ExperimentStore,
};

pub struct ConversionRecorder<S> {
  store: Arc<S>,
}

impl<S> Clone for ConversionRecorder<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: ExperimentStore> ConversionRecorder<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Append one metric sample for `identity`.
  ///
  /// Returns [`RecordOutcome::NotAssigned`] without writing when the identity
  /// has no assignment or was excluded. Metric names are not checked against
  /// the experiment's declared metrics.
  pub async fn record(
    &self,
    experiment_id: Uuid,
    identity: &str,
    metric_name: &str,
    value: f64,
    properties: Option<Properties>,
  ) -> Result<RecordOutcome> {
    validate_sample(metric_name, value)?;

    if self
      .store
      .get_experiment(experiment_id)
      .await
      .map_err(Error::store)?
      .is_none()
    {
      return Err(Error::NotFound(experiment_id));
    }

    let assignment = self
      .store
      .find_assignment(experiment_id, identity)
      .await
      .map_err(Error::store)?;

    let Some(assignment) = assignment else {
      return Ok(RecordOutcome::NotAssigned);
    };
    let Allocation::Variant(variant) = assignment.allocation else {
      return Ok(RecordOutcome::NotAssigned);
    };

    let event = ConversionEvent {
      id: Uuid::new_v4(),
      experiment_id,
      assignment_id: assignment.id,
      variant,
      metric_name: metric_name.to_owned(),
      metric_value: value,
      properties: properties.unwrap_or_default(),
      timestamp: Utc::now(),
    };
    self
      .store
      .append_conversion(event.clone())
      .await
      .map_err(Error::store)?;

    tracing::debug!(
      %experiment_id,
      variant = %event.variant,
      metric = %event.metric_name,
      value,
      "conversion recorded"
    );
    Ok(RecordOutcome::Recorded { event })
  }
}
