//! Handler for `GET /experiments/:id/stats[?metric=<name>]`.
//!
//! The computation is bounded by [`AppState::stats_timeout`]; a run that
//! exceeds it answers 504.

use axum::extract::State;
use cohort_core::{analytics::ExperimentReport, store::ExperimentStore};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
  AppState,
  error::ApiError,
  extract::{Json, Path, Query},
};

#[derive(Debug, Deserialize)]
pub struct StatsParams {
  /// Overrides the experiment's primary metric for the z-test.
  pub metric: Option<String>,
}

pub async fn handler<S: ExperimentStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Query(params): Query<StatsParams>,
) -> Result<Json<ExperimentReport>, ApiError> {
  let compute = state.analytics.compute_stats(id, params.metric.as_deref());
  match tokio::time::timeout(state.stats_timeout, compute).await {
    Ok(report) => Ok(Json(report?)),
    Err(_) => {
      tracing::warn!(
        experiment_id = %id,
        timeout_secs = state.stats_timeout.as_secs_f64(),
        "stats computation timed out"
      );
      Err(ApiError::Timeout(format!("stats for experiment {id} timed out")))
    }
  }
}
