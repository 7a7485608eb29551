//! Handler for `POST /experiments/:id/assign`.
//!
//! Body: `{"identity":"user-42","segment":"web"}`. Always answers 200 with an
//! [`AssignOutcome`]; ineligible callers get `"outcome":"not_eligible"`
//! rather than an error status.

use axum::extract::State;
use cohort_core::{assignment::AssignOutcome, store::ExperimentStore};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
  AppState,
  error::ApiError,
  extract::{Json, Path},
};

#[derive(Debug, Deserialize)]
pub struct AssignBody {
  pub identity: String,
  pub segment:  String,
}

pub async fn assign<S: ExperimentStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<AssignBody>,
) -> Result<Json<AssignOutcome>, ApiError> {
  Ok(Json(state.engine.assign(id, &body.identity, &body.segment).await?))
}
