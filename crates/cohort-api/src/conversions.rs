//! Handler for `POST /experiments/:id/conversions`.
//!
//! Body: `{"identity":"user-42","metric_name":"purchase","value":19.99}`.
//! `value` defaults to `1.0` and `properties` to an empty object. Answers
//! 201 with the stored event, or 422 with `"outcome":"not_assigned"` when the
//! identity holds no variant.

use axum::{
  extract::State,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use cohort_core::{
  conversion::{Properties, RecordOutcome},
  store::ExperimentStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
  AppState,
  error::ApiError,
  extract::{Json, Path},
};

fn default_value() -> f64 { 1.0 }

#[derive(Debug, Deserialize)]
pub struct ConversionBody {
  pub identity:    String,
  pub metric_name: String,
  #[serde(default = "default_value")]
  pub value:       f64,
  #[serde(default)]
  pub properties:  Option<Properties>,
}

pub async fn record<S: ExperimentStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<ConversionBody>,
) -> Result<Response, ApiError> {
  let outcome = state
    .recorder
    .record(id, &body.identity, &body.metric_name, body.value, body.properties)
    .await?;

  let status = match outcome {
    RecordOutcome::Recorded { .. } => StatusCode::CREATED,
    RecordOutcome::NotAssigned => StatusCode::UNPROCESSABLE_ENTITY,
  };
  Ok((status, Json(outcome)).into_response())
}
