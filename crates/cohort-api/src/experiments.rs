//! Handlers for `/experiments` registry endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/experiments` | Optional `?status=draft\|running\|paused\|completed` |
//! | `POST` | `/experiments` | Body: [`NewExperiment`]; returns 201 + experiment |
//! | `GET`  | `/experiments/:id` | 404 if not found |
//! | `POST` | `/experiments/:id/transition` | Body: `{"status":"running"}`; 409 on an illegal edge |
//! | `PUT`  | `/experiments/:id/variants` | Body: `{"variants":[...]}`; 409 unless draft |

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use cohort_core::{
  experiment::{Experiment, ExperimentStatus, NewExperiment, Variant},
  store::ExperimentStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
  AppState,
  error::ApiError,
  extract::{Json, Path, Query},
};

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status: Option<ExperimentStatus>,
}

/// `GET /experiments[?status=<status>]`
pub async fn list<S: ExperimentStore>(
  State(state): State<AppState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Experiment>>, ApiError> {
  Ok(Json(state.registry.list(params.status).await?))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /experiments` — returns 201 + the stored [`Experiment`].
pub async fn create<S: ExperimentStore>(
  State(state): State<AppState<S>>,
  Json(body): Json<NewExperiment>,
) -> Result<impl IntoResponse, ApiError> {
  let experiment = state.registry.create(body).await?;
  Ok((StatusCode::CREATED, Json(experiment)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /experiments/:id`
pub async fn get_one<S: ExperimentStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Experiment>, ApiError> {
  Ok(Json(state.registry.get(id).await?))
}

// ─── Transition ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
  pub status: ExperimentStatus,
}

/// `POST /experiments/:id/transition` — body: `{"status":"running"}`
pub async fn transition<S: ExperimentStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<TransitionBody>,
) -> Result<Json<Experiment>, ApiError> {
  Ok(Json(state.registry.transition(id, body.status).await?))
}

// ─── Variants ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct VariantsBody {
  pub variants: Vec<Variant>,
}

/// `PUT /experiments/:id/variants` — only while the experiment is a draft.
pub async fn update_variants<S: ExperimentStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<VariantsBody>,
) -> Result<Json<Experiment>, ApiError> {
  Ok(Json(state.registry.update_variants(id, body.variants).await?))
}
