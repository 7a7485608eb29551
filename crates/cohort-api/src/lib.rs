//! JSON REST API for Cohort.
//!
//! Exposes an axum [`Router`] backed by any
//! [`cohort_core::store::ExperimentStore`]. TLS, auth and rate limiting are
//! the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", cohort_api::api_router(AppState::new(store.clone())))
//! ```

pub mod assignments;
pub mod conversions;
pub mod error;
pub mod experiments;
pub mod extract;
pub mod stats;

use std::{sync::Arc, time::Duration};

use axum::{
  Router,
  routing::{get, post, put},
};
use cohort_core::{
  analytics::Analytics, engine::AssignmentEngine, recorder::ConversionRecorder,
  registry::Registry, store::ExperimentStore,
};

pub use error::ApiError;

/// Default ceiling on a single stats computation.
pub const DEFAULT_STATS_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Application state ────────────────────────────────────────────────────────

/// The engine components, each holding the same store handle.
pub struct AppState<S> {
  pub registry:      Registry<S>,
  pub engine:        AssignmentEngine<S>,
  pub recorder:      ConversionRecorder<S>,
  pub analytics:     Analytics<S>,
  pub stats_timeout: Duration,
}

impl<S: ExperimentStore> AppState<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      registry:      Registry::new(Arc::clone(&store)),
      engine:        AssignmentEngine::new(Arc::clone(&store)),
      recorder:      ConversionRecorder::new(Arc::clone(&store)),
      analytics:     Analytics::new(store),
      stats_timeout: DEFAULT_STATS_TIMEOUT,
    }
  }

  pub fn with_stats_timeout(mut self, timeout: Duration) -> Self {
    self.stats_timeout = timeout;
    self
  }
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      registry:      self.registry.clone(),
      engine:        self.engine.clone(),
      recorder:      self.recorder.clone(),
      analytics:     self.analytics.clone(),
      stats_timeout: self.stats_timeout,
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: ExperimentStore + 'static,
{
  Router::new()
    // Registry
    .route("/experiments", get(experiments::list::<S>).post(experiments::create::<S>))
    .route("/experiments/{id}", get(experiments::get_one::<S>))
    .route("/experiments/{id}/transition", post(experiments::transition::<S>))
    .route("/experiments/{id}/variants", put(experiments::update_variants::<S>))
    // Assignment and conversion
    .route("/experiments/{id}/assign", post(assignments::assign::<S>))
    .route("/experiments/{id}/conversions", post(conversions::record::<S>))
    // Analytics
    .route("/experiments/{id}/stats", get(stats::handler::<S>))
    .with_state(state)
}

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use cohort_store_sqlite::SqliteStore;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  async fn app() -> Router {
    let store = SqliteStore::open_in_memory().await.unwrap();
    api_router(AppState::new(Arc::new(store)))
  }

  async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(v) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };
    let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
  }

  fn definition() -> Value {
    json!({
      "name": "pricing-page",
      "variants": [{ "name": "A", "weight": 1 }, { "name": "B", "weight": 1 }],
      "segments": ["web"],
      "metrics": ["signup"],
    })
  }

  async fn running_experiment(app: &Router) -> String {
    let (status, exp) = call(app, "POST", "/experiments", Some(definition())).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = exp["id"].as_str().unwrap().to_owned();
    let (status, _) = call(
      app,
      "POST",
      &format!("/experiments/{id}/transition"),
      Some(json!({ "status": "running" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    id
  }

  #[tokio::test]
  async fn create_and_fetch_experiment() {
    let app = app().await;
    let (status, exp) = call(&app, "POST", "/experiments", Some(definition())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(exp["status"], "draft");
    assert_eq!(exp["traffic_allocation"], 1.0);

    let id = exp["id"].as_str().unwrap();
    let (status, fetched) = call(&app, "GET", &format!("/experiments/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "pricing-page");

    let (status, list) = call(&app, "GET", "/experiments?status=draft", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    let (_, list) = call(&app, "GET", "/experiments?status=running", None).await;
    assert!(list.as_array().unwrap().is_empty());
  }

  #[tokio::test]
  async fn invalid_definition_is_400() {
    let app = app().await;
    let mut def = definition();
    def["traffic_allocation"] = json!(2.0);
    let (status, body) = call(&app, "POST", "/experiments", Some(def)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("traffic_allocation"));
  }

  #[tokio::test]
  async fn unknown_experiment_is_404() {
    let app = app().await;
    let uri = format!("/experiments/{}", uuid::Uuid::new_v4());
    let (status, _) = call(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn backward_transition_and_frozen_variants_are_409() {
    let app = app().await;
    let id = running_experiment(&app).await;

    let (status, _) = call(
      &app,
      "POST",
      &format!("/experiments/{id}/transition"),
      Some(json!({ "status": "draft" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
      &app,
      "PUT",
      &format!("/experiments/{id}/variants"),
      Some(json!({ "variants": [{ "name": "C", "weight": 1 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
  }

  #[tokio::test]
  async fn assign_convert_and_report() {
    let app = app().await;
    let id = running_experiment(&app).await;

    let body = json!({ "identity": "user-1", "segment": "web" });
    let (status, first) =
      call(&app, "POST", &format!("/experiments/{id}/assign"), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "assigned");
    let (_, again) = call(&app, "POST", &format!("/experiments/{id}/assign"), Some(body)).await;
    assert_eq!(again, first);

    let (status, recorded) = call(
      &app,
      "POST",
      &format!("/experiments/{id}/conversions"),
      Some(json!({ "identity": "user-1", "metric_name": "signup" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(recorded["event"]["metric_value"], 1.0);

    let (status, report) = call(&app, "GET", &format!("/experiments/{id}/stats"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["primary_metric"], "signup");
    let variant = first["assignment"]["allocation"]["variant"].as_str().unwrap();
    let row = report["variants"]
      .as_array()
      .unwrap()
      .iter()
      .find(|v| v["variant"] == variant)
      .unwrap();
    assert_eq!(row["exposures"], 1);
    assert_eq!(row["conversion_rate"], 1.0);
  }

  #[tokio::test]
  async fn ineligible_and_unassigned_outcomes() {
    let app = app().await;
    let id = running_experiment(&app).await;

    let (status, out) = call(
      &app,
      "POST",
      &format!("/experiments/{id}/assign"),
      Some(json!({ "identity": "user-1", "segment": "ios" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["outcome"], "not_eligible");
    assert_eq!(out["reason"]["kind"], "segment_mismatch");

    let (status, out) = call(
      &app,
      "POST",
      &format!("/experiments/{id}/conversions"),
      Some(json!({ "identity": "user-1", "metric_name": "signup", "value": 1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(out["outcome"], "not_assigned");
  }

  #[tokio::test]
  async fn stats_timeout_is_504_with_json_error() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let id = running_experiment(&api_router(AppState::new(Arc::clone(&store)))).await;

    let impatient = api_router(AppState::new(store).with_stats_timeout(Duration::ZERO));
    let (status, body) = call(&impatient, "GET", &format!("/experiments/{id}/stats"), None).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(body["error"].as_str().unwrap().contains("timed out"));
  }

  #[tokio::test]
  async fn malformed_requests_answer_json_400() {
    let app = app().await;

    let (status, body) = call(&app, "GET", "/experiments?status=archived", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = call(&app, "GET", "/experiments/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) =
      call(&app, "POST", "/experiments", Some(json!({ "name": "no-variants" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("variants"));

    let req = Request::post("/experiments")
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from("{not json"))
      .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].is_string());
  }
}
