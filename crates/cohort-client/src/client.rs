//! Async HTTP client wrapping the Cohort JSON API.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cohort_core::{
  analytics::ExperimentReport,
  assignment::AssignOutcome,
  conversion::{Properties, RecordOutcome},
  experiment::{Experiment, ExperimentStatus, NewExperiment, Variant},
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use crate::cache::AssignmentSource;

/// Connection settings for the Cohort API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub base_url: String,
  pub timeout:  Duration,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:7070".to_string(),
      timeout:  Duration::from_secs(30),
    }
  }
}

/// Async HTTP client for the Cohort JSON REST API.
///
/// Cheap to clone — the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  config: ApiConfig,
}

impl ApiClient {
  pub fn new(config: ApiConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(config.timeout)
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
  }

  // ── Experiments ───────────────────────────────────────────────────────────

  /// `GET /experiments[?status=<status>]`
  pub async fn list_experiments(&self, status: Option<ExperimentStatus>) -> Result<Vec<Experiment>> {
    let mut req = self.client.get(self.url("/experiments"));
    if let Some(status) = status {
      req = req.query(&[("status", status.as_str())]);
    }
    let resp = req.send().await.context("GET /experiments failed")?;
    expect_json(resp, "GET /experiments").await
  }

  /// `GET /experiments/:id`
  pub async fn get_experiment(&self, id: Uuid) -> Result<Experiment> {
    let path = format!("/experiments/{id}");
    let resp = self
      .client
      .get(self.url(&path))
      .send()
      .await
      .with_context(|| format!("GET {path} failed"))?;
    expect_json(resp, &format!("GET {path}")).await
  }

  /// `POST /experiments`
  pub async fn create_experiment(&self, definition: &NewExperiment) -> Result<Experiment> {
    let resp = self
      .client
      .post(self.url("/experiments"))
      .json(definition)
      .send()
      .await
      .context("POST /experiments failed")?;
    expect_json(resp, "POST /experiments").await
  }

  /// `POST /experiments/:id/transition`
  pub async fn transition(&self, id: Uuid, status: ExperimentStatus) -> Result<Experiment> {
    let path = format!("/experiments/{id}/transition");
    let resp = self
      .client
      .post(self.url(&path))
      .json(&json!({ "status": status }))
      .send()
      .await
      .with_context(|| format!("POST {path} failed"))?;
    expect_json(resp, &format!("POST {path}")).await
  }

  /// `PUT /experiments/:id/variants`
  pub async fn update_variants(&self, id: Uuid, variants: &[Variant]) -> Result<Experiment> {
    let path = format!("/experiments/{id}/variants");
    let resp = self
      .client
      .put(self.url(&path))
      .json(&json!({ "variants": variants }))
      .send()
      .await
      .with_context(|| format!("PUT {path} failed"))?;
    expect_json(resp, &format!("PUT {path}")).await
  }

  // ── Assignment & conversions ──────────────────────────────────────────────

  /// `POST /experiments/:id/assign`
  pub async fn assign(&self, id: Uuid, identity: &str, segment: &str) -> Result<AssignOutcome> {
    let path = format!("/experiments/{id}/assign");
    let resp = self
      .client
      .post(self.url(&path))
      .json(&json!({ "identity": identity, "segment": segment }))
      .send()
      .await
      .with_context(|| format!("POST {path} failed"))?;
    expect_json(resp, &format!("POST {path}")).await
  }

  /// `POST /experiments/:id/conversions`
  ///
  /// A 422 carrying `not_assigned` is an outcome, not an error.
  pub async fn record_conversion(
    &self,
    id: Uuid,
    identity: &str,
    metric_name: &str,
    value: f64,
    properties: Option<Properties>,
  ) -> Result<RecordOutcome> {
    let path = format!("/experiments/{id}/conversions");
    let resp = self
      .client
      .post(self.url(&path))
      .json(&json!({
        "identity": identity,
        "metric_name": metric_name,
        "value": value,
        "properties": properties,
      }))
      .send()
      .await
      .with_context(|| format!("POST {path} failed"))?;

    if resp.status() == StatusCode::UNPROCESSABLE_ENTITY {
      return resp.json().await.context("deserialising conversion outcome");
    }
    expect_json(resp, &format!("POST {path}")).await
  }

  // ── Analytics ─────────────────────────────────────────────────────────────

  /// `GET /experiments/:id/stats[?metric=<name>]`
  pub async fn get_stats(&self, id: Uuid, metric: Option<&str>) -> Result<ExperimentReport> {
    let path = format!("/experiments/{id}/stats");
    let mut req = self.client.get(self.url(&path));
    if let Some(metric) = metric {
      req = req.query(&[("metric", metric)]);
    }
    let resp = req.send().await.with_context(|| format!("GET {path} failed"))?;
    expect_json(resp, &format!("GET {path}")).await
  }
}

impl AssignmentSource for ApiClient {
  async fn fetch_assignment(
    &self,
    experiment_id: Uuid,
    identity: &str,
    segment: &str,
  ) -> Result<AssignOutcome> {
    self.assign(experiment_id, identity, segment).await
  }
}

/// Deserialise a success body, or turn the server's `{"error": ...}` body
/// into an error naming the request.
async fn expect_json<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
  let status = resp.status();
  if !status.is_success() {
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    return match body.get("error").and_then(|e| e.as_str()) {
      Some(message) => Err(anyhow!("{what} → {status}: {message}")),
      None => Err(anyhow!("{what} → {status}")),
    };
  }
  resp.json().await.with_context(|| format!("deserialising {what} response"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_joins_without_double_slash() {
    let client = ApiClient::new(ApiConfig {
      base_url: "http://cohort.internal:7070/".into(),
      ..ApiConfig::default()
    })
    .unwrap();
    assert_eq!(client.url("/experiments"), "http://cohort.internal:7070/experiments");
  }
}
