//! HTTP server wiring for Cohort.
//!
//! Holds the runtime [`ServerConfig`] and assembles the API router with
//! request tracing. The binary in `main.rs` only loads configuration, opens
//! the store and serves [`app`].

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::Router;
use cohort_api::AppState;
use cohort_core::store::ExperimentStore;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `COHORT_*` environment variables.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
  pub host:               String,
  pub port:               u16,
  pub store_path:         PathBuf,
  pub stats_timeout_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:               "127.0.0.1".to_string(),
      port:               7070,
      store_path:         PathBuf::from("cohort.db"),
      stats_timeout_secs: 30,
    }
  }
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn stats_timeout(&self) -> Duration { Duration::from_secs(self.stats_timeout_secs) }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the served application: the API router plus HTTP tracing.
pub fn app<S>(store: Arc<S>, config: &ServerConfig) -> Router
where
  S: ExperimentStore + 'static,
{
  let state = AppState::new(store).with_stats_timeout(config.stats_timeout());
  cohort_api::api_router(state).layer(TraceLayer::new_for_http())
}
