//! Experiment definitions and their lifecycle.
//!
//! An experiment is created in [`ExperimentStatus::Draft`] and only ever moves
//! forward. Its variant list is editable while in draft and frozen afterwards.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Status ──────────────────────────────────────────────────────────────────

/// Lifecycle status of an experiment.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExperimentStatus {
  Draft,
  Running,
  Paused,
  Completed,
}

impl ExperimentStatus {
  /// Whether `self → next` is one of the permitted forward edges.
  pub fn can_transition_to(self, next: Self) -> bool {
    use ExperimentStatus::*;
    matches!(
      (self, next),
      (Draft, Running)
        | (Running, Paused)
        | (Paused, Running)
        | (Running | Paused, Completed)
    )
  }

  pub fn as_str(self) -> &'static str { self.into() }
}

// ─── Variant ─────────────────────────────────────────────────────────────────

/// One treatment arm. Weights are relative; they need not sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
  pub name:   String,
  pub weight: f64,
}

impl Variant {
  pub fn new(name: impl Into<String>, weight: f64) -> Self {
    Self { name: name.into(), weight }
  }
}

/// Reject empty lists, blank or duplicate names and non-positive weights.
pub fn validate_variants(variants: &[Variant]) -> Result<()> {
  if variants.is_empty() {
    return Err(Error::validation("at least one variant is required"));
  }
  let mut seen = HashSet::with_capacity(variants.len());
  for v in variants {
    if v.name.trim().is_empty() {
      return Err(Error::validation("variant names must not be blank"));
    }
    if !seen.insert(v.name.as_str()) {
      return Err(Error::validation(format!(
        "duplicate variant name {:?}",
        v.name
      )));
    }
    if !v.weight.is_finite() || v.weight <= 0.0 {
      return Err(Error::validation(format!(
        "variant {:?} has weight {}; weights must be positive",
        v.name, v.weight
      )));
    }
  }
  let total: f64 = variants.iter().map(|v| v.weight).sum();
  if !total.is_finite() {
    return Err(Error::validation("variant weights must have a finite sum"));
  }
  Ok(())
}

/// Scale weights so they sum to 1, preserving order.
///
/// Weights are first divided by the largest one so the sum cannot overflow.
pub fn normalize_weights(variants: &[Variant]) -> Vec<f64> {
  let max = variants.iter().map(|v| v.weight).fold(0.0_f64, f64::max);
  if !(max > 0.0 && max.is_finite()) {
    return vec![0.0; variants.len()];
  }
  let scaled: Vec<f64> = variants.iter().map(|v| v.weight / max).collect();
  let total: f64 = scaled.iter().sum();
  scaled.into_iter().map(|w| w / total).collect()
}

// ─── Experiment ──────────────────────────────────────────────────────────────

/// A persisted experiment definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
  pub id:                 Uuid,
  pub name:               String,
  pub status:             ExperimentStatus,
  /// Original weights, as supplied by the author.
  pub variants:           Vec<Variant>,
  pub segments:           BTreeSet<String>,
  /// Fraction of eligible identities included, in `[0, 1]`.
  pub traffic_allocation: f64,
  /// Declared metric names. Advisory only; conversions are not checked
  /// against this set.
  pub metrics:            BTreeSet<String>,
  pub primary_metric:     Option<String>,
  pub start_date:         DateTime<Utc>,
  pub end_date:           Option<DateTime<Utc>>,
  pub created_at:         DateTime<Utc>,
  pub updated_at:         DateTime<Utc>,
}

impl Experiment {
  pub fn normalized_weights(&self) -> Vec<f64> { normalize_weights(&self.variants) }

  pub fn accepts_segment(&self, segment: &str) -> bool {
    self.segments.contains(segment)
  }

  /// Whether `now` lies in `[start_date, end_date)`.
  pub fn is_scheduled_at(&self, now: DateTime<Utc>) -> bool {
    now >= self.start_date && self.end_date.is_none_or(|end| now < end)
  }

  /// The metric used for conversion rates when the caller names none.
  pub fn default_primary_metric(&self) -> Option<&str> {
    self
      .primary_metric
      .as_deref()
      .or_else(|| self.metrics.iter().next().map(String::as_str))
  }
}

// ─── NewExperiment ───────────────────────────────────────────────────────────

fn default_allocation() -> f64 { 1.0 }

/// Input to [`crate::registry::Registry::create`]. Status, id and timestamps
/// are always assigned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExperiment {
  pub name:               String,
  pub variants:           Vec<Variant>,
  pub segments:           BTreeSet<String>,
  #[serde(default = "default_allocation")]
  pub traffic_allocation: f64,
  #[serde(default)]
  pub metrics:            BTreeSet<String>,
  #[serde(default)]
  pub primary_metric:     Option<String>,
  /// Defaults to the creation time.
  #[serde(default)]
  pub start_date:         Option<DateTime<Utc>>,
  #[serde(default)]
  pub end_date:           Option<DateTime<Utc>>,
}

impl NewExperiment {
  /// Convenience constructor: full traffic, no metrics, no schedule.
  pub fn new<I, S>(name: impl Into<String>, variants: Vec<Variant>, segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      name: name.into(),
      variants,
      segments: segments.into_iter().map(Into::into).collect(),
      traffic_allocation: 1.0,
      metrics: BTreeSet::new(),
      primary_metric: None,
      start_date: None,
      end_date: None,
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.name.trim().is_empty() {
      return Err(Error::validation("experiment name must not be blank"));
    }
    validate_variants(&self.variants)?;
    if !(0.0..=1.0).contains(&self.traffic_allocation) {
      return Err(Error::validation(format!(
        "traffic_allocation {} is outside [0, 1]",
        self.traffic_allocation
      )));
    }
    if self.segments.is_empty() {
      return Err(Error::validation("at least one segment is required"));
    }
    if self.segments.iter().any(|s| s.trim().is_empty()) {
      return Err(Error::validation("segment labels must not be blank"));
    }
    if let Some(primary) = &self.primary_metric
      && !self.metrics.contains(primary)
    {
      return Err(Error::validation(format!(
        "primary metric {primary:?} is not a declared metric"
      )));
    }
    if let (Some(start), Some(end)) = (self.start_date, self.end_date)
      && end <= start
    {
      return Err(Error::validation("end_date must be after start_date"));
    }
    Ok(())
  }

  /// Build a draft [`Experiment`] stamped at `now`. Call [`Self::validate`]
  /// first.
  pub(crate) fn into_experiment(self, now: DateTime<Utc>) -> Result<Experiment> {
    let start_date = self.start_date.unwrap_or(now);
    if self.end_date.is_some_and(|end| end <= start_date) {
      return Err(Error::validation("end_date must be after start_date"));
    }
    Ok(Experiment {
      id: Uuid::new_v4(),
      name: self.name,
      status: ExperimentStatus::Draft,
      variants: self.variants,
      segments: self.segments,
      traffic_allocation: self.traffic_allocation,
      metrics: self.metrics,
      primary_metric: self.primary_metric,
      start_date,
      end_date: self.end_date,
      created_at: now,
      updated_at: now,
    })
  }
}
