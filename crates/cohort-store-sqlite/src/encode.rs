//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings. Variant lists, segment and metric sets
//! and conversion properties are compact JSON. UUIDs are hyphenated lowercase
//! strings. An excluded assignment stores `NULL` in its `variant` column.

use std::{collections::BTreeSet, str::FromStr};

use chrono::{DateTime, Utc};
use cohort_core::{
  assignment::{Allocation, Assignment},
  bucket::{format_hash, parse_hash},
  conversion::{ConversionEvent, Properties},
  experiment::{Experiment, ExperimentStatus, Variant},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── ExperimentStatus ────────────────────────────────────────────────────────

pub fn encode_status(s: ExperimentStatus) -> &'static str { s.as_str() }

pub fn decode_status(s: &str) -> Result<ExperimentStatus> {
  ExperimentStatus::from_str(s)
    .map_err(|_| Error::Decode(format!("unknown experiment status: {s:?}")))
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_variants(v: &[Variant]) -> Result<String> { Ok(serde_json::to_string(v)?) }

pub fn encode_labels(labels: &BTreeSet<String>) -> Result<String> {
  Ok(serde_json::to_string(labels)?)
}

pub fn encode_properties(p: &Properties) -> Result<String> { Ok(serde_json::to_string(p)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

pub const EXPERIMENT_COLUMNS: &str = "experiment_id, name, status, variants, segments, \
   traffic_allocation, metrics, primary_metric, start_date, end_date, created_at, updated_at";

/// Raw values read directly from an `experiments` row.
pub struct RawExperiment {
  pub experiment_id:      String,
  pub name:               String,
  pub status:             String,
  pub variants:           String,
  pub segments:           String,
  pub traffic_allocation: f64,
  pub metrics:            String,
  pub primary_metric:     Option<String>,
  pub start_date:         String,
  pub end_date:           Option<String>,
  pub created_at:         String,
  pub updated_at:         String,
}

impl RawExperiment {
  /// Column order matches [`EXPERIMENT_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      experiment_id:      row.get(0)?,
      name:               row.get(1)?,
      status:             row.get(2)?,
      variants:           row.get(3)?,
      segments:           row.get(4)?,
      traffic_allocation: row.get(5)?,
      metrics:            row.get(6)?,
      primary_metric:     row.get(7)?,
      start_date:         row.get(8)?,
      end_date:           row.get(9)?,
      created_at:         row.get(10)?,
      updated_at:         row.get(11)?,
    })
  }

  pub fn into_experiment(self) -> Result<Experiment> {
    Ok(Experiment {
      id:                 decode_uuid(&self.experiment_id)?,
      name:               self.name,
      status:             decode_status(&self.status)?,
      variants:           serde_json::from_str(&self.variants)?,
      segments:           serde_json::from_str(&self.segments)?,
      traffic_allocation: self.traffic_allocation,
      metrics:            serde_json::from_str(&self.metrics)?,
      primary_metric:     self.primary_metric,
      start_date:         decode_dt(&self.start_date)?,
      end_date:           self.end_date.as_deref().map(decode_dt).transpose()?,
      created_at:         decode_dt(&self.created_at)?,
      updated_at:         decode_dt(&self.updated_at)?,
    })
  }
}

pub const ASSIGNMENT_COLUMNS: &str =
  "assignment_id, experiment_id, identity, variant, segment, identity_hash, assigned_at";

/// Raw values read directly from an `assignments` row.
pub struct RawAssignment {
  pub assignment_id: String,
  pub experiment_id: String,
  pub identity:      String,
  pub variant:       Option<String>,
  pub segment:       String,
  pub identity_hash: String,
  pub assigned_at:   String,
}

impl RawAssignment {
  /// Column order matches [`ASSIGNMENT_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      assignment_id: row.get(0)?,
      experiment_id: row.get(1)?,
      identity:      row.get(2)?,
      variant:       row.get(3)?,
      segment:       row.get(4)?,
      identity_hash: row.get(5)?,
      assigned_at:   row.get(6)?,
    })
  }

  /// Owned column values in [`ASSIGNMENT_COLUMNS`] order, ready to bind.
  pub fn from_assignment(a: &Assignment) -> Self {
    Self {
      assignment_id: encode_uuid(a.id),
      experiment_id: encode_uuid(a.experiment_id),
      identity:      a.identity.clone(),
      variant:       a.allocation.variant().map(str::to_owned),
      segment:       a.segment.clone(),
      identity_hash: format_hash(a.identity_hash),
      assigned_at:   encode_dt(a.assigned_at),
    }
  }

  pub fn into_assignment(self) -> Result<Assignment> {
    Ok(Assignment {
      id:            decode_uuid(&self.assignment_id)?,
      experiment_id: decode_uuid(&self.experiment_id)?,
      identity:      self.identity,
      allocation:    match self.variant {
        Some(name) => Allocation::Variant(name),
        None => Allocation::Excluded,
      },
      segment:       self.segment,
      identity_hash: parse_hash(&self.identity_hash)
        .map_err(|e| Error::Decode(format!("identity_hash: {e}")))?,
      assigned_at:   decode_dt(&self.assigned_at)?,
    })
  }
}

pub const CONVERSION_COLUMNS: &str = "conversion_id, experiment_id, assignment_id, variant, \
   metric_name, metric_value, properties, recorded_at";

/// Raw values read directly from a `conversions` row.
pub struct RawConversion {
  pub conversion_id: String,
  pub experiment_id: String,
  pub assignment_id: String,
  pub variant:       String,
  pub metric_name:   String,
  pub metric_value:  f64,
  pub properties:    String,
  pub recorded_at:   String,
}

impl RawConversion {
  /// Column order matches [`CONVERSION_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      conversion_id: row.get(0)?,
      experiment_id: row.get(1)?,
      assignment_id: row.get(2)?,
      variant:       row.get(3)?,
      metric_name:   row.get(4)?,
      metric_value:  row.get(5)?,
      properties:    row.get(6)?,
      recorded_at:   row.get(7)?,
    })
  }

  pub fn into_event(self) -> Result<ConversionEvent> {
    Ok(ConversionEvent {
      id:            decode_uuid(&self.conversion_id)?,
      experiment_id: decode_uuid(&self.experiment_id)?,
      assignment_id: decode_uuid(&self.assignment_id)?,
      variant:       self.variant,
      metric_name:   self.metric_name,
      metric_value:  self.metric_value,
      properties:    serde_json::from_str(&self.properties)?,
      timestamp:     decode_dt(&self.recorded_at)?,
    })
  }
}
