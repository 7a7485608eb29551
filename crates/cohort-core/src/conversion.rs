//! Conversion events — immutable, append-only metric samples attributed to an
//! assignment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Opaque key-value bag attached to a conversion.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// One recorded metric sample. Repeated samples for the same metric and
/// assignment are all kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionEvent {
  pub id:            Uuid,
  pub experiment_id: Uuid,
  pub assignment_id: Uuid,
  /// Copied from the assignment when the event was recorded.
  pub variant:       String,
  pub metric_name:   String,
  /// Binary and count events use `1.0`.
  pub metric_value:  f64,
  #[serde(default)]
  pub properties:    Properties,
  pub timestamp:     DateTime<Utc>,
}

/// Reject blank metric names and non-finite values.
pub fn validate_sample(metric_name: &str, value: f64) -> Result<()> {
  if metric_name.trim().is_empty() {
    return Err(Error::validation("metric_name must not be blank"));
  }
  if !value.is_finite() {
    return Err(Error::validation(format!(
      "metric {metric_name:?} has non-finite value {value}"
    )));
  }
  Ok(())
}

/// Result of [`crate::recorder::ConversionRecorder::record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
  Recorded { event: ConversionEvent },
  /// No assignment exists for the identity, or it was excluded. Nothing was
  /// written.
  NotAssigned,
}

impl RecordOutcome {
  pub fn event(&self) -> Option<&ConversionEvent> {
    match self {
      Self::Recorded { event } => Some(event),
      Self::NotAssigned => None,
    }
  }
}
