//! [`Analytics`] — per-variant aggregates over committed assignments and
//! conversions.
//!
//! Aggregation is a pure read: it never writes, so callers may wrap it in a
//! timeout or drop it mid-flight. The heavy lifting lives in [`aggregate`],
//! which works on plain slices and is what the tests exercise directly.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  assignment::{Allocation, Assignment},
  conversion::ConversionEvent,
  experiment::{Experiment, ExperimentStatus},
  store::ExperimentStore,
};

// ─── Welford accumulator ─────────────────────────────────────────────────────

/// Single-pass mean/variance accumulator (Welford's algorithm).
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
  count: u64,
  sum:   f64,
  mean:  f64,
  m2:    f64,
}

impl RunningStats {
  pub fn push(&mut self, x: f64) {
    self.count += 1;
    self.sum += x;
    let delta = x - self.mean;
    self.mean += delta / self.count as f64;
    self.m2 += delta * (x - self.mean);
  }

  pub fn count(&self) -> u64 { self.count }

  pub fn mean(&self) -> f64 { self.mean }

  /// Sample variance; zero below two observations.
  pub fn variance(&self) -> f64 {
    if self.count < 2 { 0.0 } else { self.m2 / (self.count - 1) as f64 }
  }
}

// ─── Significance ────────────────────────────────────────────────────────────

/// Two-proportion z statistic for `x2/n2` against `x1/n1` using the pooled
/// proportion. `None` when either sample is empty or the pooled proportion is
/// 0 or 1.
///
/// Sign convention: `z = (p2 - p1) / se`, where sample 1 is the baseline.
/// A positive `z` means the second sample converts better than the
/// baseline.
pub fn two_proportion_z(x1: u64, n1: u64, x2: u64, n2: u64) -> Option<f64> {
  if n1 == 0 || n2 == 0 {
    return None;
  }
  let (n1f, n2f) = (n1 as f64, n2 as f64);
  let p1 = x1 as f64 / n1f;
  let p2 = x2 as f64 / n2f;
  let pooled = (x1 + x2) as f64 / (n1f + n2f);
  let se = (pooled * (1.0 - pooled) * (1.0 / n1f + 1.0 / n2f)).sqrt();
  if se == 0.0 || !se.is_finite() {
    return None;
  }
  Some((p2 - p1) / se)
}

/// Two-sided p-value for a standard-normal statistic.
pub fn two_sided_p(z: f64) -> f64 { (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0) }

fn normal_cdf(x: f64) -> f64 { 0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2)) }

/// Abramowitz & Stegun 7.1.26; absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
  const A: [f64; 5] = [0.254829592, -0.284496736, 1.421413741, -1.453152027, 1.061405429];
  const P: f64 = 0.3275911;
  let sign = x.signum();
  let x = x.abs();
  let t = 1.0 / (1.0 + P * x);
  let poly = A.iter().rev().fold(0.0, |acc, a| acc * t + a) * t;
  sign * (1.0 - poly * (-x * x).exp())
}

// ─── Report types ────────────────────────────────────────────────────────────

/// Aggregates for one metric within one variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
  /// Whether the metric is in the experiment's declared set. Declared metrics
  /// with no samples appear zero-filled with `declared = true`.
  pub declared:   bool,
  /// Number of events.
  pub count:      u64,
  /// Distinct identities with at least one event.
  pub converters: u64,
  pub sum:        f64,
  pub mean:       f64,
  pub variance:   f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantReport {
  pub variant:         String,
  /// Normalised weight; zero for variants no longer in the definition.
  pub weight:          f64,
  /// Distinct identities with a non-excluded assignment to this variant.
  pub exposures:       u64,
  /// Converters on the primary metric divided by exposures.
  pub conversion_rate: f64,
  pub metrics:         BTreeMap<String, MetricStats>,
}

/// A variant's primary-metric rate compared with the baseline's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
  pub baseline:      String,
  pub variant:       String,
  pub metric:        String,
  pub baseline_rate: f64,
  pub variant_rate:  f64,
  pub z:             Option<f64>,
  pub p_value:       Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
  pub experiment_id:     Uuid,
  pub status:            ExperimentStatus,
  pub primary_metric:    Option<String>,
  pub total_assignments: u64,
  pub excluded:          u64,
  /// In definition order; the first entry is the baseline.
  pub variants:          Vec<VariantReport>,
  pub comparisons:       Vec<Comparison>,
  pub generated_at:      DateTime<Utc>,
}

impl ExperimentReport {
  pub fn variant(&self, name: &str) -> Option<&VariantReport> {
    self.variants.iter().find(|v| v.variant == name)
  }
}

// ─── Aggregation ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct MetricAcc {
  stats:      RunningStats,
  converters: HashSet<Uuid>,
}

#[derive(Default)]
struct VariantAcc {
  identities: HashSet<String>,
  metrics:    HashMap<String, MetricAcc>,
}

/// Build a report from already-loaded rows.
///
/// `primary_metric` overrides the experiment's own default.
pub fn aggregate(
  experiment: &Experiment,
  assignments: &[Assignment],
  conversions: &[ConversionEvent],
  primary_metric: Option<&str>,
) -> ExperimentReport {
  let mut order: Vec<String> = experiment.variants.iter().map(|v| v.name.clone()).collect();
  let weights: HashMap<&str, f64> = experiment
    .variants
    .iter()
    .map(|v| v.name.as_str())
    .zip(experiment.normalized_weights())
    .collect();
  let mut accs: HashMap<String, VariantAcc> = HashMap::new();

  let mut excluded = 0u64;
  for a in assignments.iter().filter(|a| a.experiment_id == experiment.id) {
    match &a.allocation {
      Allocation::Excluded => excluded += 1,
      Allocation::Variant(name) => {
        accs.entry(name.clone()).or_default().identities.insert(a.identity.clone());
      }
    }
  }

  for event in conversions.iter().filter(|e| e.experiment_id == experiment.id) {
    let metric = accs
      .entry(event.variant.clone())
      .or_default()
      .metrics
      .entry(event.metric_name.clone())
      .or_default();
    metric.stats.push(event.metric_value);
    metric.converters.insert(event.assignment_id);
  }

  // Rows for variants outside the current definition still get reported.
  let mut strays: Vec<String> = accs
    .keys()
    .filter(|name| !weights.contains_key(name.as_str()))
    .cloned()
    .collect();
  strays.sort();
  order.extend(strays);

  let primary = primary_metric
    .map(str::to_owned)
    .or_else(|| experiment.default_primary_metric().map(str::to_owned));

  let variants: Vec<VariantReport> = order
    .into_iter()
    .map(|name| {
      let acc = accs.remove(&name).unwrap_or_default();
      let exposures = acc.identities.len() as u64;

      let mut metrics: BTreeMap<String, MetricStats> = experiment
        .metrics
        .iter()
        .map(|m| (m.clone(), MetricStats { declared: true, ..Default::default() }))
        .collect();
      for (metric, m) in acc.metrics {
        metrics.insert(metric.clone(), MetricStats {
          declared:   experiment.metrics.contains(&metric),
          count:      m.stats.count(),
          converters: m.converters.len() as u64,
          sum:        m.stats.sum,
          mean:       m.stats.mean(),
          variance:   m.stats.variance(),
        });
      }

      let converters = primary
        .as_ref()
        .and_then(|p| metrics.get(p))
        .map_or(0, |m| m.converters);
      let conversion_rate = if exposures == 0 { 0.0 } else { converters as f64 / exposures as f64 };

      VariantReport {
        weight: weights.get(name.as_str()).copied().unwrap_or(0.0),
        variant: name,
        exposures,
        conversion_rate,
        metrics,
      }
    })
    .collect();

  let comparisons = match (&primary, variants.split_first()) {
    (Some(metric), Some((baseline, rest))) => {
      let base_x = baseline.metrics.get(metric).map_or(0, |m| m.converters);
      rest
        .iter()
        .map(|v| {
          let x = v.metrics.get(metric).map_or(0, |m| m.converters);
          let z = two_proportion_z(base_x, baseline.exposures, x, v.exposures);
          Comparison {
            baseline:      baseline.variant.clone(),
            variant:       v.variant.clone(),
            metric:        metric.clone(),
            baseline_rate: baseline.conversion_rate,
            variant_rate:  v.conversion_rate,
            z,
            p_value:       z.map(two_sided_p),
          }
        })
        .collect()
    }
    _ => Vec::new(),
  };

  let total_assignments = excluded + variants.iter().map(|v| v.exposures).sum::<u64>();

  ExperimentReport {
    experiment_id: experiment.id,
    status: experiment.status,
    primary_metric: primary,
    total_assignments,
    excluded,
    variants,
    comparisons,
    generated_at: Utc::now(),
  }
}

// ─── Component ───────────────────────────────────────────────────────────────

pub struct Analytics<S> {
  store: Arc<S>,
}

impl<S> Clone for Analytics<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: ExperimentStore> Analytics<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Compute the per-variant report for an experiment.
  pub async fn compute_stats(
    &self,
    experiment_id: Uuid,
    primary_metric: Option<&str>,
  ) -> Result<ExperimentReport> {
    let experiment = self
      .store
      .get_experiment(experiment_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound(experiment_id))?;
    let assignments = self
      .store
      .assignments_for(experiment_id)
      .await
      .map_err(Error::store)?;
    let conversions = self
      .store
      .conversions_for(experiment_id)
      .await
      .map_err(Error::store)?;

    tracing::debug!(
      %experiment_id,
      assignments = assignments.len(),
      conversions = conversions.len(),
      "aggregating experiment"
    );
    Ok(aggregate(&experiment, &assignments, &conversions, primary_metric))
  }
}
