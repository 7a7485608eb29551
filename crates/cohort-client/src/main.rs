//! `cohort` — command-line client for the Cohort experiment server.
//!
//! # Usage
//!
//! ```text
//! cohort --url http://localhost:7070 list --status running
//! cohort create checkout-flow --variant control=1 --variant one-page=1 --segment web
//! cohort assign <experiment-id> --segment web user-1 user-2
//! cohort --config ~/.config/cohort/config.toml stats <experiment-id>
//! ```

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use cohort_client::{ApiClient, ApiConfig, CacheConfig, CachedAssigner};
use cohort_core::{
  conversion::Properties,
  experiment::{ExperimentStatus, NewExperiment, Variant},
};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "cohort", about = "Command-line client for the Cohort experiment server")]
struct Args {
  /// Path to a TOML config file (url, cache_ttl_secs, cache_capacity).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Base URL of the cohort server (default: http://localhost:7070).
  #[arg(long, env = "COHORT_URL")]
  url: Option<String>,

  /// Seconds a cached assignment stays valid.
  #[arg(long)]
  cache_ttl_secs: Option<u64>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List experiments, optionally filtered by status.
  List {
    #[arg(long)]
    status: Option<ExperimentStatus>,
  },
  /// Show one experiment.
  Show { id: Uuid },
  /// Create a draft experiment.
  Create {
    name: String,
    /// Variant as `name=weight`; repeat for each arm.
    #[arg(long = "variant", value_parser = parse_variant, required = true)]
    variants: Vec<Variant>,
    #[arg(long = "segment", required = true)]
    segments: Vec<String>,
    #[arg(long = "metric")]
    metrics: Vec<String>,
    #[arg(long)]
    primary_metric: Option<String>,
    /// Fraction of eligible traffic entered into the experiment.
    #[arg(long, default_value_t = 1.0)]
    allocation: f64,
    #[arg(long)]
    start: Option<DateTime<Utc>>,
    #[arg(long)]
    end: Option<DateTime<Utc>>,
  },
  /// Move an experiment to a new status.
  Transition { id: Uuid, status: ExperimentStatus },
  /// Replace the variants of a draft experiment.
  Variants {
    id: Uuid,
    #[arg(long = "variant", value_parser = parse_variant, required = true)]
    variants: Vec<Variant>,
  },
  /// Assign one or more identities.
  Assign {
    id: Uuid,
    #[arg(long)]
    segment: String,
    #[arg(required = true)]
    identities: Vec<String>,
  },
  /// Record a metric sample for an assigned identity.
  Convert {
    id: Uuid,
    identity: String,
    metric: String,
    #[arg(long, default_value_t = 1.0)]
    value: f64,
    /// Extra properties as a JSON object.
    #[arg(long)]
    properties: Option<String>,
  },
  /// Print the per-variant report.
  Stats {
    id: Uuid,
    #[arg(long)]
    metric: Option<String>,
  },
}

fn parse_variant(s: &str) -> Result<Variant, String> {
  let (name, weight) = s
    .split_once('=')
    .ok_or_else(|| format!("expected name=weight, got {s:?}"))?;
  let weight = weight
    .parse::<f64>()
    .map_err(|e| format!("bad weight in {s:?}: {e}"))?;
  Ok(Variant::new(name, weight))
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default, Debug, PartialEq)]
struct ConfigFile {
  #[serde(default)]
  url:            String,
  #[serde(default)]
  cache_ttl_secs: Option<u64>,
  #[serde(default)]
  cache_capacity: Option<usize>,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();

  let file_cfg: ConfigFile = if let Some(path) = &args.config {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")?
  } else {
    ConfigFile::default()
  };

  // CLI flags override config file, which overrides defaults.
  let defaults = ApiConfig::default();
  let api_config = ApiConfig {
    base_url: args
      .url
      .or_else(|| (!file_cfg.url.is_empty()).then(|| file_cfg.url.clone()))
      .unwrap_or(defaults.base_url),
    ..defaults
  };
  let cache_defaults = CacheConfig::default();
  let cache_config = CacheConfig {
    ttl:      args
      .cache_ttl_secs
      .or(file_cfg.cache_ttl_secs)
      .map_or(cache_defaults.ttl, Duration::from_secs),
    capacity: file_cfg.cache_capacity.unwrap_or(cache_defaults.capacity),
  };

  let client = ApiClient::new(api_config)?;
  run(args.command, client, cache_config).await
}

async fn run(command: Command, client: ApiClient, cache: CacheConfig) -> Result<()> {
  match command {
    Command::List { status } => print(&client.list_experiments(status).await?),
    Command::Show { id } => print(&client.get_experiment(id).await?),
    Command::Create {
      name,
      variants,
      segments,
      metrics,
      primary_metric,
      allocation,
      start,
      end,
    } => {
      let mut definition = NewExperiment::new(name, variants, segments);
      definition.metrics = metrics.into_iter().collect();
      definition.primary_metric = primary_metric;
      definition.traffic_allocation = allocation;
      definition.start_date = start;
      definition.end_date = end;
      print(&client.create_experiment(&definition).await?)
    }
    Command::Transition { id, status } => print(&client.transition(id, status).await?),
    Command::Variants { id, variants } => print(&client.update_variants(id, &variants).await?),
    Command::Assign { id, segment, identities } => {
      let assigner = CachedAssigner::new(client, cache);
      for identity in &identities {
        let outcome = assigner.assign(id, identity, &segment).await?;
        print(&serde_json::json!({ "identity": identity, "result": outcome }))?;
      }
      Ok(())
    }
    Command::Convert { id, identity, metric, value, properties } => {
      let properties = properties
        .map(|raw| parse_properties(&raw))
        .transpose()?;
      print(&client.record_conversion(id, &identity, &metric, value, properties).await?)
    }
    Command::Stats { id, metric } => print(&client.get_stats(id, metric.as_deref()).await?),
  }
}

fn parse_properties(raw: &str) -> Result<Properties> {
  match serde_json::from_str(raw).context("parsing --properties")? {
    serde_json::Value::Object(map) => Ok(map),
    other => Err(anyhow!("--properties must be a JSON object, got {other}")),
  }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn variant_flag_parses_name_and_weight() {
    assert_eq!(parse_variant("control=2.5").unwrap(), Variant::new("control", 2.5));
    assert!(parse_variant("control").is_err());
    assert!(parse_variant("control=heavy").is_err());
  }

  #[test]
  fn config_file_fields_are_optional() {
    let cfg: ConfigFile = toml::from_str("url = \"http://cohort:7070\"\n").unwrap();
    assert_eq!(cfg.url, "http://cohort:7070");
    assert_eq!(cfg.cache_ttl_secs, None);

    let cfg: ConfigFile = toml::from_str("cache_ttl_secs = 10\ncache_capacity = 64\n").unwrap();
    assert_eq!(cfg.cache_ttl_secs, Some(10));
    assert_eq!(cfg.cache_capacity, Some(64));
  }

  #[test]
  fn properties_must_be_an_object() {
    assert_eq!(parse_properties(r#"{"sku":"A"}"#).unwrap()["sku"], "A");
    assert!(parse_properties("[1,2]").is_err());
  }

  #[test]
  fn assign_takes_several_identities() {
    let args = Args::try_parse_from([
      "cohort",
      "assign",
      "6f2c1d9e-0000-4000-8000-000000000001",
      "--segment",
      "web",
      "u1",
      "u2",
    ])
    .unwrap();
    let Command::Assign { segment, identities, .. } = args.command else {
      panic!("expected assign");
    };
    assert_eq!(segment, "web");
    assert_eq!(identities, ["u1", "u2"]);
  }
}
