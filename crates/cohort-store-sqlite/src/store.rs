//! [`SqliteStore`] — the SQLite implementation of [`ExperimentStore`].

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use rusqlite::{OpenFlags, OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use cohort_core::{
  assignment::Assignment,
  conversion::ConversionEvent,
  experiment::{Experiment, ExperimentStatus, Variant},
  store::{ExperimentStore, InsertOutcome},
};

use crate::{
  Result,
  encode::{
    ASSIGNMENT_COLUMNS, CONVERSION_COLUMNS, EXPERIMENT_COLUMNS, RawAssignment, RawConversion,
    RawExperiment, encode_dt, encode_labels, encode_properties, encode_status, encode_uuid,
    encode_variants,
  },
  schema::SCHEMA,
};

/// How long a writer waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// An experiment store backed by a single SQLite file.
///
/// Writes and point lookups go through `conn`. The full-table scans behind
/// analytics go through `reader`, a separate read-only connection with its
/// own worker thread, so a long report never queues ahead of `assign` or
/// `record`. WAL mode lets the reader run alongside the writer.
///
/// Cloning is cheap — both connections are reference-counted. Separate
/// `open` calls on the same path behave like separate service instances.
#[derive(Clone)]
pub struct SqliteStore {
  conn:   tokio_rusqlite::Connection,
  reader: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let conn = tokio_rusqlite::Connection::open(path).await?;
    init_schema(&conn).await?;

    let reader = tokio_rusqlite::Connection::open_with_flags(
      path,
      OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .await?;
    reader
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(())
      })
      .await?;

    Ok(Self { conn, reader })
  }

  /// Open an in-memory store — useful for testing.
  ///
  /// A private in-memory database cannot be shared between connections, so
  /// scans use the writer here.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    init_schema(&conn).await?;
    Ok(Self { reader: conn.clone(), conn })
  }
}

async fn init_schema(conn: &tokio_rusqlite::Connection) -> Result<()> {
  conn
    .call(|conn| {
      conn.busy_timeout(BUSY_TIMEOUT)?;
      conn.execute_batch(SCHEMA)?;
      Ok(())
    })
    .await?;
  Ok(())
}

// ─── ExperimentStore impl ────────────────────────────────────────────────────

impl ExperimentStore for SqliteStore {
  type Error = crate::Error;

  // ── Experiments ─────────────────────────────────────────────────────────

  async fn insert_experiment(&self, experiment: Experiment) -> Result<Experiment> {
    let id_str       = encode_uuid(experiment.id);
    let name         = experiment.name.clone();
    let status_str   = encode_status(experiment.status);
    let variants_str = encode_variants(&experiment.variants)?;
    let segments_str = encode_labels(&experiment.segments)?;
    let allocation   = experiment.traffic_allocation;
    let metrics_str  = encode_labels(&experiment.metrics)?;
    let primary      = experiment.primary_metric.clone();
    let start_str    = encode_dt(experiment.start_date);
    let end_str      = experiment.end_date.map(encode_dt);
    let created_str  = encode_dt(experiment.created_at);
    let updated_str  = encode_dt(experiment.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO experiments ({EXPERIMENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
          ),
          rusqlite::params![
            id_str,
            name,
            status_str,
            variants_str,
            segments_str,
            allocation,
            metrics_str,
            primary,
            start_str,
            end_str,
            created_str,
            updated_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(experiment)
  }

  async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawExperiment> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE experiment_id = ?1"),
              rusqlite::params![id_str],
              RawExperiment::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawExperiment::into_experiment).transpose()
  }

  async fn list_experiments(&self, status: Option<ExperimentStatus>) -> Result<Vec<Experiment>> {
    let status_str = status.map(encode_status);

    let raws: Vec<RawExperiment> = self
      .conn
      .call(move |conn| {
        let rows = if let Some(s) = status_str {
          let mut stmt = conn.prepare(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments
             WHERE status = ?1 ORDER BY created_at, rowid"
          ))?;
          stmt
            .query_map(rusqlite::params![s], RawExperiment::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          let mut stmt = conn.prepare(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments ORDER BY created_at, rowid"
          ))?;
          stmt
            .query_map([], RawExperiment::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawExperiment::into_experiment).collect()
  }

  async fn update_status(
    &self,
    id:   Uuid,
    from: ExperimentStatus,
    to:   ExperimentStatus,
    at:   DateTime<Utc>,
  ) -> Result<bool> {
    let id_str   = encode_uuid(id);
    let from_str = encode_status(from);
    let to_str   = encode_status(to);
    let at_str   = encode_dt(at);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE experiments SET status = ?3, updated_at = ?4
           WHERE experiment_id = ?1 AND status = ?2",
          rusqlite::params![id_str, from_str, to_str, at_str],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }

  async fn update_variants(
    &self,
    id:       Uuid,
    variants: Vec<Variant>,
    at:       DateTime<Utc>,
  ) -> Result<bool> {
    let id_str       = encode_uuid(id);
    let variants_str = encode_variants(&variants)?;
    let draft_str    = encode_status(ExperimentStatus::Draft);
    let at_str       = encode_dt(at);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE experiments SET variants = ?2, updated_at = ?4
           WHERE experiment_id = ?1 AND status = ?3",
          rusqlite::params![id_str, variants_str, draft_str, at_str],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }

  // ── Assignments ─────────────────────────────────────────────────────────

  async fn find_assignment<'a>(
    &'a self,
    experiment_id: Uuid,
    identity:      &'a str,
  ) -> Result<Option<Assignment>> {
    let exp_str  = encode_uuid(experiment_id);
    let identity = identity.to_owned();

    let raw: Option<RawAssignment> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                 WHERE experiment_id = ?1 AND identity = ?2"
              ),
              rusqlite::params![exp_str, identity],
              RawAssignment::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAssignment::into_assignment).transpose()
  }

  async fn insert_assignment(&self, assignment: Assignment) -> Result<InsertOutcome> {
    let raw = RawAssignment::from_assignment(&assignment);

    // One IMMEDIATE transaction: take the write lock, insert unless the
    // unique index already holds a row, then read whichever row survived.
    let (inserted, row): (bool, RawAssignment) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
          &format!(
            "INSERT INTO assignments ({ASSIGNMENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (experiment_id, identity) DO NOTHING"
          ),
          rusqlite::params![
            raw.assignment_id,
            raw.experiment_id,
            raw.identity,
            raw.variant,
            raw.segment,
            raw.identity_hash,
            raw.assigned_at,
          ],
        )?;
        let row = tx.query_row(
          &format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
             WHERE experiment_id = ?1 AND identity = ?2"
          ),
          rusqlite::params![raw.experiment_id, raw.identity],
          RawAssignment::from_row,
        )?;
        tx.commit()?;
        Ok((changed == 1, row))
      })
      .await?;

    if inserted {
      Ok(InsertOutcome::Inserted(assignment))
    } else {
      tracing::debug!(
        experiment_id = %assignment.experiment_id,
        identity = %assignment.identity,
        "assignment already present; discarding candidate"
      );
      Ok(InsertOutcome::Existing(row.into_assignment()?))
    }
  }

  async fn assignments_for(&self, experiment_id: Uuid) -> Result<Vec<Assignment>> {
    let exp_str = encode_uuid(experiment_id);

    let raws: Vec<RawAssignment> = self
      .reader
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
           WHERE experiment_id = ?1 ORDER BY assigned_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![exp_str], RawAssignment::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAssignment::into_assignment).collect()
  }

  // ── Conversions ─────────────────────────────────────────────────────────

  async fn append_conversion(&self, event: ConversionEvent) -> Result<()> {
    let id_str         = encode_uuid(event.id);
    let exp_str        = encode_uuid(event.experiment_id);
    let assignment_str = encode_uuid(event.assignment_id);
    let variant        = event.variant;
    let metric_name    = event.metric_name;
    let metric_value   = event.metric_value;
    let properties_str = encode_properties(&event.properties)?;
    let at_str         = encode_dt(event.timestamp);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO conversions ({CONVERSION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
          ),
          rusqlite::params![
            id_str,
            exp_str,
            assignment_str,
            variant,
            metric_name,
            metric_value,
            properties_str,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn conversions_for(&self, experiment_id: Uuid) -> Result<Vec<ConversionEvent>> {
    let exp_str = encode_uuid(experiment_id);

    let raws: Vec<RawConversion> = self
      .reader
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CONVERSION_COLUMNS} FROM conversions
           WHERE experiment_id = ?1 ORDER BY recorded_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![exp_str], RawConversion::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawConversion::into_event).collect()
  }
}
