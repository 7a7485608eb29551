//! SQL schema for the Cohort SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE … IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS experiments (
    experiment_id      TEXT PRIMARY KEY,
    name               TEXT NOT NULL,
    status             TEXT NOT NULL,   -- 'draft' | 'running' | 'paused' | 'completed'
    variants           TEXT NOT NULL,   -- JSON array of {name, weight}, original weights
    segments           TEXT NOT NULL,   -- JSON array of labels
    traffic_allocation REAL NOT NULL
                       CHECK (traffic_allocation >= 0.0 AND traffic_allocation <= 1.0),
    metrics            TEXT NOT NULL DEFAULT '[]',
    primary_metric     TEXT,
    start_date         TEXT NOT NULL,
    end_date           TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

-- Assignments are written once and never updated.
-- The UNIQUE constraint is what makes first assignment race-safe.
CREATE TABLE IF NOT EXISTS assignments (
    assignment_id TEXT PRIMARY KEY,
    experiment_id TEXT NOT NULL REFERENCES experiments(experiment_id),
    identity      TEXT NOT NULL,
    variant       TEXT,            -- NULL when excluded by traffic allocation
    segment       TEXT NOT NULL,
    identity_hash TEXT NOT NULL,   -- 16 hex digits
    assigned_at   TEXT NOT NULL,
    UNIQUE (experiment_id, identity)
);

-- Conversions are strictly append-only.
CREATE TABLE IF NOT EXISTS conversions (
    conversion_id TEXT PRIMARY KEY,
    experiment_id TEXT NOT NULL REFERENCES experiments(experiment_id),
    assignment_id TEXT NOT NULL REFERENCES assignments(assignment_id),
    variant       TEXT NOT NULL,   -- copied from the assignment
    metric_name   TEXT NOT NULL,
    metric_value  REAL NOT NULL,
    properties    TEXT NOT NULL DEFAULT '{}',
    recorded_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS experiments_status_idx   ON experiments(status);
CREATE INDEX IF NOT EXISTS assignments_variant_idx  ON assignments(experiment_id, variant);
CREATE INDEX IF NOT EXISTS conversions_aggregate_idx
    ON conversions(experiment_id, variant, metric_name);

PRAGMA user_version = 1;
";
