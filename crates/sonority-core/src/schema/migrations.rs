/// A schema migration.
#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATION_001: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Submissions: internal id <-> (mbid, submission offset)
CREATE TABLE IF NOT EXISTS recordings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mbid TEXT NOT NULL,
    submission_offset INTEGER NOT NULL,
    submitted_at TEXT NOT NULL,
    UNIQUE (mbid, submission_offset)
);

CREATE INDEX IF NOT EXISTS idx_recordings_mbid ON recordings(mbid);

-- Low-level signal statistics, one JSON document per submission
CREATE TABLE IF NOT EXISTS feature_documents (
    id INTEGER PRIMARY KEY REFERENCES recordings(id),
    data TEXT NOT NULL
);

-- Precomputed classifier outputs
CREATE TABLE IF NOT EXISTS classifier_outputs (
    id INTEGER NOT NULL REFERENCES recordings(id),
    model TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (id, model)
);
"#;

const MIGRATION_002: &str = r#"
-- Per-metric similarity vectors (f64 little-endian)
CREATE TABLE IF NOT EXISTS similarity_vectors (
    id INTEGER NOT NULL REFERENCES recordings(id),
    metric TEXT NOT NULL,
    vector BLOB NOT NULL,
    PRIMARY KEY (id, metric)
);

CREATE INDEX IF NOT EXISTS idx_similarity_vectors_metric ON similarity_vectors(metric, id);

-- Recordings whose document could not be transformed for a metric
CREATE TABLE IF NOT EXISTS similarity_failures (
    id INTEGER NOT NULL REFERENCES recordings(id),
    metric TEXT NOT NULL,
    reason TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (id, metric)
);

-- Normalization statistics sampled from the population
CREATE TABLE IF NOT EXISTS similarity_stats (
    metric TEXT PRIMARY KEY,
    means TEXT NOT NULL,
    stddevs TEXT NOT NULL,
    sample_size INTEGER NOT NULL,
    computed_at TEXT NOT NULL
);
"#;

const MIGRATION_003: &str = r#"
-- Listing state of catalog metrics and registered hybrids
CREATE TABLE IF NOT EXISTS similarity_metrics (
    metric TEXT PRIMARY KEY,
    is_hybrid INTEGER NOT NULL DEFAULT 0,
    category TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    visible INTEGER NOT NULL DEFAULT 1
);
"#;

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: MIGRATION_001,
    },
    Migration {
        version: 2,
        name: "similarity",
        sql: MIGRATION_002,
    },
    Migration {
        version: 3,
        name: "similarity_metrics",
        sql: MIGRATION_003,
    },
];
