//! SQL schema for the embedded store (§6 of the design doc).
//!
//! Kept as a single literal DDL string rather than a migration framework —
//! there is exactly one schema version right now, and `SCHEMA_VERSION` is
//! checked against the `run` row at open time (see [`super::Store::open_or_create`]).

pub const SCHEMA_VERSION: i32 = 1;

pub const DDL: &str = r"
CREATE TABLE IF NOT EXISTS run (
    id              TEXT NOT NULL,
    a_root          TEXT NOT NULL,
    b_root          TEXT NOT NULL,
    dest_root       TEXT NOT NULL,
    phase           TEXT NOT NULL,
    created_at      INTEGER NOT NULL,
    schema_version  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS path (
    rel_path        TEXT PRIMARY KEY,
    in_a            INTEGER NOT NULL DEFAULT 0,
    in_b            INTEGER NOT NULL DEFAULT 0,
    kind_a          TEXT,
    kind_b          TEXT,
    size_a          INTEGER,
    size_b          INTEGER,
    mtime_a         INTEGER,
    mtime_b         INTEGER,
    hash_a          INTEGER,
    hash_b          INTEGER,
    link_target_a   TEXT,
    link_target_b   TEXT,
    action          TEXT,
    action_detail   TEXT,
    status          TEXT NOT NULL,
    awaiting_seq    INTEGER,
    decision_choice TEXT,
    winner          TEXT,
    decided_at      INTEGER,
    error           TEXT
);

CREATE INDEX IF NOT EXISTS idx_path_status ON path(status);
CREATE INDEX IF NOT EXISTS idx_path_action ON path(action);

CREATE TABLE IF NOT EXISTS conflict_log (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    rel_path        TEXT NOT NULL,
    choice          TEXT NOT NULL,
    winner          TEXT NOT NULL,
    a_snapshot_json TEXT NOT NULL,
    b_snapshot_json TEXT NOT NULL,
    decided_at      INTEGER NOT NULL
);
";
