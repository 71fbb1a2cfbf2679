//! SQL schema definitions.

/// Complete schema for the v1 metadata database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Content catalog & local copies
-- ============================================================

CREATE TABLE IF NOT EXISTS content_units (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('capsule', 'resource')),
    title TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER,
    download_state TEXT NOT NULL DEFAULT 'not_downloaded',
    local_path TEXT,
    checksum TEXT,
    source_url TEXT,
    CHECK ((download_state = 'downloaded') = (local_path IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_units_kind ON content_units(kind);
CREATE INDEX IF NOT EXISTS idx_units_expires ON content_units(expires_at);
CREATE INDEX IF NOT EXISTS idx_units_created ON content_units(created_at);

-- ============================================================
-- Download queue
-- ============================================================

CREATE TABLE IF NOT EXISTS download_jobs (
    id INTEGER PRIMARY KEY,
    content_unit_id TEXT NOT NULL,
    priority INTEGER NOT NULL,
    scheduled_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_unit ON download_jobs(content_unit_id);

-- ============================================================
-- Data Wallet
-- ============================================================

-- unit_key is the content unit id, or '' for aggregate live-session usage.
CREATE TABLE IF NOT EXISTS usage_records (
    day INTEGER NOT NULL,
    unit_key TEXT NOT NULL,
    expected_bytes INTEGER NOT NULL,
    actual_bytes INTEGER NOT NULL,
    PRIMARY KEY (day, unit_key)
);

-- ============================================================
-- Settings
-- ============================================================

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
