//! Tool directory schema.

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Full DDL for a fresh tool directory.
pub const CREATE_SCHEMA: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- Synthesized tools, one row per name (upserted on re-registration)
CREATE TABLE IF NOT EXISTS tools (
    name            TEXT PRIMARY KEY,
    description     TEXT NOT NULL DEFAULT '',
    parameters_json TEXT NOT NULL DEFAULT '{}',
    return_kind     TEXT NOT NULL DEFAULT 'string',
    category        TEXT NOT NULL DEFAULT 'other',
    code            TEXT NOT NULL,
    code_digest     TEXT NOT NULL DEFAULT '',
    version         INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_tools_category ON tools(category);
"#;
