//! SQLite store of record for synthesized tools (WAL mode).

use super::{schema, DirectoryError};
use crate::types::{ToolCategory, ToolSpec};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha3::{Digest, Sha3_256};
use std::path::Path;
use tracing::info;

/// Hex SHA3-256 of tool source.
pub fn code_digest(code: &str) -> String {
    hex::encode(Sha3_256::digest(code.as_bytes()))
}

/// What an upsert replaced, if anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Unchanged,
    /// Same name, different code; carries the previous source.
    Replaced { previous_code: String },
}

/// The tool directory database.
pub struct ToolStore {
    conn: Connection,
}

const COLUMNS: &str =
    "name, description, parameters_json, return_kind, category, code, version";

impl ToolStore {
    /// Open (or create) the database at the given path and create the schema if missing.
    pub fn open(path: &Path) -> Result<Self, DirectoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets concurrent readers proceed while a registration writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self, DirectoryError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<(), DirectoryError> {
        let version = self.schema_version();

        if version == 0 {
            info!("Creating tool directory schema v{}", schema::SCHEMA_VERSION);
            self.conn.execute_batch(schema::CREATE_SCHEMA)?;
            self.conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![schema::SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    /// Current schema version (0 if uninitialized).
    fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    /// Insert or overwrite the tool keyed by `spec.name`.
    pub fn upsert(&self, spec: &ToolSpec) -> Result<Upsert, DirectoryError> {
        let previous: Option<String> = self
            .conn
            .query_row(
                "SELECT code FROM tools WHERE name = ?1",
                params![spec.name],
                |row| row.get(0),
            )
            .optional()?;

        let parameters_json = serde_json::to_string(&spec.parameters)?;
        self.conn.execute(
            "INSERT INTO tools (name, description, parameters_json, return_kind, category, code, code_digest, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(name) DO UPDATE SET
                description = ?2, parameters_json = ?3, return_kind = ?4, category = ?5,
                code = ?6, code_digest = ?7, version = ?8, updated_at = datetime('now')",
            params![
                spec.name,
                spec.description,
                parameters_json,
                spec.return_kind,
                spec.category.as_str(),
                spec.code,
                code_digest(&spec.code),
                spec.version,
            ],
        )?;

        Ok(match previous {
            None => Upsert::Inserted,
            Some(code) if code == spec.code => Upsert::Unchanged,
            Some(previous_code) => Upsert::Replaced { previous_code },
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<ToolSpec>, DirectoryError> {
        let sql = format!("SELECT {} FROM tools WHERE name = ?1", COLUMNS);
        let raw = self
            .conn
            .query_row(&sql, params![name], RawTool::from_row)
            .optional()?;
        raw.map(RawTool::into_spec).transpose()
    }

    /// Tools in a category, in registration order.
    pub fn by_category(&self, category: ToolCategory) -> Result<Vec<ToolSpec>, DirectoryError> {
        let sql = format!(
            "SELECT {} FROM tools WHERE category = ?1 ORDER BY rowid",
            COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params![category.as_str()], RawTool::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawTool::into_spec).collect()
    }

    /// All tool names, in registration order.
    pub fn names(&self) -> Result<Vec<String>, DirectoryError> {
        let mut stmt = self.conn.prepare("SELECT name FROM tools ORDER BY rowid")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn count(&self) -> Result<u64, DirectoryError> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tools", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Row image before JSON decoding.
struct RawTool {
    name: String,
    description: String,
    parameters_json: String,
    return_kind: String,
    category: String,
    code: String,
    version: u32,
}

impl RawTool {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            description: row.get(1)?,
            parameters_json: row.get(2)?,
            return_kind: row.get(3)?,
            category: row.get(4)?,
            code: row.get(5)?,
            version: row.get(6)?,
        })
    }

    fn into_spec(self) -> Result<ToolSpec, DirectoryError> {
        Ok(ToolSpec {
            name: self.name,
            description: self.description,
            parameters: serde_json::from_str(&self.parameters_json)?,
            return_kind: self.return_kind,
            category: ToolCategory::parse_lenient(&self.category),
            code: self.code,
            version: self.version,
        })
    }
}
