use crate::record::{ClassroomRecord, PersistedRecord, RecordKey};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE_NAME: &str = "classrecord.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_records(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            quarter TEXT NOT NULL,
            school_year TEXT NOT NULL,
            record_json TEXT NOT NULL,
            UNIQUE(class_id, subject_id, quarter, school_year)
        )",
        [],
    )?;
    // Workspaces created before these columns existed get them added in place.
    ensure_class_records_subject_category(&conn)?;
    ensure_class_records_timestamps(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_records_class ON class_records(class_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_class_records_subject_category(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "class_records", "subject_category")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE class_records ADD COLUMN subject_category TEXT",
        [],
    )?;
    Ok(())
}

fn ensure_class_records_timestamps(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "class_records", "created_at")? {
        conn.execute("ALTER TABLE class_records ADD COLUMN created_at TEXT", [])?;
    }
    if !table_has_column(conn, "class_records", "updated_at")? {
        conn.execute("ALTER TABLE class_records ADD COLUMN updated_at TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(
            serde_json::from_str(&text).with_context(|| format!("setting {} is not JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Reads the stored record for `key`, if any. The row id is authoritative
/// over whatever id the JSON body carries.
pub fn record_load(conn: &Connection, key: &RecordKey) -> anyhow::Result<Option<PersistedRecord>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, record_json
             FROM class_records
             WHERE class_id = ? AND subject_id = ? AND quarter = ? AND school_year = ?",
            (
                &key.class_id,
                &key.subject_id,
                key.quarter.label(),
                &key.school_year,
            ),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((id, text)) = row else {
        return Ok(None);
    };

    let mut persisted: PersistedRecord = serde_json::from_str(&text)
        .with_context(|| format!("stored record {} has an unreadable shape", id))?;
    persisted.id = Some(id);
    Ok(Some(persisted))
}

/// Upserts on the natural key (last write wins) and returns the record with
/// its durable id, minting one on first save.
pub fn record_save(conn: &Connection, record: &ClassroomRecord) -> anyhow::Result<ClassroomRecord> {
    let id = record
        .id()
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let saved = record.with_id(id.clone());
    let body = serde_json::to_string(&saved).context("failed to serialize record")?;
    let now = chrono::Utc::now().to_rfc3339();
    let key = saved.key();

    conn.execute(
        "INSERT INTO class_records(
            id, class_id, subject_id, quarter, school_year, subject_category,
            record_json, created_at, updated_at
         )
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id, subject_id, quarter, school_year) DO UPDATE SET
           id = excluded.id,
           subject_category = excluded.subject_category,
           record_json = excluded.record_json,
           updated_at = excluded.updated_at",
        (
            &id,
            &key.class_id,
            &key.subject_id,
            key.quarter.label(),
            &key.school_year,
            saved.subject_category().key(),
            &body,
            &now,
            &now,
        ),
    )?;
    Ok(saved)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecordSummary {
    pub id: String,
    pub subject_id: String,
    pub quarter: String,
    pub school_year: String,
    pub subject_category: Option<String>,
    pub updated_at: Option<String>,
}

pub fn record_list(conn: &Connection, class_id: &str) -> anyhow::Result<Vec<SavedRecordSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, subject_id, quarter, school_year, subject_category, updated_at
         FROM class_records
         WHERE class_id = ?
         ORDER BY school_year, subject_id, quarter",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok(SavedRecordSummary {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                quarter: r.get(2)?,
                school_year: r.get(3)?,
                subject_category: r.get(4)?,
                updated_at: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
