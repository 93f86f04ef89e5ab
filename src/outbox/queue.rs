//! Outbox queue trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

use super::OpKind;

/// A queued mutation awaiting confirmation by the backend.
#[derive(Debug, Clone)]
pub struct PendingOperation {
  pub id: i64,
  pub kind: OpKind,
  pub endpoint: String,
  /// Request body; None for deletes
  pub payload: Option<Value>,
  /// Most recent error seen while attempting or replaying this operation
  pub last_error: Option<String>,
  pub queued_at: DateTime<Utc>,
}

/// Trait for outbox storage backends.
pub trait OutboxQueue: Send + Sync {
  /// Append an operation, preserving insertion order. Returns its id.
  fn append(
    &self,
    kind: OpKind,
    endpoint: &str,
    payload: Option<&Value>,
    last_error: Option<&str>,
  ) -> Result<i64>;

  /// All queued operations in insertion order.
  fn list(&self) -> Result<Vec<PendingOperation>>;

  /// Record the latest error for an operation without removing it.
  fn record_error(&self, id: i64, error: &str) -> Result<()>;

  /// Remove a confirmed (or manually discarded) operation.
  fn remove(&self, id: i64) -> Result<()>;

  /// Number of queued operations.
  fn len(&self) -> Result<usize>;
}

/// SQLite-based outbox implementation.
///
/// Shares the offline database file with the response cache; the
/// AUTOINCREMENT id gives a stable append order across restarts.
pub struct SqliteOutbox {
  conn: Mutex<Connection>,
}

impl SqliteOutbox {
  /// Open (or create) the outbox at the given database path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create outbox directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open outbox database at {}: {}", path.display(), e))?;

    let outbox = Self {
      conn: Mutex::new(conn),
    };
    outbox.run_migrations()?;

    Ok(outbox)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(OUTBOX_SCHEMA)
      .map_err(|e| eyre!("Failed to run outbox migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the pending-operation queue.
const OUTBOX_SCHEMA: &str = r#"
-- Mutations not yet confirmed by the backend, in attempt order
CREATE TABLE IF NOT EXISTS pending_operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    payload BLOB,
    last_error TEXT,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl OutboxQueue for SqliteOutbox {
  fn append(
    &self,
    kind: OpKind,
    endpoint: &str,
    payload: Option<&Value>,
    last_error: Option<&str>,
  ) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let payload_blob = match payload {
      Some(v) => {
        Some(serde_json::to_vec(v).map_err(|e| eyre!("Failed to serialize payload: {}", e))?)
      }
      None => None,
    };

    conn
      .execute(
        "INSERT INTO pending_operations (kind, endpoint, payload, last_error)
         VALUES (?, ?, ?, ?)",
        params![kind.as_str(), endpoint, payload_blob, last_error],
      )
      .map_err(|e| eyre!("Failed to append pending operation: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn list(&self) -> Result<Vec<PendingOperation>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, kind, endpoint, payload, last_error, queued_at
         FROM pending_operations ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(i64, String, String, Option<Vec<u8>>, Option<String>, String)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query pending operations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut operations = Vec::with_capacity(rows.len());
    for (id, kind_str, endpoint, payload_blob, last_error, queued_at_str) in rows {
      let kind = OpKind::parse(&kind_str)
        .ok_or_else(|| eyre!("Unknown operation kind '{}' for id {}", kind_str, id))?;
      let payload = match payload_blob {
        Some(blob) => Some(
          serde_json::from_slice(&blob)
            .map_err(|e| eyre!("Failed to deserialize payload for id {}: {}", id, e))?,
        ),
        None => None,
      };

      operations.push(PendingOperation {
        id,
        kind,
        endpoint,
        payload,
        last_error,
        queued_at: parse_datetime(&queued_at_str)?,
      });
    }

    Ok(operations)
  }

  fn record_error(&self, id: i64, error: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "UPDATE pending_operations SET last_error = ? WHERE id = ?",
        params![error, id],
      )
      .map_err(|e| eyre!("Failed to record error: {}", e))?;

    Ok(())
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM pending_operations WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove pending operation: {}", e))?;

    Ok(())
  }

  fn len(&self) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_operations", [], |row| {
        row.get(0)
      })
      .map_err(|e| eyre!("Failed to count pending operations: {}", e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn open_outbox() -> (tempfile::TempDir, SqliteOutbox) {
    let dir = tempfile::tempdir().unwrap();
    let outbox = SqliteOutbox::open(&dir.path().join("offline.db")).unwrap();
    (dir, outbox)
  }

  #[test]
  fn test_append_preserves_order() {
    let (_dir, outbox) = open_outbox();

    outbox
      .append(
        OpKind::Create,
        "/banco_sangre/donantes/",
        Some(&json!({"primer_nombre": "Juan"})),
        None,
      )
      .unwrap();
    outbox
      .append(
        OpKind::Update,
        "/pacientes/7/",
        Some(&json!({"telefono": "555"})),
        Some("HTTP 503"),
      )
      .unwrap();
    outbox
      .append(OpKind::Delete, "/ordenes/3/", None, None)
      .unwrap();

    let ops = outbox.list().unwrap();
    assert_eq!(ops.len(), 3);
    assert_eq!(ops[0].kind, OpKind::Create);
    assert_eq!(ops[0].endpoint, "/banco_sangre/donantes/");
    assert_eq!(ops[1].kind, OpKind::Update);
    assert_eq!(ops[1].last_error.as_deref(), Some("HTTP 503"));
    assert_eq!(ops[2].kind, OpKind::Delete);
    assert!(ops[2].payload.is_none());
  }

  #[test]
  fn test_record_error_and_remove() {
    let (_dir, outbox) = open_outbox();

    let id = outbox
      .append(OpKind::Create, "/facturas/", Some(&json!({})), None)
      .unwrap();
    outbox.record_error(id, "network error").unwrap();

    let ops = outbox.list().unwrap();
    assert_eq!(ops[0].last_error.as_deref(), Some("network error"));

    outbox.remove(id).unwrap();
    assert_eq!(outbox.len().unwrap(), 0);
  }

  #[test]
  fn test_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    {
      let outbox = SqliteOutbox::open(&path).unwrap();
      outbox
        .append(OpKind::Create, "/permisos/", Some(&json!({"codigo": "x"})), None)
        .unwrap();
    }

    let outbox = SqliteOutbox::open(&path).unwrap();
    let ops = outbox.list().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].payload, Some(json!({"codigo": "x"})));
  }

  #[test]
  fn test_kind_round_trips_through_text() {
    for kind in [OpKind::Create, OpKind::Update, OpKind::Delete] {
      assert_eq!(OpKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(OpKind::parse("PATCH"), None);
  }
}
