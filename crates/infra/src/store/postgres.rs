//! Postgres-backed registry store.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE registry_entries (
//!     provider     TEXT        NOT NULL,
//!     model        TEXT        NOT NULL,
//!     data         JSONB       NOT NULL,
//!     last_updated TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (provider, model)
//! );
//!
//! CREATE TABLE history_entries (
//!     id        BIGSERIAL   PRIMARY KEY,
//!     provider  TEXT        NOT NULL,
//!     model     TEXT        NOT NULL,
//!     timestamp TIMESTAMPTZ NOT NULL,
//!     diff      JSONB       NOT NULL,
//!     snapshot  JSONB       NOT NULL
//! );
//! ```
//!
//! `data` and `snapshot` hold the full [`RegistryEntryData`] document.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (connection class) | `08xxx` | `Unavailable` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | ColumnDecode / Decode | N/A | `Serialization` |
//! | Other | N/A | `Backend` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument, warn};

use atlas_core::{Diff, HistoryEntry, ModelKey, RegistryEntryData};

use super::r#trait::{HistoryLog, RegistryStore, StoreError, Trail, check_commit};

const SELECT_ENTRY: &str = r#"
    SELECT data
    FROM registry_entries
    WHERE provider = $1 AND model = $2
"#;

const SELECT_HISTORY: &str = r#"
    SELECT id, provider, model, timestamp, diff, snapshot
    FROM history_entries
    WHERE provider = $1 AND model = $2
    ORDER BY id ASC
"#;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS registry_entries (
        provider     TEXT        NOT NULL,
        model        TEXT        NOT NULL,
        data         JSONB       NOT NULL,
        last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (provider, model)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS history_entries (
        id        BIGSERIAL   PRIMARY KEY,
        provider  TEXT        NOT NULL,
        model     TEXT        NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        diff      JSONB       NOT NULL,
        snapshot  JSONB       NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS history_entries_key_idx
        ON history_entries (provider, model, id)
    "#,
];

/// Postgres-backed registry store and history log.
///
/// `commit` runs the upsert and the history insert in one transaction. An
/// error on either statement rolls the transaction back explicitly; a dropped
/// uncommitted transaction is rolled back by sqlx as well.
#[derive(Debug, Clone)]
pub struct PostgresRegistryStore {
    pool: Arc<PgPool>,
}

impl PostgresRegistryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(provider = %key.provider, model = %key.model, found = tracing::field::Empty),
        err
    )]
    pub async fn load_entry(&self, key: &ModelKey) -> Result<Option<RegistryEntryData>, StoreError> {
        let row = sqlx::query(SELECT_ENTRY)
            .bind(&key.provider)
            .bind(&key.model)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_entry", e))?;

        Span::current().record("found", row.is_some());

        row.map(|row| decode_document(&row, "data")).transpose()
    }

    #[instrument(
        skip(self, entry, diff),
        fields(
            provider = %entry.provider,
            model = %entry.model,
            diff_type = ?diff.diff_type,
            changes = diff.changes.len(),
            history_id = tracing::field::Empty
        ),
        err
    )]
    pub async fn commit_entry(
        &self,
        entry: &RegistryEntryData,
        diff: &Diff,
    ) -> Result<HistoryEntry, StoreError> {
        check_commit(entry, diff)?;

        let data = encode_document(entry)?;
        let diff_json = serde_json::to_value(diff)
            .map_err(|e| StoreError::Serialization(format!("diff: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let written = write_entry_and_history(&mut tx, entry, &data, &diff_json).await;
        let (id, timestamp) = match written {
            Ok(row) => row,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed commit also failed");
                }
                return Err(e);
            }
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("history_id", id);
        Ok(HistoryEntry {
            id,
            provider: entry.provider.clone(),
            model: entry.model.clone(),
            timestamp,
            diff: diff.clone(),
            snapshot: entry.clone(),
        })
    }

    #[instrument(skip(self), err)]
    pub async fn list_entries(&self) -> Result<Vec<RegistryEntryData>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT data
            FROM registry_entries
            ORDER BY provider ASC, model ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_entries", e))?;

        rows.iter().map(|row| decode_document(row, "data")).collect()
    }

    #[instrument(skip(self), fields(provider = %key.provider, model = %key.model), err)]
    pub async fn load_history(&self, key: &ModelKey) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = sqlx::query(SELECT_HISTORY)
            .bind(&key.provider)
            .bind(&key.model)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_history", e))?;

        rows.iter().map(history_from_row).collect()
    }

    /// History and current entry inside one `REPEATABLE READ` transaction, so
    /// a concurrent commit is seen by both reads or by neither.
    #[instrument(skip(self), fields(provider = %key.provider, model = %key.model), err)]
    pub async fn load_trail(&self, key: &ModelKey) -> Result<Trail, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let rows = sqlx::query(SELECT_HISTORY)
            .bind(&key.provider)
            .bind(&key.model)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_trail", e))?;
        let history = rows.iter().map(history_from_row).collect::<Result<Vec<_>, _>>()?;

        let current = sqlx::query(SELECT_ENTRY)
            .bind(&key.provider)
            .bind(&key.model)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_trail", e))?
            .map(|row| decode_document(&row, "data"))
            .transpose()?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Trail { history, current })
    }
}

async fn write_entry_and_history(
    tx: &mut Transaction<'_, Postgres>,
    entry: &RegistryEntryData,
    data: &JsonValue,
    diff: &JsonValue,
) -> Result<(i64, DateTime<Utc>), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO registry_entries (provider, model, data, last_updated)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (provider, model)
        DO UPDATE SET
            data = EXCLUDED.data,
            last_updated = EXCLUDED.last_updated
        "#,
    )
    .bind(&entry.provider)
    .bind(&entry.model)
    .bind(data)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("upsert_entry", e))?;

    let row = sqlx::query(
        r#"
        INSERT INTO history_entries (provider, model, timestamp, diff, snapshot)
        VALUES ($1, $2, NOW(), $3, $4)
        RETURNING id, timestamp
        "#,
    )
    .bind(&entry.provider)
    .bind(&entry.model)
    .bind(diff)
    .bind(data)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_history", e))?;

    let id: i64 = row
        .try_get("id")
        .map_err(|e| map_sqlx_error("insert_history", e))?;
    let timestamp: DateTime<Utc> = row
        .try_get("timestamp")
        .map_err(|e| map_sqlx_error("insert_history", e))?;
    Ok((id, timestamp))
}

fn encode_document(entry: &RegistryEntryData) -> Result<JsonValue, StoreError> {
    serde_json::to_value(entry).map_err(|e| StoreError::Serialization(format!("entry: {e}")))
}

fn decode_document(row: &sqlx::postgres::PgRow, column: &str) -> Result<RegistryEntryData, StoreError> {
    let value: JsonValue = row
        .try_get(column)
        .map_err(|e| map_sqlx_error("decode_document", e))?;
    serde_json::from_value(value)
        .map_err(|e| StoreError::Serialization(format!("stored {column} document: {e}")))
}

fn history_from_row(row: &sqlx::postgres::PgRow) -> Result<HistoryEntry, StoreError> {
    let diff: JsonValue = row
        .try_get("diff")
        .map_err(|e| map_sqlx_error("history_row", e))?;

    Ok(HistoryEntry {
        id: row.try_get("id").map_err(|e| map_sqlx_error("history_row", e))?,
        provider: row
            .try_get("provider")
            .map_err(|e| map_sqlx_error("history_row", e))?,
        model: row.try_get("model").map_err(|e| map_sqlx_error("history_row", e))?,
        timestamp: row
            .try_get("timestamp")
            .map_err(|e| map_sqlx_error("history_row", e))?,
        diff: serde_json::from_value::<Diff>(diff)
            .map_err(|e| StoreError::Serialization(format!("stored diff: {e}")))?,
        snapshot: decode_document(row, "snapshot")?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if code.as_ref() == "23505" => StoreError::Conflict(msg),
                Some(code) if code.starts_with("08") => StoreError::Unavailable(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{} in {}", err, operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("{} in {}", err, operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn runtime() -> Result<tokio::runtime::Handle, StoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Unavailable(
            "PostgresRegistryStore requires a tokio runtime; call it from a blocking task".to_string(),
        )
    })
}

// The store traits are synchronous; bridge onto the ambient tokio runtime.
// Callers run on a blocking thread (`spawn_blocking`), never on a runtime worker.

impl RegistryStore for PostgresRegistryStore {
    fn load(&self, key: &ModelKey) -> Result<Option<RegistryEntryData>, StoreError> {
        runtime()?.block_on(self.load_entry(key))
    }

    fn commit(&self, entry: &RegistryEntryData, diff: &Diff) -> Result<HistoryEntry, StoreError> {
        runtime()?.block_on(self.commit_entry(entry, diff))
    }

    fn list(&self) -> Result<Vec<RegistryEntryData>, StoreError> {
        runtime()?.block_on(self.list_entries())
    }
}

impl HistoryLog for PostgresRegistryStore {
    fn history(&self, key: &ModelKey) -> Result<Vec<HistoryEntry>, StoreError> {
        runtime()?.block_on(self.load_history(key))
    }

    fn trail(&self, key: &ModelKey) -> Result<Trail, StoreError> {
        runtime()?.block_on(self.load_trail(key))
    }
}
