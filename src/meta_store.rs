//! Durable mapping from instance id to replication position, plus
//! cached per-table column descriptors. Backed by SQLite, with a
//! write-through in-memory cache for the read-heavy path.

use crate::error::{CdcError, Result};
use crate::events::TableMeta;
use crate::position::Position;
use chrono::Utc;
use parking_lot::RwLock;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS binlog_positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instance_id TEXT UNIQUE NOT NULL,
    filename TEXT NOT NULL,
    position INTEGER NOT NULL,
    gtid_set TEXT,
    updated_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS table_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    schema_name TEXT NOT NULL,
    table_name TEXT NOT NULL,
    columns_json TEXT NOT NULL,
    types_json TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(schema_name, table_name)
);
";

type TableKey = (String, String);

struct Inner {
    conn: Connection,
}

/// Write-through cache over a single-file SQLite database. Readers take
/// a shared lock; writers take an exclusive lock spanning both the
/// cache and the underlying storage call, so the two never diverge.
pub struct MetaStore {
    inner: Arc<parking_lot::Mutex<Inner>>,
    position_cache: RwLock<HashMap<String, Position>>,
    table_meta_cache: RwLock<HashMap<TableKey, TableMeta>>,
}

impl MetaStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(MetaStore {
            inner: Arc::new(parking_lot::Mutex::new(Inner { conn })),
            position_cache: RwLock::new(HashMap::new()),
            table_meta_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(MetaStore {
            inner: Arc::new(parking_lot::Mutex::new(Inner { conn })),
            position_cache: RwLock::new(HashMap::new()),
            table_meta_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the persisted position, or the default sentinel if this
    /// instance has never checkpointed. Never fails with "not found".
    pub async fn load_position(&self, instance_id: &str) -> Result<Position> {
        if let Some(pos) = self.position_cache.read().get(instance_id).cloned() {
            return Ok(pos);
        }

        let inner = self.inner.clone();
        let instance_id_owned = instance_id.to_string();
        let instance_id = instance_id.to_string();
        let row: Option<(String, u32, Option<String>)> = tokio::task::spawn_blocking(move || {
            let guard = inner.lock();
            guard
                .conn
                .query_row(
                    "SELECT filename, position, gtid_set FROM binlog_positions WHERE instance_id = ?1",
                    params![instance_id_owned],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(CdcError::Sqlite)
                .map(Some)
                .or_else(|e| match e {
                    CdcError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    other => Err(other),
                })
        })
        .await
        .map_err(|e| CdcError::Storage(e.to_string()))??;

        let position = match row {
            Some((file, offset, gtid_set)) => {
                let mut pos = Position::new(file, offset);
                pos.gtid_set = gtid_set;
                pos
            }
            None => Position::initial(),
        };

        self.position_cache.write().insert(instance_id, position.clone());
        Ok(position)
    }

    /// Upsert; write-through to storage then cache, only updating the
    /// cache once storage succeeds.
    pub async fn save_position(&self, instance_id: &str, position: Position) -> Result<()> {
        let inner = self.inner.clone();
        let instance_id_owned = instance_id.to_string();
        let now = Utc::now().timestamp();
        let pos = position.clone();

        tokio::task::spawn_blocking(move || {
            let guard = inner.lock();
            guard.conn.execute(
                "INSERT INTO binlog_positions (instance_id, filename, position, gtid_set, updated_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(instance_id) DO UPDATE SET
                   filename = excluded.filename,
                   position = excluded.position,
                   gtid_set = excluded.gtid_set,
                   updated_at = excluded.updated_at",
                params![instance_id_owned, pos.file, pos.offset, pos.gtid_set, now],
            )
        })
        .await
        .map_err(|e| CdcError::Storage(e.to_string()))??;

        self.position_cache.write().insert(instance_id.to_string(), position);
        Ok(())
    }

    pub async fn delete_position(&self, instance_id: &str) -> Result<()> {
        let inner = self.inner.clone();
        let instance_id_owned = instance_id.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = inner.lock();
            guard.conn.execute("DELETE FROM binlog_positions WHERE instance_id = ?1", params![instance_id_owned])
        })
        .await
        .map_err(|e| CdcError::Storage(e.to_string()))??;

        self.position_cache.write().remove(instance_id);
        Ok(())
    }

    pub async fn load_table_meta(&self, schema: &str, table: &str) -> Result<Option<TableMeta>> {
        let key = (schema.to_string(), table.to_string());
        if let Some(meta) = self.table_meta_cache.read().get(&key).cloned() {
            return Ok(Some(meta));
        }

        let inner = self.inner.clone();
        let (schema_owned, table_owned) = key.clone();
        let row: Option<(String, String)> = tokio::task::spawn_blocking(move || {
            let guard = inner.lock();
            guard
                .conn
                .query_row(
                    "SELECT columns_json, types_json FROM table_metadata WHERE schema_name = ?1 AND table_name = ?2",
                    params![schema_owned, table_owned],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(CdcError::Sqlite)
                .map(Some)
                .or_else(|e| match e {
                    CdcError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    other => Err(other),
                })
        })
        .await
        .map_err(|e| CdcError::Storage(e.to_string()))??;

        let meta = match row {
            Some((columns_json, types_json)) => {
                let columns: Vec<String> = serde_json::from_str(&columns_json)?;
                let types: Vec<String> = serde_json::from_str(&types_json)?;
                Some(TableMeta { schema: schema.to_string(), table: table.to_string(), columns, types })
            }
            None => None,
        };

        if let Some(ref meta) = meta {
            self.table_meta_cache.write().insert(key, meta.clone());
        }
        Ok(meta)
    }

    pub async fn save_table_meta(&self, schema: &str, table: &str, meta: TableMeta) -> Result<()> {
        let columns_json = serde_json::to_string(&meta.columns)?;
        let types_json = serde_json::to_string(&meta.types)?;
        let inner = self.inner.clone();
        let (schema_owned, table_owned) = (schema.to_string(), table.to_string());
        let now = Utc::now().timestamp();

        tokio::task::spawn_blocking(move || {
            let guard = inner.lock();
            guard.conn.execute(
                "INSERT INTO table_metadata (schema_name, table_name, columns_json, types_json, updated_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(schema_name, table_name) DO UPDATE SET
                   columns_json = excluded.columns_json,
                   types_json = excluded.types_json,
                   updated_at = excluded.updated_at",
                params![schema_owned, table_owned, columns_json, types_json, now],
            )
        })
        .await
        .map_err(|e| CdcError::Storage(e.to_string()))??;

        self.table_meta_cache.write().insert((schema.to_string(), table.to_string()), meta);
        Ok(())
    }

    pub async fn delete_table_meta(&self, schema: &str, table: &str) -> Result<()> {
        let inner = self.inner.clone();
        let (schema_owned, table_owned) = (schema.to_string(), table.to_string());
        tokio::task::spawn_blocking(move || {
            let guard = inner.lock();
            guard.conn.execute(
                "DELETE FROM table_metadata WHERE schema_name = ?1 AND table_name = ?2",
                params![schema_owned, table_owned],
            )
        })
        .await
        .map_err(|e| CdcError::Storage(e.to_string()))??;

        self.table_meta_cache.write().remove(&(schema.to_string(), table.to_string()));
        Ok(())
    }

    /// Deletes records whose `updated_at` predates `older_than` seconds
    /// ago, then reloads the cache.
    pub async fn cleanup(&self, older_than: std::time::Duration) -> Result<()> {
        let cutoff = Utc::now().timestamp() - older_than.as_secs() as i64;
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = inner.lock();
            guard.conn.execute("DELETE FROM binlog_positions WHERE updated_at < ?1", params![cutoff])?;
            guard.conn.execute("DELETE FROM table_metadata WHERE updated_at < ?1", params![cutoff])
        })
        .await
        .map_err(|e| CdcError::Storage(e.to_string()))??;

        self.position_cache.write().clear();
        self.table_meta_cache.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_position_defaults_to_initial() {
        let store = MetaStore::open_in_memory().unwrap();
        let pos = store.load_position("task-1").await.unwrap();
        assert!(pos.is_initial());
    }

    #[tokio::test]
    async fn save_then_load_position_round_trips() {
        let store = MetaStore::open_in_memory().unwrap();
        let pos = Position::new("mysql-bin.000002", 500);
        store.save_position("task-1", pos.clone()).await.unwrap();
        let loaded = store.load_position("task-1").await.unwrap();
        assert_eq!(loaded, pos);
    }

    #[tokio::test]
    async fn delete_position_clears_cache_and_storage() {
        let store = MetaStore::open_in_memory().unwrap();
        store.save_position("task-1", Position::new("f", 10)).await.unwrap();
        store.delete_position("task-1").await.unwrap();
        assert!(store.load_position("task-1").await.unwrap().is_initial());
    }

    #[tokio::test]
    async fn table_meta_round_trips() {
        let store = MetaStore::open_in_memory().unwrap();
        let meta = TableMeta {
            schema: "test".into(),
            table: "users".into(),
            columns: vec!["id".into(), "name".into()],
            types: vec!["int".into(), "varchar".into()],
        };
        store.save_table_meta("test", "users", meta.clone()).await.unwrap();
        let loaded = store.load_table_meta("test", "users").await.unwrap();
        assert_eq!(loaded, Some(meta));
    }

    #[tokio::test]
    async fn cleanup_removes_stale_records() {
        let store = MetaStore::open_in_memory().unwrap();
        store.save_position("task-1", Position::new("f", 10)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2000)).await;
        store.cleanup(std::time::Duration::from_secs(0)).await.unwrap();
        assert!(store.load_position("task-1").await.unwrap().is_initial());
    }
}
