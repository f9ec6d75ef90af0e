//! Rollout persistence.
//!
//! The store stands in for the external resource store the controller would
//! run against in production. Its update contract is the one the reconciler
//! is written to: reads return a version, status writes carry the expected
//! version and are rejected on mismatch (compare-and-swap, no locking).
//!
//! `MemoryStore` backs tests and dev; `SqliteStore` (WAL) keeps progress
//! across controller restarts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tideway_api::{RolloutSpec, RolloutStatus};
use tideway_id::RolloutId;
use tracing::debug;

use crate::error::{ControllerError, Result};

/// A rollout as persisted: spec + status + versioning counters.
#[derive(Debug, Clone)]
pub struct RolloutRecord {
    pub id: RolloutId,
    pub spec: RolloutSpec,
    pub status: RolloutStatus,

    /// Bumped on every spec change.
    pub generation: i64,

    /// Bumped on every write; the expected-version token for CAS.
    pub version: i64,

    pub updated_at: DateTime<Utc>,
}

/// Versioned rollout storage.
#[async_trait]
pub trait RolloutStore: Send + Sync {
    /// Create or update a rollout spec. Creating initializes an empty
    /// status; updating an identical spec is a no-op (no generation bump).
    async fn apply_spec(&self, spec: RolloutSpec) -> Result<RolloutRecord>;

    /// Fetch by name.
    async fn get(&self, name: &str) -> Result<RolloutRecord>;

    /// Fetch by id.
    async fn get_by_id(&self, id: RolloutId) -> Result<RolloutRecord>;

    /// All rollouts, name-ordered.
    async fn list(&self) -> Result<Vec<RolloutRecord>>;

    /// Compare-and-swap status write. Fails with `Conflict` if the stored
    /// version no longer equals `expected_version`.
    async fn update_status(
        &self,
        id: RolloutId,
        status: RolloutStatus,
        expected_version: i64,
    ) -> Result<RolloutRecord>;

    /// Remove a rollout. Reconciliation of a removed rollout stops at the
    /// next `NotFound` read.
    async fn delete(&self, name: &str) -> Result<()>;
}

// =============================================================================
// In-memory store
// =============================================================================

/// In-memory store for tests and dev runs.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<RolloutId, RolloutRecord>>,
    by_name: RwLock<HashMap<String, RolloutId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RolloutStore for MemoryStore {
    async fn apply_spec(&self, spec: RolloutSpec) -> Result<RolloutRecord> {
        let mut by_name = self
            .by_name
            .write()
            .map_err(|_| ControllerError::Internal("store lock poisoned".into()))?;
        let mut records = self
            .records
            .write()
            .map_err(|_| ControllerError::Internal("store lock poisoned".into()))?;

        if let Some(id) = by_name.get(&spec.name) {
            let record = records
                .get_mut(id)
                .ok_or_else(|| ControllerError::Internal("name index out of sync".into()))?;
            if record.spec == spec {
                return Ok(record.clone());
            }
            record.spec = spec;
            record.generation += 1;
            record.version += 1;
            record.updated_at = Utc::now();
            return Ok(record.clone());
        }

        let record = RolloutRecord {
            id: RolloutId::new(),
            spec,
            status: RolloutStatus::default(),
            generation: 1,
            version: 1,
            updated_at: Utc::now(),
        };
        by_name.insert(record.spec.name.clone(), record.id);
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, name: &str) -> Result<RolloutRecord> {
        let id = {
            let by_name = self
                .by_name
                .read()
                .map_err(|_| ControllerError::Internal("store lock poisoned".into()))?;
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| ControllerError::NotFound(name.to_string()))?
        };
        self.get_by_id(id).await
    }

    async fn get_by_id(&self, id: RolloutId) -> Result<RolloutRecord> {
        let records = self
            .records
            .read()
            .map_err(|_| ControllerError::Internal("store lock poisoned".into()))?;
        records
            .get(&id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<RolloutRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| ControllerError::Internal("store lock poisoned".into()))?;
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        Ok(all)
    }

    async fn update_status(
        &self,
        id: RolloutId,
        status: RolloutStatus,
        expected_version: i64,
    ) -> Result<RolloutRecord> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ControllerError::Internal("store lock poisoned".into()))?;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))?;

        if record.version != expected_version {
            return Err(ControllerError::Conflict {
                rollout: record.spec.name.clone(),
                expected: expected_version,
                actual: record.version,
            });
        }

        record.status = status;
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut by_name = self
            .by_name
            .write()
            .map_err(|_| ControllerError::Internal("store lock poisoned".into()))?;
        let mut records = self
            .records
            .write()
            .map_err(|_| ControllerError::Internal("store lock poisoned".into()))?;
        let id = by_name
            .remove(name)
            .ok_or_else(|| ControllerError::NotFound(name.to_string()))?;
        records.remove(&id);
        Ok(())
    }
}

// =============================================================================
// SQLite store
// =============================================================================

/// SQLite-backed store. Progress (status, versions) survives restarts.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rollouts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                spec TEXT NOT NULL,
                status TEXT NOT NULL,
                generation INTEGER NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        debug!("Rollout store schema initialized");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ControllerError::Internal("store lock poisoned".into()))
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, i64, i64, String)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn decode(
        (id, spec, status, generation, version, updated_at): (String, String, String, i64, i64, String),
    ) -> Result<RolloutRecord> {
        let id = RolloutId::parse(&id)
            .map_err(|e| ControllerError::Internal(format!("corrupt rollout id: {e}")))?;
        let spec: RolloutSpec = serde_json::from_str(&spec)
            .map_err(|e| ControllerError::Internal(format!("corrupt spec: {e}")))?;
        let status: RolloutStatus = serde_json::from_str(&status)
            .map_err(|e| ControllerError::Internal(format!("corrupt status: {e}")))?;
        let updated_at = updated_at
            .parse()
            .map_err(|e| ControllerError::Internal(format!("corrupt timestamp: {e}")))?;
        Ok(RolloutRecord {
            id,
            spec,
            status,
            generation,
            version,
            updated_at,
        })
    }

    fn encode_spec(spec: &RolloutSpec) -> Result<String> {
        serde_json::to_string(spec).map_err(|e| ControllerError::Internal(e.to_string()))
    }

    fn encode_status(status: &RolloutStatus) -> Result<String> {
        serde_json::to_string(status).map_err(|e| ControllerError::Internal(e.to_string()))
    }

    fn fetch_by_name(conn: &Connection, name: &str) -> Result<Option<RolloutRecord>> {
        let row = conn
            .query_row(
                "SELECT id, spec, status, generation, version, updated_at
                 FROM rollouts WHERE name = ?1",
                params![name],
                Self::row_to_record,
            )
            .optional()?;
        row.map(Self::decode).transpose()
    }
}

#[async_trait]
impl RolloutStore for SqliteStore {
    async fn apply_spec(&self, spec: RolloutSpec) -> Result<RolloutRecord> {
        let conn = self.lock()?;

        if let Some(existing) = Self::fetch_by_name(&conn, &spec.name)? {
            if existing.spec == spec {
                return Ok(existing);
            }
            let now = Utc::now();
            conn.execute(
                "UPDATE rollouts
                 SET spec = ?1, generation = generation + 1, version = version + 1, updated_at = ?2
                 WHERE name = ?3",
                params![Self::encode_spec(&spec)?, now.to_rfc3339(), spec.name],
            )?;
            return Self::fetch_by_name(&conn, &spec.name)?
                .ok_or_else(|| ControllerError::NotFound(spec.name.clone()));
        }

        let record = RolloutRecord {
            id: RolloutId::new(),
            spec,
            status: RolloutStatus::default(),
            generation: 1,
            version: 1,
            updated_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO rollouts (id, name, spec, status, generation, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.spec.name,
                Self::encode_spec(&record.spec)?,
                Self::encode_status(&record.status)?,
                record.generation,
                record.version,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(record)
    }

    async fn get(&self, name: &str) -> Result<RolloutRecord> {
        let conn = self.lock()?;
        Self::fetch_by_name(&conn, name)?.ok_or_else(|| ControllerError::NotFound(name.to_string()))
    }

    async fn get_by_id(&self, id: RolloutId) -> Result<RolloutRecord> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, spec, status, generation, version, updated_at
                 FROM rollouts WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_record,
            )
            .optional()?;
        row.map(Self::decode)
            .transpose()?
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<RolloutRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, spec, status, generation, version, updated_at
             FROM rollouts ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::decode).collect()
    }

    async fn update_status(
        &self,
        id: RolloutId,
        status: RolloutStatus,
        expected_version: i64,
    ) -> Result<RolloutRecord> {
        let conn = self.lock()?;

        let changed = conn.execute(
            "UPDATE rollouts
             SET status = ?1, version = version + 1, updated_at = ?2
             WHERE id = ?3 AND version = ?4",
            params![
                Self::encode_status(&status)?,
                Utc::now().to_rfc3339(),
                id.to_string(),
                expected_version,
            ],
        )?;

        if changed == 0 {
            // Distinguish a stale version from a deleted rollout.
            let row = conn
                .query_row(
                    "SELECT name, version FROM rollouts WHERE id = ?1",
                    params![id.to_string()],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?;
            return match row {
                Some((name, actual)) => Err(ControllerError::Conflict {
                    rollout: name,
                    expected: expected_version,
                    actual,
                }),
                None => Err(ControllerError::NotFound(id.to_string())),
            };
        }

        let row = conn
            .query_row(
                "SELECT id, spec, status, generation, version, updated_at
                 FROM rollouts WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_record,
            )
            .optional()?;
        row.map(Self::decode)
            .transpose()?
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM rollouts WHERE name = ?1", params![name])?;
        if changed == 0 {
            return Err(ControllerError::NotFound(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tideway_api::{CanarySpec, PodTemplate, Step, Strategy};

    use super::*;

    fn spec(name: &str, image: &str) -> RolloutSpec {
        RolloutSpec {
            name: name.to_string(),
            replicas: 3,
            template: PodTemplate {
                image: image.to_string(),
                command: vec![],
                env: BTreeMap::new(),
            },
            workload_ref: None,
            strategy: Strategy::Canary(CanarySpec {
                steps: vec![Step::SetWeight { weight: 50 }],
            }),
            restarted_at: None,
        }
    }

    async fn exercise_store(store: &dyn RolloutStore) {
        // Create
        let record = store.apply_spec(spec("api", "app:v1")).await.unwrap();
        assert_eq!(record.generation, 1);
        assert_eq!(record.version, 1);
        assert_eq!(record.status, RolloutStatus::default());

        // Identical apply is a no-op
        let same = store.apply_spec(spec("api", "app:v1")).await.unwrap();
        assert_eq!(same.generation, 1);
        assert_eq!(same.version, 1);

        // Spec change bumps generation and version
        let updated = store.apply_spec(spec("api", "app:v2")).await.unwrap();
        assert_eq!(updated.generation, 2);
        assert_eq!(updated.version, 2);

        // CAS succeeds at the current version
        let mut status = updated.status.clone();
        status.current_step_index = Some(0);
        let written = store
            .update_status(updated.id, status.clone(), updated.version)
            .await
            .unwrap();
        assert_eq!(written.version, 3);
        assert_eq!(written.status.current_step_index, Some(0));

        // CAS with a stale version is rejected
        let err = store
            .update_status(updated.id, status, updated.version)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Lookup and list
        assert_eq!(store.get("api").await.unwrap().id, record.id);
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(matches!(
            store.get("missing").await.unwrap_err(),
            ControllerError::NotFound(_)
        ));

        // Delete stops further reads
        store.delete("api").await.unwrap();
        assert!(matches!(
            store.get_by_id(record.id).await.unwrap_err(),
            ControllerError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn memory_store_contract() {
        exercise_store(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        exercise_store(&SqliteStore::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollouts.db");

        let id = {
            let store = SqliteStore::open(&path).unwrap();
            let record = store.apply_spec(spec("api", "app:v1")).await.unwrap();
            let mut status = record.status.clone();
            status.current_step_index = Some(1);
            status.current_step_weight = 20;
            store
                .update_status(record.id, status, record.version)
                .await
                .unwrap();
            record.id
        };

        let store = SqliteStore::open(&path).unwrap();
        let record = store.get_by_id(id).await.unwrap();
        assert_eq!(record.status.current_step_index, Some(1));
        assert_eq!(record.status.current_step_weight, 20);
    }
}
