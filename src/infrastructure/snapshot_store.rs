use crate::domain::models::CachedRecord;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait SnapshotStore: Send + Sync {
    fn get(&self, username: &str) -> Result<Option<CachedRecord>, InfraError>;
    /// Upsert by username; the stored record is replaced wholesale.
    fn put(&self, record: &CachedRecord) -> Result<(), InfraError>;
}

fn normalized_username(username: &str) -> Option<String> {
    let normalized = username.trim();
    if normalized.is_empty() {
        return None;
    }
    Some(normalized.to_string())
}

#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    db_path: PathBuf,
}

impl SqliteSnapshotStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn get(&self, username: &str) -> Result<Option<CachedRecord>, InfraError> {
        let Some(username) = normalized_username(username) else {
            return Ok(None);
        };
        let connection = self.connect()?;
        let row: Option<(String, String)> = connection
            .query_row(
                "SELECT payload, last_updated FROM profile_cache WHERE username = ?1",
                params![username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload, last_updated_raw)) = row else {
            return Ok(None);
        };

        let last_updated = DateTime::parse_from_rfc3339(&last_updated_raw).map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid profile_cache.last_updated '{}': {error}",
                last_updated_raw
            ))
        })?;

        Ok(Some(CachedRecord {
            username,
            payload,
            last_updated: last_updated.with_timezone(&Utc),
        }))
    }

    fn put(&self, record: &CachedRecord) -> Result<(), InfraError> {
        let username = normalized_username(&record.username).ok_or_else(|| {
            InfraError::InvalidConfig("username is required for cache upsert".to_string())
        })?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO profile_cache (username, payload, last_updated)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(username) DO UPDATE SET
               payload = excluded.payload,
               last_updated = excluded.last_updated",
            params![username, record.payload, record.last_updated.to_rfc3339()],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    records: Mutex<HashMap<String, CachedRecord>>,
}

impl SnapshotStore for InMemorySnapshotStore {
    fn get(&self, username: &str) -> Result<Option<CachedRecord>, InfraError> {
        let Some(username) = normalized_username(username) else {
            return Ok(None);
        };
        let records = self
            .records
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("snapshot cache lock poisoned: {error}")))?;
        Ok(records.get(&username).cloned())
    }

    fn put(&self, record: &CachedRecord) -> Result<(), InfraError> {
        let username = normalized_username(&record.username).ok_or_else(|| {
            InfraError::InvalidConfig("username is required for cache upsert".to_string())
        })?;
        let mut records = self
            .records
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("snapshot cache lock poisoned: {error}")))?;
        records.insert(username, record.clone());
        Ok(())
    }
}
