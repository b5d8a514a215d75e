use crate::notifier::Marker;
use crate::record::Record;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use thiserror::Error;
use tracing::{debug, warn};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

#[derive(Debug, Error)]
pub enum StorageWriteError {
    #[error("failed to serialize {key}: {source}")]
    Serialize {
        key: String,
        source: serde_json::Error,
    },
    #[error("failed to write {key}: {source}")]
    Database {
        key: String,
        source: rusqlite::Error,
    },
}

fn snapshot_key(name: &str) -> String {
    format!("snapshot.{}", name)
}

fn marker_key(name: &str) -> String {
    format!("marker.{}", name)
}

/// Key-value persistence shared by every rosterd process on a workspace.
///
/// Reads fail closed: a missing or corrupt value is reported as absent.
pub struct MirrorStore<'a> {
    conn: &'a Connection,
}

impl<'a> MirrorStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        match self
            .conn
            .query_row("SELECT value FROM local_store WHERE key = ?", [key], |r| {
                r.get::<_, String>(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "local store read failed");
                None
            }
        }
    }

    pub fn put_raw(&self, key: &str, value: &str) -> Result<(), StorageWriteError> {
        self.conn
            .execute(
                "INSERT INTO local_store(key, value, updated_at)
                 VALUES(?, ?, strftime('%Y-%m-%dT%H:%M:%fZ','now'))
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                (key, value),
            )
            .map_err(|source| StorageWriteError::Database {
                key: key.to_string(),
                source,
            })?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageWriteError> {
        self.conn
            .execute("DELETE FROM local_store WHERE key = ?", [key])
            .map_err(|source| StorageWriteError::Database {
                key: key.to_string(),
                source,
            })?;
        Ok(())
    }

    pub fn load(&self, name: &str) -> Vec<Record> {
        let key = snapshot_key(name);
        let Some(text) = self.get_raw(&key) else {
            return Vec::new();
        };
        let values: Vec<serde_json::Value> = match serde_json::from_str(&text) {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(_) => {
                warn!(key = %key, "mirror snapshot is not a list; treating as empty");
                return Vec::new();
            }
            Err(e) => {
                warn!(key = %key, error = %e, "mirror snapshot is corrupt; treating as empty");
                return Vec::new();
            }
        };
        let total = values.len();
        let records: Vec<Record> = values.into_iter().filter_map(Record::from_value).collect();
        if records.len() != total {
            warn!(key = %key, skipped = total - records.len(), "skipped non-object mirror entries");
        }
        records
    }

    pub fn save(&self, name: &str, records: &[Record]) -> Result<(), StorageWriteError> {
        let key = snapshot_key(name);
        let text = serde_json::to_string(records).map_err(|source| StorageWriteError::Serialize {
            key: key.clone(),
            source,
        })?;
        self.put_raw(&key, &text)?;
        debug!(key = %key, records = records.len(), "mirror snapshot saved");
        Ok(())
    }

    pub fn read_marker(&self, name: &str) -> Option<Marker> {
        let text = self.get_raw(&marker_key(name))?;
        match serde_json::from_str::<Marker>(&text) {
            Ok(m) => Some(m),
            // Bare timestamps, as a plain page script would write them.
            Err(_) => text.trim().parse::<i64>().ok().map(|at_ms| Marker {
                at_ms,
                origin: String::new(),
            }),
        }
    }

    /// Read-modify-write of one marker under a write lock, so concurrent
    /// processes never compute their next value from the same previous one.
    pub fn update_marker(
        &self,
        name: &str,
        next: impl FnOnce(Option<Marker>) -> Marker,
    ) -> Result<Marker, StorageWriteError> {
        let db_err = |source| StorageWriteError::Database {
            key: marker_key(name),
            source,
        };
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let marker = next(self.read_marker(name));
        self.write_marker(name, &marker)?;
        tx.commit().map_err(db_err)?;
        Ok(marker)
    }

    pub fn write_marker(&self, name: &str, marker: &Marker) -> Result<(), StorageWriteError> {
        let key = marker_key(name);
        let text = serde_json::to_string(marker).map_err(|source| StorageWriteError::Serialize {
            key: key.clone(),
            source,
        })?;
        self.put_raw(&key, &text)
    }
}
