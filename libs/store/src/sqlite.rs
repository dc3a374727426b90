//! Durable store variant: one SQLite file, one table ("bucket") per
//! collection, values JSON-encoded under the key's textual form.

use std::marker::PhantomData;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{Store, StoreError};

/// A [`Store`] persisted to a single SQLite file.
///
/// Keys must have a canonical textual form (`ToString`); UUIDs qualify.
pub struct SqliteStore<K, V> {
    conn: Option<Connection>,
    bucket: String,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> SqliteStore<K, V> {
    /// Open or create the store file and its bucket table.
    ///
    /// The file is chmod'd to 0600: it holds the full task history of the
    /// process that owns it.
    pub fn open<P: AsRef<Path>>(path: P, bucket: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        let store = SqliteStore {
            conn: Some(conn),
            bucket: bucket.to_string(),
            _marker: PhantomData,
        };
        store.init_schema()?;
        debug!(bucket, "store opened");
        Ok(store)
    }

    /// Open a store backed by an in-memory database (for tests).
    pub fn in_memory(bucket: &str) -> Result<Self, StoreError> {
        let store = SqliteStore {
            conn: Some(Connection::open_in_memory()?),
            bucket: bucket.to_string(),
            _marker: PhantomData,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            self.bucket
        ))?;
        Ok(())
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "store is closed",
            ))
        })
    }
}

impl<K, V> Store<K, V> for SqliteStore<K, V>
where
    K: ToString,
    V: Serialize + DeserializeOwned,
{
    fn list(&self) -> Result<Vec<V>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT value FROM \"{}\"", self.bucket))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut values = Vec::new();
        for row in rows {
            values.push(serde_json::from_str(&row?)?);
        }
        Ok(values)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self.conn()?.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", self.bucket),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn get(&self, key: &K) -> Result<V, StoreError> {
        let encoded: Option<String> = self
            .conn()?
            .query_row(
                &format!("SELECT value FROM \"{}\" WHERE key = ?1", self.bucket),
                params![key.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match encoded {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StoreError::NotFound),
        }
    }

    fn put(&mut self, key: K, value: V) -> Result<(), StoreError> {
        let json = serde_json::to_string(&value)?;
        self.conn()?.execute(
            &format!(
                "INSERT INTO \"{}\" (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                self.bucket
            ),
            params![key.to_string(), json],
        )?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, err)| StoreError::Sqlite(err))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use uuid::Uuid;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        size: i64,
    }

    #[test]
    fn test_put_get_roundtrip() {
        let mut store: SqliteStore<Uuid, Record> = SqliteStore::in_memory("tasks").unwrap();
        let key = Uuid::new_v4();
        let record = Record {
            name: "web".into(),
            size: 42,
        };

        store.put(key, record.clone()).unwrap();
        assert_eq!(store.get(&key).unwrap(), record);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_put_replaces_existing_value() {
        let mut store: SqliteStore<Uuid, Record> = SqliteStore::in_memory("tasks").unwrap();
        let key = Uuid::new_v4();
        store
            .put(
                key,
                Record {
                    name: "a".into(),
                    size: 1,
                },
            )
            .unwrap();
        store
            .put(
                key,
                Record {
                    name: "b".into(),
                    size: 2,
                },
            )
            .unwrap();

        assert_eq!(store.get(&key).unwrap().name, "b");
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let store: SqliteStore<Uuid, Record> = SqliteStore::in_memory("tasks").unwrap();
        assert!(matches!(
            store.get(&Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_survives_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.db");
        let key = Uuid::new_v4();

        let mut store: SqliteStore<Uuid, Record> = SqliteStore::open(&path, "tasks").unwrap();
        store
            .put(
                key,
                Record {
                    name: "durable".into(),
                    size: 7,
                },
            )
            .unwrap();
        store.close().unwrap();

        let reopened: SqliteStore<Uuid, Record> = SqliteStore::open(&path, "tasks").unwrap();
        assert_eq!(reopened.get(&key).unwrap().name, "durable");
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.db");
        let _store: SqliteStore<Uuid, Record> = SqliteStore::open(&path, "tasks").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_buckets_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.db");
        let key = Uuid::new_v4();

        let mut tasks: SqliteStore<Uuid, Record> = SqliteStore::open(&path, "tasks").unwrap();
        tasks
            .put(
                key,
                Record {
                    name: "t".into(),
                    size: 1,
                },
            )
            .unwrap();
        tasks.close().unwrap();

        let events: SqliteStore<Uuid, Record> = SqliteStore::open(&path, "taskEvents").unwrap();
        assert_eq!(events.count().unwrap(), 0);
        assert!(matches!(events.get(&key), Err(StoreError::NotFound)));
    }
}
