//! Local cache: an embedded key/value store holding one msgpack blob per
//! collection. Local-only mode runs entirely off this store; remote mode
//! uses it as a write-through cache so a restart can hydrate instantly.

use rusqlite::Connection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::StorageError;

/// Collection blob keys. All live under a single namespace so unrelated
/// keys in a shared store are never touched.
pub mod keys {
    pub const PROJECTS: &str = "taskdeck/projects";
    pub const TASKS: &str = "taskdeck/tasks";
    pub const TODOS: &str = "taskdeck/todos";
    pub const TAGS: &str = "taskdeck/tags";
    pub const NOTES: &str = "taskdeck/notes";
}

pub trait LocalStore {
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn write_blob(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn remove_blob(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Decode a stored collection blob. A corrupt blob is treated the same as
/// an absent one; losing the cache is recoverable, failing startup is not.
pub fn read_collection<T, S>(store: &S, key: &str) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    S: LocalStore + ?Sized,
{
    let Some(bytes) = store.read_blob(key)? else {
        return Ok(None);
    };
    match rmp_serde::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key, error = %e, "corrupt cache blob, discarding");
            Ok(None)
        }
    }
}

pub fn write_collection<T, S>(store: &mut S, key: &str, value: &T) -> Result<(), StorageError>
where
    T: Serialize,
    S: LocalStore + ?Sized,
{
    let bytes = rmp_serde::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    store.write_blob(key, &bytes)
}

pub struct SqliteLocalStore {
    conn: Connection,
}

impl SqliteLocalStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl LocalStore for SqliteLocalStore {
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query_map(rusqlite::params![key], |row| row.get::<_, Vec<u8>>(0))?;
        match rows.next() {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn write_blob(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                 updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
            rusqlite::params![key, bytes],
        )?;
        Ok(())
    }

    fn remove_blob(&mut self, key: &str) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
        Ok(())
    }
}
