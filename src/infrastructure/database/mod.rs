//! SQLite session store - keeps the login and sync position between runs

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::application::errors::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub device_id: String,
    pub access_token: String,
    pub next_batch: Option<String>,
}

pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Serialization("session store lock poisoned".to_string()))
    }

    pub fn load(&self, user_id: &str) -> Result<Option<Session>, StorageError> {
        let conn = self.lock()?;
        let session = conn
            .query_row(
                "SELECT user_id, device_id, access_token, next_batch FROM sessions WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(Session {
                        user_id: row.get(0)?,
                        device_id: row.get(1)?,
                        access_token: row.get(2)?,
                        next_batch: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    pub fn save(&self, session: &Session) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (user_id, device_id, access_token, next_batch, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(user_id) DO UPDATE SET
                device_id = excluded.device_id,
                access_token = excluded.access_token,
                next_batch = excluded.next_batch,
                updated_at = excluded.updated_at",
            rusqlite::params![
                session.user_id,
                session.device_id,
                session.access_token,
                session.next_batch
            ],
        )?;
        Ok(())
    }

    pub fn update_next_batch(&self, user_id: &str, next_batch: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE sessions SET next_batch = ?1, updated_at = datetime('now') WHERE user_id = ?2",
            [next_batch, user_id],
        )?;
        Ok(rows > 0)
    }

    /// Forget the session, e.g. after the server rejected the token
    pub fn clear(&self, user_id: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id])?;
        Ok(rows > 0)
    }
}

fn init_tables(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            user_id TEXT PRIMARY KEY NOT NULL,
            device_id TEXT NOT NULL,
            access_token TEXT NOT NULL,
            next_batch TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            user_id: "@bot:h".into(),
            device_id: "DEV".into(),
            access_token: "token".into(),
            next_batch: None,
        }
    }

    #[test]
    fn save_and_load() {
        let store = SessionStore::in_memory().unwrap();
        assert_eq!(store.load("@bot:h").unwrap(), None);

        store.save(&session()).unwrap();
        assert_eq!(store.load("@bot:h").unwrap(), Some(session()));
    }

    #[test]
    fn next_batch_is_updated() {
        let store = SessionStore::in_memory().unwrap();
        assert!(!store.update_next_batch("@bot:h", "s1").unwrap());

        store.save(&session()).unwrap();
        assert!(store.update_next_batch("@bot:h", "s2").unwrap());
        assert_eq!(store.load("@bot:h").unwrap().unwrap().next_batch.as_deref(), Some("s2"));
    }

    #[test]
    fn save_overwrites_and_clear_removes() {
        let store = SessionStore::in_memory().unwrap();
        store.save(&session()).unwrap();

        let mut updated = session();
        updated.access_token = "fresh".into();
        store.save(&updated).unwrap();
        assert_eq!(store.load("@bot:h").unwrap().unwrap().access_token, "fresh");

        assert!(store.clear("@bot:h").unwrap());
        assert_eq!(store.load("@bot:h").unwrap(), None);
    }

    #[test]
    fn persists_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bot.db");
        SessionStore::new(&path).unwrap().save(&session()).unwrap();

        let reopened = SessionStore::new(&path).unwrap();
        assert_eq!(reopened.load("@bot:h").unwrap(), Some(session()));
    }
}
