//! Session store backed by redb.
//!
//! Provides persistent storage for issued sessions with:
//! - In-memory cache for hot sessions
//! - Revocation by IdP session index (Single Logout)
//! - TTL-based expiry

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::replay::ReplayCache;

use super::types::{Session, SessionId};

/// redb table for sessions (key: session_id hex, value: MessagePack
/// bytes).
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sp_sessions");

/// Session store with in-memory cache and persistent storage.
pub struct SessionStore {
    /// redb database handle, shared with the replay cache.
    db: Arc<Database>,

    /// In-memory cache for frequently accessed sessions.
    cache: RwLock<HashMap<SessionId, Session>>,

    /// Default session TTL in seconds.
    default_ttl_secs: u64,

    /// Maximum number of sessions to keep in cache.
    max_cache_size: usize,
}

impl SessionStore {
    /// Open or create a session store at the given path.
    pub fn open(path: PathBuf, default_ttl_secs: u64) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("create {parent:?}: {e}")))?;
        }

        let db = Database::create(&path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS_TABLE)?;
        }
        write_txn.commit()?;

        let cache = Self::load_active_sessions(&db)?;
        debug!(sessions = cache.len(), "Loaded active sessions into cache");

        Ok(Self {
            db: Arc::new(db),
            cache: RwLock::new(cache),
            default_ttl_secs,
            max_cache_size: 10_000,
        })
    }

    /// Default TTL in seconds.
    pub fn default_ttl_secs(&self) -> u64 {
        self.default_ttl_secs
    }

    /// A replay cache sharing this store's database.
    pub fn replay_cache(&self) -> Result<ReplayCache, StoreError> {
        ReplayCache::new(Arc::clone(&self.db))
    }

    /// Persist a new session and add it to the cache.
    pub fn create(&self, session: Session) -> Result<SessionId, StoreError> {
        let id = session.id;
        self.persist(&session)?;

        if let Ok(mut cache) = self.cache.write() {
            if cache.len() >= self.max_cache_size {
                Self::evict_cache_oldest(&mut cache);
            }
            cache.insert(id, session);
        }

        Ok(id)
    }

    /// Get a session by ID, updating its last access time.
    pub fn get(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        if let Ok(mut cache) = self.cache.write() {
            if let Some(session) = cache.get_mut(&id) {
                if session.is_expired() {
                    cache.remove(&id);
                    // The database copy is left for the cleanup sweep.
                    return Ok(None);
                }
                session.touch();
                let updated = session.clone();
                drop(cache);
                let _ = self.persist(&updated);
                return Ok(Some(updated));
            }
        }

        let found = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SESSIONS_TABLE)?;
            let key = id.to_hex();
            match table.get(key.as_str())? {
                Some(value) => Some(rmp_serde::from_slice::<Session>(value.value())?),
                None => None,
            }
        };

        match found {
            Some(mut session) => {
                if session.is_expired() {
                    return Ok(None);
                }
                session.touch();

                if let Ok(mut cache) = self.cache.write() {
                    cache.insert(id, session.clone());
                }
                let _ = self.persist(&session);
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Delete a session by ID.
    pub fn delete(&self, id: SessionId) -> Result<bool, StoreError> {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&id);
        }

        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            let key = id.to_hex();
            let x = table.remove(key.as_str())?.is_some();
            x
        };
        write_txn.commit()?;

        Ok(removed)
    }

    /// Revoke every session sharing an IdP session index. Returns the
    /// number of sessions removed.
    pub fn invalidate_by_session_index(&self, session_index: &str) -> Result<usize, StoreError> {
        let matching: Vec<SessionId> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SESSIONS_TABLE)?;

            let mut ids = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let session: Session = rmp_serde::from_slice(value.value())?;
                if session.session_index.as_deref() == Some(session_index) {
                    ids.push(session.id);
                }
            }
            ids
        };

        let mut revoked = 0;
        for id in matching {
            if self.delete(id)? {
                revoked += 1;
            }
        }

        Ok(revoked)
    }

    /// Evict all expired sessions. Returns the number removed from the
    /// database.
    pub fn evict_expired(&self) -> Result<usize, StoreError> {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, session| !session.is_expired());
        }

        let expired: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SESSIONS_TABLE)?;

            let mut keys = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                match rmp_serde::from_slice::<Session>(value.value()) {
                    Ok(session) if session.is_expired() => {
                        keys.push(key.value().to_string());
                    }
                    Err(e) => {
                        warn!(key = key.value(), error = %e, "Unreadable session record, removing");
                        keys.push(key.value().to_string());
                    }
                    _ => {}
                }
            }
            keys
        };

        if expired.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            for key in &expired {
                table.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;

        Ok(expired.len())
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> Result<usize, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;
        Ok(table.len()? as usize)
    }

    /// Persist a session to the database.
    fn persist(&self, session: &Session) -> Result<(), StoreError> {
        let data = rmp_serde::to_vec(session)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            table.insert(session.id.to_hex().as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load all non-expired sessions into the cache.
    fn load_active_sessions(db: &Database) -> Result<HashMap<SessionId, Session>, StoreError> {
        let mut sessions = HashMap::new();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;

        for entry in table.iter()? {
            let (_, value) = entry?;
            match rmp_serde::from_slice::<Session>(value.value()) {
                Ok(session) if !session.is_expired() => {
                    sessions.insert(session.id, session);
                }
                _ => {}
            }
        }

        Ok(sessions)
    }

    /// Evict the least recently accessed session from the cache.
    fn evict_cache_oldest(cache: &mut HashMap<SessionId, Session>) {
        if let Some(oldest_id) = cache
            .iter()
            .min_by_key(|(_, s)| s.last_accessed)
            .map(|(id, _)| *id)
        {
            cache.remove(&oldest_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn test_store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("sessions.redb"), 3600).unwrap();
        (store, dir)
    }

    fn test_session(name_id: &str, session_index: Option<&str>) -> Session {
        let mut session = Session::new(
            name_id.to_string(),
            "https://sp.example.com".to_string(),
            "https://idp.example.com".to_string(),
            3600,
        );
        session.session_index = session_index.map(str::to_string);
        session
    }

    #[test]
    fn test_create_and_get() {
        let (store, _dir) = test_store();

        let session = test_session("jdoe", Some("sess-1"));
        let id = session.id;
        store.create(session).unwrap();

        let retrieved = store.get(id).unwrap().unwrap();
        assert_eq!(retrieved.name_id, "jdoe");
        assert_eq!(retrieved.session_index.as_deref(), Some("sess-1"));
        assert_eq!(store.default_ttl_secs(), 3600);
    }

    #[test]
    fn test_expired_session_not_returned() {
        let (store, _dir) = test_store();

        let mut session = test_session("jdoe", None);
        session.expires_at = Utc::now() - chrono::Duration::seconds(10);
        let id = session.id;
        store.create(session).unwrap();

        assert!(store.get(id).unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let (store, _dir) = test_store();

        let session = test_session("jdoe", None);
        let id = session.id;
        store.create(session).unwrap();
        assert!(store.get(id).unwrap().is_some());

        assert!(store.delete(id).unwrap());
        assert!(store.get(id).unwrap().is_none());
        assert!(!store.delete(id).unwrap());
    }

    #[test]
    fn test_invalidate_by_session_index() {
        let (store, _dir) = test_store();

        let a = test_session("jdoe", Some("shared"));
        let b = test_session("jdoe", Some("shared"));
        let c = test_session("other", Some("different"));
        let (id_a, id_b, id_c) = (a.id, b.id, c.id);
        store.create(a).unwrap();
        store.create(b).unwrap();
        store.create(c).unwrap();

        assert_eq!(store.invalidate_by_session_index("shared").unwrap(), 2);
        assert!(store.get(id_a).unwrap().is_none());
        assert!(store.get(id_b).unwrap().is_none());
        assert!(store.get(id_c).unwrap().is_some());

        assert_eq!(store.invalidate_by_session_index("shared").unwrap(), 0);
    }

    #[test]
    fn test_evict_expired() {
        let (store, _dir) = test_store();

        let mut stale = test_session("stale", None);
        stale.expires_at = Utc::now() - chrono::Duration::seconds(10);
        store.create(stale).unwrap();
        store.create(test_session("live", None)).unwrap();

        assert_eq!(store.evict_expired().unwrap(), 1);
        assert_eq!(store.session_count().unwrap(), 1);
    }

    #[test]
    fn test_replay_cache_shares_database() {
        let (store, _dir) = test_store();
        let replay = store.replay_cache().unwrap();

        let expiry = Utc::now() + chrono::Duration::seconds(300);
        assert!(replay.check_and_mark("assertion-1", expiry).unwrap());
        assert!(!replay.check_and_mark("assertion-1", expiry).unwrap());

        // Sessions are unaffected by replay entries.
        assert_eq!(store.session_count().unwrap(), 0);
    }
}
