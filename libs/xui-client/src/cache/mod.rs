use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::session::Session;

#[cfg(feature = "redis-cache")]
pub mod redis;

#[cfg(feature = "redis-cache")]
pub use redis::RedisSessionStore;

/// Keyed session storage, one entry per panel. The manager owns the
/// single-flight discipline; a store only has to be safe for concurrent
/// per-key reads and writes.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, panel_id: i64) -> Result<Option<Session>, Error>;
    async fn store(&self, session: &Session) -> Result<(), Error>;
    async fn remove(&self, panel_id: i64) -> Result<(), Error>;
}

/// Default in-process store. Expired entries are dropped on read; the
/// manager treats a missing entry and an expired one the same way.
pub struct MemorySessionStore {
    entries: Mutex<HashMap<i64, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, panel_id: i64) -> Result<Option<Session>, Error> {
        let mut entries = self.entries.lock().await;
        if let Some(session) = entries.get(&panel_id) {
            if session.is_expired() {
                entries.remove(&panel_id);
                return Ok(None);
            }
            return Ok(Some(session.clone()));
        }
        Ok(None)
    }

    async fn store(&self, session: &Session) -> Result<(), Error> {
        self.entries
            .lock()
            .await
            .insert(session.panel_id, session.clone());
        Ok(())
    }

    async fn remove(&self, panel_id: i64) -> Result<(), Error> {
        self.entries.lock().await.remove(&panel_id);
        Ok(())
    }
}
