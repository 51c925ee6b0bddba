use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::error::Error;
use crate::session::Session;

use super::SessionStore;

fn cache_err(e: impl std::fmt::Display) -> Error {
    Error::Cache(e.to_string())
}

/// Redis-backed session store for deployments where several workers
/// share panel sessions. Entries carry a TTL matching the session
/// expiry, so Redis evicts them on its own.
pub struct RedisSessionStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url).map_err(cache_err)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(cache_err)?;
        info!("Redis session store connected");
        Ok(Self { conn })
    }

    fn key(panel_id: i64) -> String {
        format!("xui:session:{}", panel_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, panel_id: i64) -> Result<Option<Session>, Error> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::key(panel_id))
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, session: &Session) -> Result<(), Error> {
        let ttl = (session.expires_at - Utc::now()).num_seconds().max(1);
        let json = serde_json::to_string(session)?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SETEX")
            .arg(Self::key(session.panel_id))
            .arg(ttl)
            .arg(json)
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn remove(&self, panel_id: i64) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(Self::key(panel_id))
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(())
    }
}
