use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::SessionStore;
use crate::error::Error;
use crate::models::{ApiEnvelope, Panel};
use crate::retry::{RetryPolicy, execute_with_retry};
use crate::transport::{PanelRequest, PanelTransport};

/// An authenticated cookie for one panel. `expires_at` comes from the
/// login cookie's Max-Age when the panel declares one, otherwise from
/// the configured default TTL. It is a local heuristic either way, and
/// a mid-TTL rejection still triggers re-authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub panel_id: i64,
    pub cookie: String,
    pub obtained_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Obtains and caches one live session per panel. Concurrent callers
/// for the same panel share a single login request; panels do not block
/// each other.
pub struct SessionManager {
    transport: Arc<dyn PanelTransport>,
    store: Arc<dyn SessionStore>,
    policy: RetryPolicy,
    default_ttl: Duration,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn PanelTransport>,
        store: Arc<dyn SessionStore>,
        policy: RetryPolicy,
        default_ttl: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            policy,
            default_ttl,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn panel_lock(&self, panel_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(panel_id).or_default().clone()
    }

    /// Returns the cached session when still valid, otherwise logs in
    /// and caches the result. The per-panel lock is held across the
    /// login call, so a second caller waits and then reuses the first
    /// caller's cookie instead of issuing its own login.
    pub async fn get_session(&self, panel: &Panel) -> Result<Session, Error> {
        if let Some(session) = self.store.load(panel.id).await? {
            if !session.is_expired() {
                return Ok(session);
            }
        }

        let lock = self.panel_lock(panel.id).await;
        let _guard = lock.lock().await;

        // Re-check under the lock: the previous holder may have just
        // stored a fresh session.
        if let Some(session) = self.store.load(panel.id).await? {
            if !session.is_expired() {
                debug!(panel_id = panel.id, "reusing session obtained by concurrent caller");
                return Ok(session);
            }
        }

        let session = self.authenticate(panel).await?;
        self.store.store(&session).await?;
        Ok(session)
    }

    /// Logs in with the panel credentials. Credential rejections are
    /// not retried and nothing gets cached for them; transport failures
    /// go through the bounded retry budget.
    pub async fn authenticate(&self, panel: &Panel) -> Result<Session, Error> {
        let request = PanelRequest::post_form(
            panel.endpoint("/login"),
            None,
            vec![
                ("username".to_string(), panel.username.clone()),
                ("password".to_string(), panel.password.clone()),
            ],
            self.policy.request_timeout,
        );

        let response = execute_with_retry(
            self.transport.as_ref(),
            &self.policy,
            panel.id,
            request,
            self.policy.max_attempts,
        )
        .await?;

        if response.status == 401 || response.status == 403 {
            return Err(Error::Authentication {
                panel_id: panel.id,
                message: format!("login rejected with status {}", response.status),
            });
        }
        if !response.is_success() {
            return Err(Error::Api {
                panel_id: panel.id,
                status: response.status,
                message: "unexpected login response".to_string(),
            });
        }

        let envelope: ApiEnvelope<serde_json::Value> = response.json()?;
        if !envelope.success {
            return Err(Error::Authentication {
                panel_id: panel.id,
                message: envelope.msg,
            });
        }

        let raw_cookie = response.set_cookie.as_deref().ok_or(Error::Api {
            panel_id: panel.id,
            status: response.status,
            message: "login response carried no session cookie".to_string(),
        })?;
        let (cookie, declared_ttl) = parse_set_cookie(raw_cookie);
        let ttl = declared_ttl.unwrap_or(self.default_ttl);

        let now = Utc::now();
        let session = Session {
            panel_id: panel.id,
            cookie,
            obtained_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1)),
        };
        info!(panel_id = panel.id, ttl_secs = ttl.as_secs(), "authenticated against panel");
        Ok(session)
    }

    /// Drops the cached session; the next `get_session` re-authenticates.
    pub async fn invalidate(&self, panel: &Panel) -> Result<(), Error> {
        debug!(panel_id = panel.id, "invalidating cached session");
        self.store.remove(panel.id).await
    }
}

/// Splits a Set-Cookie header into the bare `name=value` pair and the
/// declared Max-Age, when present.
fn parse_set_cookie(header: &str) -> (String, Option<Duration>) {
    let mut parts = header.split(';');
    let pair = parts.next().unwrap_or(header).trim().to_string();
    let mut max_age = None;
    for attr in parts {
        let attr = attr.trim();
        if let Some(value) = attr
            .strip_prefix("Max-Age=")
            .or_else(|| attr.strip_prefix("max-age="))
        {
            if let Ok(secs) = value.parse::<u64>() {
                if secs > 0 {
                    max_age = Some(Duration::from_secs(secs));
                }
            }
        }
    }
    (pair, max_age)
}
