use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{MemorySessionStore, SessionStore};
use crate::error::Error;
use crate::models::{
    ApiEnvelope, ClientSpec, ClientStat, ClientTraffic, Inbound, Panel, PanelStatus,
    RemoteClientConfig,
};
use crate::retry::{RetryPolicy, execute_with_retry};
use crate::session::{Session, SessionManager};
use crate::transport::{HttpTransport, PanelRequest, PanelResponse, PanelTransport};

/// Typed client for the 3x-UI inbound/client API. Each call obtains a
/// session, issues the request with the session cookie, and on a
/// rejected cookie re-authenticates and retries the call exactly once.
/// The client never writes to the caller's account mirror; it returns
/// data and the caller persists it.
#[derive(Clone)]
pub struct PanelClient {
    transport: Arc<dyn PanelTransport>,
    sessions: Arc<SessionManager>,
    policy: RetryPolicy,
}

impl PanelClient {
    /// HTTP transport, in-memory session store, default retry policy.
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(HttpTransport::new()),
            Arc::new(MemorySessionStore::new()),
            RetryPolicy::default(),
            Duration::from_secs(3600),
        )
    }

    pub fn with_parts(
        transport: Arc<dyn PanelTransport>,
        store: Arc<dyn SessionStore>,
        policy: RetryPolicy,
        session_ttl: Duration,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            transport.clone(),
            store,
            policy.clone(),
            session_ttl,
        ));
        Self {
            transport,
            sessions,
            policy,
        }
    }

    pub async fn get_session(&self, panel: &Panel) -> Result<Session, Error> {
        self.sessions.get_session(panel).await
    }

    pub async fn invalidate(&self, panel: &Panel) -> Result<(), Error> {
        self.sessions.invalidate(panel).await
    }

    pub async fn list_inbounds(&self, panel: &Panel) -> Result<Vec<Inbound>, Error> {
        let url = panel.endpoint("/panel/api/inbounds/list");
        let response = self
            .call(panel, self.policy.max_attempts, |s| {
                PanelRequest::get(url.clone(), Some(s.cookie.clone()), self.policy.request_timeout)
            })
            .await?;
        let envelope: ApiEnvelope<Vec<Inbound>> = self.decode(panel, &response)?;
        if !envelope.success {
            return Err(Error::Api {
                panel_id: panel.id,
                status: response.status,
                message: envelope.msg,
            });
        }
        Ok(envelope.obj.unwrap_or_default())
    }

    /// Provisions a client inside an inbound. Issued once, never
    /// replayed: an ambiguous network failure surfaces as `Unreachable`
    /// and the caller decides whether the account exists.
    pub async fn create_client(
        &self,
        panel: &Panel,
        inbound_id: i64,
        spec: &ClientSpec,
    ) -> Result<RemoteClientConfig, Error> {
        let uuid = spec.uuid.unwrap_or_else(Uuid::new_v4);
        let body = add_client_body(inbound_id, spec, &uuid);
        let url = panel.endpoint(&format!("/panel/api/inbounds/{}/addClient", inbound_id));

        let response = self
            .call(panel, 1, |s| {
                PanelRequest::post_json(
                    url.clone(),
                    Some(s.cookie.clone()),
                    body.clone(),
                    self.policy.request_timeout,
                )
            })
            .await?;
        let envelope: ApiEnvelope<serde_json::Value> = self.decode(panel, &response)?;
        if !envelope.success {
            return Err(Error::ClientCreation {
                panel_id: panel.id,
                message: envelope.msg,
            });
        }

        info!(
            panel_id = panel.id,
            inbound_id,
            email = %spec.email,
            "client provisioned"
        );
        // Some panel builds echo nothing back on addClient; the config
        // is then derived from the accepted spec.
        Ok(RemoteClientConfig {
            panel_id: panel.id,
            inbound_id,
            uuid,
            email: spec.email.clone(),
            traffic_limit: spec.traffic_limit,
            traffic_used: 0,
            expires_at: spec.expires_at,
        })
    }

    /// Rewrites an existing client's limits, used for plan renewal.
    /// Same single-shot rule as `create_client`.
    pub async fn update_client(
        &self,
        panel: &Panel,
        inbound_id: i64,
        uuid: &Uuid,
        spec: &ClientSpec,
    ) -> Result<RemoteClientConfig, Error> {
        let body = add_client_body(inbound_id, spec, uuid);
        let url = panel.endpoint(&format!(
            "/panel/api/inbounds/{}/updateClient/{}",
            inbound_id, uuid
        ));

        let response = self
            .call(panel, 1, |s| {
                PanelRequest::post_json(
                    url.clone(),
                    Some(s.cookie.clone()),
                    body.clone(),
                    self.policy.request_timeout,
                )
            })
            .await?;
        let envelope: ApiEnvelope<serde_json::Value> = self.decode(panel, &response)?;
        if !envelope.success {
            return Err(Error::ClientCreation {
                panel_id: panel.id,
                message: envelope.msg,
            });
        }

        info!(panel_id = panel.id, inbound_id, %uuid, "client updated");
        Ok(RemoteClientConfig {
            panel_id: panel.id,
            inbound_id,
            uuid: *uuid,
            email: spec.email.clone(),
            traffic_limit: spec.traffic_limit,
            traffic_used: 0,
            expires_at: spec.expires_at,
        })
    }

    /// Usage counters for one client. Idempotent, retried within the
    /// policy budget on transport failures.
    pub async fn get_client_traffic(
        &self,
        panel: &Panel,
        uuid: &Uuid,
    ) -> Result<ClientTraffic, Error> {
        let url = panel.endpoint(&format!("/panel/api/inbounds/getClientTrafficsById/{}", uuid));
        let response = self
            .call(panel, self.policy.max_attempts, |s| {
                PanelRequest::get(url.clone(), Some(s.cookie.clone()), self.policy.request_timeout)
            })
            .await?;
        let envelope: ApiEnvelope<Vec<ClientStat>> = self.decode(panel, &response)?;
        if !envelope.success {
            return Err(Error::Api {
                panel_id: panel.id,
                status: response.status,
                message: envelope.msg,
            });
        }
        let stat = envelope
            .obj
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| Error::Api {
                panel_id: panel.id,
                status: response.status,
                message: format!("no traffic recorded for client {}", uuid),
            })?;
        Ok(stat.traffic())
    }

    /// Removes a client. Idempotent to the caller: deleting a client
    /// that is already gone counts as success, so a retry after an
    /// ambiguous failure cannot turn into an error.
    pub async fn delete_client(
        &self,
        panel: &Panel,
        inbound_id: i64,
        uuid: &Uuid,
    ) -> Result<(), Error> {
        let url = panel.endpoint(&format!(
            "/panel/api/inbounds/{}/delClient/{}",
            inbound_id, uuid
        ));
        let response = self
            .call(panel, self.policy.max_attempts, |s| {
                PanelRequest::delete(url.clone(), Some(s.cookie.clone()), self.policy.request_timeout)
            })
            .await?;

        if response.status == 404 {
            debug!(panel_id = panel.id, %uuid, "client already absent on delete");
            return Ok(());
        }
        let envelope: ApiEnvelope<serde_json::Value> = self.decode(panel, &response)?;
        if envelope.success || is_already_gone(&envelope.msg) {
            return Ok(());
        }
        Err(Error::Api {
            panel_id: panel.id,
            status: response.status,
            message: envelope.msg,
        })
    }

    /// Zeroes a client's counters, used when a renewal grants a fresh
    /// quota. Resetting twice is still zero, so transport failures are
    /// retried.
    pub async fn reset_client_traffic(
        &self,
        panel: &Panel,
        inbound_id: i64,
        uuid: &Uuid,
    ) -> Result<(), Error> {
        let url = panel.endpoint(&format!(
            "/panel/api/inbounds/{}/resetClientTraffic/{}",
            inbound_id, uuid
        ));
        let response = self
            .call(panel, self.policy.max_attempts, |s| {
                PanelRequest::post_json(
                    url.clone(),
                    Some(s.cookie.clone()),
                    serde_json::json!({}),
                    self.policy.request_timeout,
                )
            })
            .await?;
        let envelope: ApiEnvelope<serde_json::Value> = self.decode(panel, &response)?;
        if !envelope.success {
            return Err(Error::Api {
                panel_id: panel.id,
                status: response.status,
                message: envelope.msg,
            });
        }
        Ok(())
    }

    /// Cheap health probe; lets the sync loop tell "panel down" from
    /// "credentials wrong" before burning a whole sweep on it.
    pub async fn panel_status(&self, panel: &Panel) -> Result<PanelStatus, Error> {
        let url = panel.endpoint("/panel/api/server/status");
        let response = self
            .call(panel, self.policy.max_attempts, |s| {
                PanelRequest::get(url.clone(), Some(s.cookie.clone()), self.policy.request_timeout)
            })
            .await?;
        let envelope: ApiEnvelope<PanelStatus> = self.decode(panel, &response)?;
        match envelope.obj {
            Some(status) if envelope.success => Ok(status),
            _ => Err(Error::Api {
                panel_id: panel.id,
                status: response.status,
                message: envelope.msg,
            }),
        }
    }

    async fn call<F>(&self, panel: &Panel, attempts: u32, build: F) -> Result<PanelResponse, Error>
    where
        F: Fn(&Session) -> PanelRequest,
    {
        let session = self.sessions.get_session(panel).await?;
        let response = execute_with_retry(
            self.transport.as_ref(),
            &self.policy,
            panel.id,
            build(&session),
            attempts,
        )
        .await?;
        if !is_session_expiry(&response) {
            return Ok(response);
        }

        debug!(panel_id = panel.id, "session rejected mid-call, re-authenticating once");
        self.sessions.invalidate(panel).await?;
        let session = self.sessions.get_session(panel).await?;
        let response = execute_with_retry(
            self.transport.as_ref(),
            &self.policy,
            panel.id,
            build(&session),
            attempts,
        )
        .await?;
        if is_session_expiry(&response) {
            return Err(Error::SessionExpired { panel_id: panel.id });
        }
        Ok(response)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        panel: &Panel,
        response: &PanelResponse,
    ) -> Result<ApiEnvelope<T>, Error> {
        if !response.is_success() {
            return Err(Error::Api {
                panel_id: panel.id,
                status: response.status,
                message: truncated(&response.body),
            });
        }
        response.json()
    }
}

impl Default for PanelClient {
    fn default() -> Self {
        Self::new()
    }
}

/// A call carrying a session cookie came back rejected. 401 is the
/// canonical signal; a 403 with a cookie attached means the cookie went
/// stale (a bare 403 on login is a credential rejection and handled
/// there); some panel builds instead answer 2xx with a failure envelope
/// pointing at the login page.
fn is_session_expiry(response: &PanelResponse) -> bool {
    if response.status == 401 || response.status == 403 {
        return true;
    }
    if response.is_success() {
        if let Ok(envelope) = response.json::<ApiEnvelope<serde_json::Value>>() {
            if !envelope.success {
                let msg = envelope.msg.to_lowercase();
                return msg.contains("login") || msg.contains("session");
            }
        }
    }
    false
}

fn is_already_gone(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("not found") || msg.contains("no client") || msg.contains("does not exist")
}

/// addClient/updateClient take the client list as a JSON-encoded string
/// inside the JSON body, a quirk of the panel API.
fn add_client_body(inbound_id: i64, spec: &ClientSpec, uuid: &Uuid) -> serde_json::Value {
    let settings = serde_json::json!({ "clients": [spec.to_panel_json(uuid)] });
    serde_json::json!({
        "id": inbound_id,
        "settings": settings.to_string(),
    })
}

fn truncated(body: &str) -> String {
    const LIMIT: usize = 200;
    if body.len() <= LIMIT {
        body.to_string()
    } else {
        let cut = body
            .char_indices()
            .take_while(|(i, _)| *i < LIMIT)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &body[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, envelope_fail, envelope_ok, login_ok, panel};
    use crate::transport::TransportError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client(transport: Arc<FakeTransport>) -> PanelClient {
        PanelClient::with_parts(
            transport,
            Arc::new(MemorySessionStore::new()),
            RetryPolicy {
                base_delay: Duration::from_millis(1),
                ..Default::default()
            },
            Duration::from_secs(3600),
        )
    }

    fn spec(email: &str, limit: i64) -> ClientSpec {
        ClientSpec {
            email: email.to_string(),
            uuid: None,
            traffic_limit: limit,
            expires_at: None,
            flow: None,
        }
    }

    #[tokio::test]
    async fn create_then_traffic_reuses_the_session() {
        // Stateful fake: remembers created clients, serves their stats.
        let created: Arc<Mutex<Vec<(String, i64)>>> = Arc::new(Mutex::new(Vec::new()));
        let created_handler = created.clone();
        let transport = Arc::new(FakeTransport::new(move |req| {
            if req.url.ends_with("/login") {
                return login_ok(req);
            }
            if req.url.contains("/addClient") {
                let body = req.json.as_ref().unwrap();
                let settings: serde_json::Value =
                    serde_json::from_str(body["settings"].as_str().unwrap()).unwrap();
                let client = &settings["clients"][0];
                created_handler.lock().unwrap().push((
                    client["id"].as_str().unwrap().to_string(),
                    client["totalGB"].as_i64().unwrap(),
                ));
                return Ok(envelope_ok(serde_json::Value::Null));
            }
            if req.url.contains("/getClientTrafficsById/") {
                let uuid = req.url.rsplit('/').next().unwrap();
                let guard = created_handler.lock().unwrap();
                let found = guard.iter().find(|(id, _)| id == uuid);
                return Ok(match found {
                    Some((_, limit)) => envelope_ok(serde_json::json!([{
                        "email": "acct-9", "up": 0, "down": 0,
                        "total": limit, "expiryTime": 0, "enable": true
                    }])),
                    None => envelope_ok(serde_json::json!([])),
                });
            }
            panic!("unexpected request: {}", req.url);
        }));
        let client = client(transport.clone());
        let panel = panel(1);

        let config = client
            .create_client(&panel, 3, &spec("acct-9", 50_000_000_000))
            .await
            .unwrap();
        assert_eq!(config.traffic_used, 0);
        assert_eq!(config.traffic_limit, 50_000_000_000);

        let traffic = client.get_client_traffic(&panel, &config.uuid).await.unwrap();
        assert_eq!(traffic.traffic_used, 0);
        assert_eq!(traffic.traffic_limit, 50_000_000_000);

        // One login serves both calls.
        assert_eq!(transport.count_logins(), 1);
    }

    #[tokio::test]
    async fn stale_session_is_refreshed_and_call_retried_once() {
        let api_calls = Arc::new(AtomicUsize::new(0));
        let counter = api_calls.clone();
        let transport = Arc::new(FakeTransport::new(move |req| {
            if req.url.ends_with("/login") {
                return login_ok(req);
            }
            // First API call hits a stale cookie, every later one works.
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(crate::transport::PanelResponse {
                    status: 401,
                    set_cookie: None,
                    body: String::new(),
                });
            }
            Ok(envelope_ok(serde_json::json!([])))
        }));
        let client = client(transport.clone());

        let inbounds = client.list_inbounds(&panel(1)).await.unwrap();
        assert!(inbounds.is_empty());
        // Initial login plus the re-authentication after the 401.
        assert_eq!(transport.count_logins(), 2);
    }

    #[tokio::test]
    async fn persistent_401_surfaces_session_expired() {
        let transport = Arc::new(FakeTransport::new(|req| {
            if req.url.ends_with("/login") {
                return login_ok(req);
            }
            Ok(crate::transport::PanelResponse {
                status: 401,
                set_cookie: None,
                body: String::new(),
            })
        }));
        let client = client(transport);

        let err = client.list_inbounds(&panel(1)).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired { .. }));
    }

    #[tokio::test]
    async fn create_rejection_is_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let transport = Arc::new(FakeTransport::new(move |req| {
            if req.url.ends_with("/login") {
                return login_ok(req);
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(envelope_fail("Duplicate email: acct-4"))
        }));
        let client = client(transport);

        let err = client
            .create_client(&panel(1), 1, &spec("acct-4", 0))
            .await
            .unwrap_err();
        match err {
            Error::ClientCreation { message, .. } => {
                assert!(message.contains("Duplicate email"))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn create_network_failure_is_not_replayed() {
        let add_attempts = Arc::new(AtomicUsize::new(0));
        let counter = add_attempts.clone();
        let transport = Arc::new(FakeTransport::new(move |req| {
            if req.url.ends_with("/login") {
                return login_ok(req);
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Timeout)
        }));
        let client = client(transport);

        let err = client
            .create_client(&panel(1), 1, &spec("acct-5", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unreachable { attempts: 1, .. }));
        assert_eq!(add_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_twice_succeeds_both_times() {
        let deleted = Arc::new(AtomicUsize::new(0));
        let counter = deleted.clone();
        let transport = Arc::new(FakeTransport::new(move |req| {
            if req.url.ends_with("/login") {
                return login_ok(req);
            }
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(envelope_ok(serde_json::Value::Null))
            } else {
                Ok(envelope_fail("client not found"))
            }
        }));
        let client = client(transport);
        let panel = panel(1);
        let uuid = Uuid::new_v4();

        client.delete_client(&panel, 2, &uuid).await.unwrap();
        client.delete_client(&panel, 2, &uuid).await.unwrap();
    }

    #[tokio::test]
    async fn traffic_timeout_exhausts_budget_and_surfaces_unreachable() {
        let traffic_attempts = Arc::new(AtomicUsize::new(0));
        let counter = traffic_attempts.clone();
        let transport = Arc::new(FakeTransport::new(move |req| {
            if req.url.ends_with("/login") {
                return login_ok(req);
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Timeout)
        }));
        let client = client(transport.clone());

        let err = client
            .get_client_traffic(&panel(1), &Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unreachable { attempts: 3, .. }));
        assert_eq!(traffic_attempts.load(Ordering::SeqCst), 3);
        assert_eq!(transport.count_logins(), 1);
    }

    #[tokio::test]
    async fn expiry_envelope_on_success_status_counts_as_stale_session() {
        let api_calls = Arc::new(AtomicUsize::new(0));
        let counter = api_calls.clone();
        let transport = Arc::new(FakeTransport::new(move |req| {
            if req.url.ends_with("/login") {
                return login_ok(req);
            }
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(envelope_fail("please login again"));
            }
            Ok(envelope_ok(serde_json::json!([])))
        }));
        let client = client(transport.clone());

        client.list_inbounds(&panel(1)).await.unwrap();
        assert_eq!(transport.count_logins(), 2);
    }
}
