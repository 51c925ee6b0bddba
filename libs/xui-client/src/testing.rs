//! Scripted transport fake shared by the unit tests. Handlers get the
//! raw request and answer with a canned response, so session and retry
//! behavior is exercised without sockets.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::Panel;
use crate::transport::{PanelRequest, PanelResponse, PanelTransport, TransportError};

type Handler =
    Box<dyn Fn(&PanelRequest) -> Result<PanelResponse, TransportError> + Send + Sync>;

pub(crate) struct FakeTransport {
    handler: Handler,
    latency: Option<Duration>,
    log: Mutex<Vec<PanelRequest>>,
}

impl FakeTransport {
    pub fn new(
        handler: impl Fn(&PanelRequest) -> Result<PanelResponse, TransportError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            latency: None,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Adds a per-request delay so overlapping callers actually overlap.
    pub fn with_latency(mut self, millis: u64) -> Self {
        self.latency = Some(Duration::from_millis(millis));
        self
    }

    pub fn count_logins(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with("/login"))
            .count()
    }
}

#[async_trait]
impl PanelTransport for FakeTransport {
    async fn execute(&self, request: PanelRequest) -> Result<PanelResponse, TransportError> {
        self.log.lock().unwrap().push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.handler)(&request)
    }
}

pub(crate) fn panel(id: i64) -> Panel {
    Panel {
        id,
        base_url: format!("http://panel-{}.test:2053", id),
        username: "admin".to_string(),
        password: "secret".to_string(),
        is_active: true,
    }
}

pub(crate) fn envelope_ok(obj: serde_json::Value) -> PanelResponse {
    PanelResponse {
        status: 200,
        set_cookie: None,
        body: serde_json::json!({ "success": true, "msg": "", "obj": obj }).to_string(),
    }
}

pub(crate) fn envelope_fail(msg: &str) -> PanelResponse {
    PanelResponse {
        status: 200,
        set_cookie: None,
        body: serde_json::json!({ "success": false, "msg": msg, "obj": null }).to_string(),
    }
}

/// Default login behavior: accept any credentials, hand out a cookie.
pub(crate) fn login_ok(request: &PanelRequest) -> Result<PanelResponse, TransportError> {
    assert!(request.url.ends_with("/login"), "not a login request: {}", request.url);
    Ok(PanelResponse {
        status: 200,
        set_cookie: Some("3x-ui=fake-session; Path=/; HttpOnly".to_string()),
        body: serde_json::json!({ "success": true, "msg": "", "obj": null }).to_string(),
    })
}
