//! End-to-end provisioning flow against a scripted panel: login,
//! create a client, read its traffic back, with one login on the wire.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use xui_client::transport::{PanelRequest, PanelResponse, PanelTransport, TransportError};
use xui_client::{ClientSpec, MemorySessionStore, Panel, PanelClient, RetryPolicy};

/// Minimal scripted panel: accepts one login, remembers clients added
/// through addClient, serves their stats.
#[derive(Default)]
struct ScriptedPanel {
    logins: Mutex<u32>,
    clients: Mutex<Vec<(String, i64)>>,
}

fn ok_body(obj: serde_json::Value) -> String {
    serde_json::json!({ "success": true, "msg": "", "obj": obj }).to_string()
}

#[async_trait]
impl PanelTransport for ScriptedPanel {
    async fn execute(&self, request: PanelRequest) -> Result<PanelResponse, TransportError> {
        if request.url.ends_with("/login") {
            *self.logins.lock().unwrap() += 1;
            return Ok(PanelResponse {
                status: 200,
                set_cookie: Some("3x-ui=scripted; Path=/; Max-Age=3600".to_string()),
                body: ok_body(serde_json::Value::Null),
            });
        }

        assert_eq!(
            request.cookie.as_deref(),
            Some("3x-ui=scripted"),
            "API call without the session cookie"
        );

        if request.url.contains("/addClient") {
            let body = request.json.as_ref().expect("addClient carries a body");
            let settings: serde_json::Value =
                serde_json::from_str(body["settings"].as_str().unwrap()).unwrap();
            let client = &settings["clients"][0];
            self.clients.lock().unwrap().push((
                client["id"].as_str().unwrap().to_string(),
                client["totalGB"].as_i64().unwrap(),
            ));
            return Ok(PanelResponse {
                status: 200,
                set_cookie: None,
                body: ok_body(serde_json::Value::Null),
            });
        }

        if request.url.contains("/getClientTrafficsById/") {
            let uuid = request.url.rsplit('/').next().unwrap();
            let clients = self.clients.lock().unwrap();
            let obj = match clients.iter().find(|(id, _)| id == uuid) {
                Some((_, limit)) => serde_json::json!([{
                    "email": "order-1042",
                    "up": 0,
                    "down": 0,
                    "total": limit,
                    "expiryTime": 0,
                    "enable": true
                }]),
                None => serde_json::json!([]),
            };
            return Ok(PanelResponse {
                status: 200,
                set_cookie: None,
                body: ok_body(obj),
            });
        }

        panic!("unexpected request: {}", request.url);
    }
}

#[tokio::test]
async fn provision_then_read_traffic_with_one_login() {
    let scripted = Arc::new(ScriptedPanel::default());
    let client = PanelClient::with_parts(
        scripted.clone(),
        Arc::new(MemorySessionStore::new()),
        RetryPolicy::default(),
        Duration::from_secs(3600),
    );

    let panel = Panel {
        id: 1,
        base_url: "https://panel-a.example.net:2053".to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        is_active: true,
    };

    let fifty_gb = 50i64 * 1024 * 1024 * 1024;
    let spec = ClientSpec {
        email: "order-1042".to_string(),
        uuid: None,
        traffic_limit: fifty_gb,
        expires_at: Some(Utc::now() + ChronoDuration::days(30)),
        flow: None,
    };

    let config = client.create_client(&panel, 1, &spec).await.unwrap();
    assert_eq!(config.traffic_used, 0);
    assert_eq!(config.traffic_limit, fifty_gb);

    let traffic = client.get_client_traffic(&panel, &config.uuid).await.unwrap();
    assert_eq!(traffic.traffic_used, 0);
    assert_eq!(traffic.traffic_limit, fifty_gb);

    // The create call logged in; the traffic read reused that session.
    assert_eq!(*scripted.logins.lock().unwrap(), 1);
}
