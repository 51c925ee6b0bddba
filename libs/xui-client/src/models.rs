use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Credential record for one 3x-UI panel. Owned and rotated by the
/// caller; this crate only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Panel {
    pub id: i64,
    pub base_url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Panel {
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// The `{success, msg, obj}` wrapper every 3x-UI endpoint answers with.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Option::default")]
    pub obj: Option<T>,
}

/// One configured listening endpoint on a panel (a VMess/VLESS port).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inbound {
    pub id: i64,
    #[serde(default)]
    pub remark: String,
    pub port: i64,
    pub protocol: String,
    #[serde(default)]
    pub enable: bool,
    #[serde(default, rename = "clientStats")]
    pub client_stats: Vec<ClientStat>,
}

/// Per-client counters as the panel reports them inside an inbound.
/// `total` is the quota in bytes, 0 meaning unlimited; `expiry_time` is
/// epoch milliseconds, 0 meaning no expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStat {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(rename = "expiryTime", default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub enable: bool,
}

impl ClientStat {
    pub fn traffic(&self) -> ClientTraffic {
        ClientTraffic {
            traffic_used: self.up + self.down,
            traffic_limit: self.total,
            expires_at: millis_to_datetime(self.expiry_time),
        }
    }
}

/// What the caller asks for when provisioning or renewing an account.
#[derive(Debug, Clone)]
pub struct ClientSpec {
    pub email: String,
    /// Generated when absent; pass the existing id on renewal.
    pub uuid: Option<Uuid>,
    /// Bytes; 0 = unlimited.
    pub traffic_limit: i64,
    /// None = no expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Protocol flow hint, e.g. "xtls-rprx-vision" on VLESS inbounds.
    pub flow: Option<String>,
}

impl ClientSpec {
    /// The client object as the panel's addClient/updateClient settings
    /// payload expects it.
    pub(crate) fn to_panel_json(&self, uuid: &Uuid) -> serde_json::Value {
        serde_json::json!({
            "id": uuid.to_string(),
            "email": self.email,
            "totalGB": self.traffic_limit,
            "expiryTime": self.expires_at.map(|t| t.timestamp_millis()).unwrap_or(0),
            "flow": self.flow.clone().unwrap_or_default(),
            "enable": true,
        })
    }
}

/// The VPN account as known to the remote panel after a successful
/// create/renew call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteClientConfig {
    pub panel_id: i64,
    pub inbound_id: i64,
    pub uuid: Uuid,
    pub email: String,
    pub traffic_limit: i64,
    pub traffic_used: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Usage snapshot for one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientTraffic {
    pub traffic_used: i64,
    pub traffic_limit: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Health snapshot from `/panel/api/server/status`. Only the fields the
/// sync loop cares about; the panel reports many more.
#[derive(Debug, Clone, Deserialize)]
pub struct PanelStatus {
    #[serde(default)]
    pub uptime: i64,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub xray: XrayState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XrayState {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub version: String,
}

pub(crate) fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    if millis <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}
