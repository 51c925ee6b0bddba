//! Session management and account synchronization for 3x-UI panels.
//!
//! The panel owns all VPN protocol state; this crate owns the part the
//! caller should never have to think about: keeping one live session
//! per panel (single-flight, TTL-cached, transparently refreshed on
//! rejection), issuing inbound/client API calls with a bounded retry
//! policy, and reconciling tracked accounts against panel-reported
//! usage. It holds no database handle and persists nothing but the
//! session cache; results go back to the caller as data.

pub mod cache;
pub mod client;
pub mod error;
pub mod models;
pub mod retry;
pub mod session;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{MemorySessionStore, SessionStore};
#[cfg(feature = "redis-cache")]
pub use cache::RedisSessionStore;
pub use client::PanelClient;
pub use error::Error;
pub use models::{
    ClientSpec, ClientTraffic, Inbound, Panel, PanelStatus, RemoteClientConfig,
};
pub use retry::RetryPolicy;
pub use session::{Session, SessionManager};
pub use sync::{ClientUsage, Reconciler, SyncFailure, SyncReport, SyncTarget, TrafficDelta};
pub use transport::{HttpTransport, PanelTransport};
