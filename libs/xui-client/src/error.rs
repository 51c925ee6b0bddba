use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by session management and panel API calls.
#[derive(Debug, Error)]
pub enum Error {
    /// The panel rejected the stored credentials. Never retried: bad
    /// credentials do not become valid on a second attempt.
    #[error("panel {panel_id} rejected credentials: {message}")]
    Authentication { panel_id: i64, message: String },

    /// Network-level failure after the retry budget was spent. The
    /// caller may try again at its next scheduled cycle.
    #[error("panel {panel_id} unreachable after {attempts} attempt(s): {source}")]
    Unreachable {
        panel_id: i64,
        attempts: u32,
        source: TransportError,
    },

    /// The panel rejected an addClient/updateClient payload, e.g. a
    /// duplicate identifier. Never retried: the remote call is not
    /// idempotent and a blind retry could duplicate state.
    #[error("panel {panel_id} rejected client spec: {message}")]
    ClientCreation { panel_id: i64, message: String },

    /// The session cookie was rejected mid-call. Consumed internally by
    /// the invalidate-and-retry-once cycle; only surfaced when the call
    /// with a freshly obtained session is rejected as well.
    #[error("session for panel {panel_id} expired")]
    SessionExpired { panel_id: i64 },

    /// A panel response that maps to none of the variants above: an
    /// unexpected HTTP status or a failure envelope on a read call.
    #[error("panel {panel_id} API error (status {status}): {message}")]
    Api {
        panel_id: i64,
        status: u16,
        message: String,
    },

    #[error("malformed panel response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("session store failure: {0}")]
    Cache(String),
}

impl Error {
    /// True for failures worth retrying at a later cycle, as opposed to
    /// ones that need operator attention (credentials, bad spec).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unreachable { .. } | Error::SessionExpired { .. })
    }
}
