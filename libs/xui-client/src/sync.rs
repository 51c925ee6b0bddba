use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::PanelClient;
use crate::error::Error;
use crate::models::Panel;

/// One tracked account to reconcile: which panel it lives on and the
/// client id provisioned there. `account_id` is the caller's key; this
/// crate never interprets it.
#[derive(Debug, Clone)]
pub struct SyncTarget {
    pub account_id: i64,
    pub panel: Panel,
    pub client_uuid: Uuid,
}

/// Fresh usage for one account, ready for the caller to persist with
/// overwrite-with-latest semantics.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficDelta {
    pub account_id: i64,
    pub traffic_used: i64,
    pub traffic_limit: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    pub account_id: i64,
    pub panel_id: i64,
    pub error: String,
}

/// Panel-side usage keyed by email, from a whole-panel sweep.
#[derive(Debug, Clone, Serialize)]
pub struct ClientUsage {
    pub email: String,
    pub traffic_used: i64,
    pub traffic_limit: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub deltas: Vec<TrafficDelta>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.failures.is_empty()
    }
}

/// Pulls usage for tracked accounts and reports deltas back to the
/// caller. Reads only; a failed read produces no delta, so the caller's
/// mirror keeps its last good value. No cross-account transaction: each
/// account stands alone and a failed one is simply retried on the next
/// cycle.
pub struct Reconciler {
    client: PanelClient,
}

impl Reconciler {
    pub fn new(client: PanelClient) -> Self {
        Self { client }
    }

    /// One pass over the batch. A panel that proves unreachable has its
    /// remaining targets skipped for this cycle instead of burning the
    /// full retry budget on each; every other panel still syncs.
    pub async fn sync_targets(&self, targets: &[SyncTarget]) -> SyncReport {
        let mut report = SyncReport::default();
        let mut dead_panels: HashSet<i64> = HashSet::new();

        for target in targets {
            if dead_panels.contains(&target.panel.id) {
                report.failures.push(SyncFailure {
                    account_id: target.account_id,
                    panel_id: target.panel.id,
                    error: "skipped: panel unreachable earlier this cycle".to_string(),
                });
                continue;
            }

            match self
                .client
                .get_client_traffic(&target.panel, &target.client_uuid)
                .await
            {
                Ok(traffic) => report.deltas.push(TrafficDelta {
                    account_id: target.account_id,
                    traffic_used: traffic.traffic_used,
                    traffic_limit: traffic.traffic_limit,
                    expires_at: traffic.expires_at,
                }),
                Err(e) => {
                    warn!(
                        account_id = target.account_id,
                        panel_id = target.panel.id,
                        error = %e,
                        "account sync failed, will retry next cycle"
                    );
                    if matches!(e, Error::Unreachable { .. }) {
                        dead_panels.insert(target.panel.id);
                    }
                    report.failures.push(SyncFailure {
                        account_id: target.account_id,
                        panel_id: target.panel.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            synced = report.deltas.len(),
            failed = report.failures.len(),
            "reconciliation pass finished"
        );
        report
    }

    /// Whole-panel read in one round-trip: the inbound listing already
    /// carries per-client counters, which beats N traffic calls when
    /// most of a panel's roster is tracked. Keyed by email because that
    /// is how the panel reports stats.
    pub async fn sweep_panel(&self, panel: &Panel) -> Result<Vec<ClientUsage>, Error> {
        let inbounds = self.client.list_inbounds(panel).await?;
        let mut usage = Vec::new();
        for inbound in inbounds {
            for stat in inbound.client_stats {
                let traffic = stat.traffic();
                usage.push(ClientUsage {
                    email: stat.email,
                    traffic_used: traffic.traffic_used,
                    traffic_limit: traffic.traffic_limit,
                    expires_at: traffic.expires_at,
                    enabled: stat.enable,
                });
            }
        }
        Ok(usage)
    }
}
