use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use xui_client::{ClientUsage, SyncFailure, TrafficDelta};

use crate::config::ReportConfig;

/// Usage payload POSTed to the caller-owned webhook after each pass.
/// The receiver persists with overwrite-with-latest semantics, so a
/// dropped report is recovered by the next one.
#[derive(Debug, Serialize)]
pub struct UsageReport {
    pub generated_at: DateTime<Utc>,
    pub deltas: Vec<TrafficDelta>,
    pub failures: Vec<SyncFailure>,
    pub panel_usage: Vec<PanelUsage>,
}

#[derive(Debug, Serialize)]
pub struct PanelUsage {
    pub panel: String,
    pub clients: Vec<ClientUsage>,
}

impl UsageReport {
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.failures.is_empty() && self.panel_usage.is_empty()
    }
}

#[derive(Clone)]
pub struct ReportClient {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl ReportClient {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            token: config.token.clone(),
        }
    }

    pub async fn send(&self, report: &UsageReport) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(report)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "usage report rejected with status {}",
                response.status()
            ));
        }
        Ok(())
    }
}
