use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use uuid::Uuid;
use xui_client::{Panel, SyncTarget};

#[derive(Debug, Clone, Deserialize)]
pub struct SyncdConfig {
    /// Seconds between reconciliation passes.
    #[serde(default = "default_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Shares panel sessions across workers when set; in-process cache
    /// otherwise.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Self-hosted panels commonly run on self-signed certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    pub panels: Vec<PanelConfig>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub report: Option<ReportConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    pub name: String,
    pub id: i64,
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Report every client the panel knows about in one round-trip
    /// instead of per-account traffic reads.
    #[serde(default)]
    pub sweep_all: bool,
}

impl PanelConfig {
    pub fn to_panel(&self) -> Panel {
        Panel {
            id: self.id,
            base_url: self.base_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub account_id: i64,
    /// Name of the panel the account lives on.
    pub panel: String,
    pub client_uuid: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    pub url: String,
    pub token: String,
}

fn default_interval() -> u64 {
    600
}

fn default_timeout() -> u64 {
    30
}

fn default_session_ttl() -> u64 {
    3600
}

impl SyncdConfig {
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = override_path {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            return Self::parse(&contents, &path.display().to_string());
        }

        for path in ["/etc/xui-syncd/config.toml", "./syncd.toml"] {
            if let Ok(contents) = fs::read_to_string(path) {
                tracing::info!("Loading config from {}", path);
                return Self::parse(&contents, path);
            }
        }

        // Fallback for quick single-panel setups: everything from the
        // environment, whole-panel sweep mode.
        tracing::info!("No config file found, loading from environment");
        Self::from_env()
    }

    fn parse(contents: &str, origin: &str) -> Result<Self> {
        let config: SyncdConfig =
            toml::from_str(contents).with_context(|| format!("invalid config in {}", origin))?;
        config.validate()?;
        Ok(config)
    }

    fn from_env() -> Result<Self> {
        let config = Self {
            sweep_interval_secs: env_parsed("SWEEP_INTERVAL_SECS", default_interval()),
            request_timeout_secs: env_parsed("REQUEST_TIMEOUT_SECS", default_timeout()),
            session_ttl_secs: env_parsed("SESSION_TTL_SECS", default_session_ttl()),
            redis_url: std::env::var("REDIS_URL").ok(),
            accept_invalid_certs: std::env::var("ACCEPT_INVALID_CERTS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            panels: vec![PanelConfig {
                name: "default".to_string(),
                id: 1,
                base_url: std::env::var("PANEL_BASE_URL")
                    .context("PANEL_BASE_URL is required without a config file")?,
                username: std::env::var("PANEL_USERNAME")
                    .context("PANEL_USERNAME is required without a config file")?,
                password: std::env::var("PANEL_PASSWORD")
                    .context("PANEL_PASSWORD is required without a config file")?,
                sweep_all: true,
            }],
            accounts: Vec::new(),
            report: None,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.panels.is_empty() {
            bail!("at least one panel must be configured");
        }
        for account in &self.accounts {
            if !self.panels.iter().any(|p| p.name == account.panel) {
                bail!(
                    "account {} references unknown panel '{}'",
                    account.account_id,
                    account.panel
                );
            }
        }
        Ok(())
    }

    /// Tracked accounts resolved against their panels.
    pub fn sync_targets(&self) -> Vec<SyncTarget> {
        self.accounts
            .iter()
            .filter_map(|account| {
                let panel = self.panels.iter().find(|p| p.name == account.panel)?;
                Some(SyncTarget {
                    account_id: account.account_id,
                    panel: panel.to_panel(),
                    client_uuid: account.client_uuid,
                })
            })
            .collect()
    }
}

fn env_parsed(name: &str, fallback: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}
