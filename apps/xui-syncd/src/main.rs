use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xui_client::{
    Error, HttpTransport, MemorySessionStore, PanelClient, Reconciler, RetryPolicy, SessionStore,
};

mod config;
mod report;

use config::SyncdConfig;
use report::{PanelUsage, ReportClient, UsageReport};

#[derive(Parser, Debug)]
#[command(name = "xui-syncd", about = "Periodic traffic reconciliation against 3x-UI panels")]
struct Cli {
    /// Config file path; defaults to /etc/xui-syncd/config.toml then ./syncd.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xui_syncd=info,xui_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = SyncdConfig::load(cli.config.as_deref())?;
    info!(
        panels = config.panels.len(),
        accounts = config.accounts.len(),
        interval_secs = config.sweep_interval_secs,
        "xui-syncd starting"
    );

    let transport = if config.accept_invalid_certs {
        warn!("certificate verification disabled for panel connections");
        Arc::new(HttpTransport::insecure()?)
    } else {
        Arc::new(HttpTransport::new())
    };

    let store: Arc<dyn SessionStore> = match &config.redis_url {
        Some(url) => Arc::new(xui_client::RedisSessionStore::connect(url).await?),
        None => Arc::new(MemorySessionStore::new()),
    };

    let policy = RetryPolicy {
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        ..Default::default()
    };
    let client = PanelClient::with_parts(
        transport,
        store,
        policy,
        Duration::from_secs(config.session_ttl_secs),
    );
    let reconciler = Reconciler::new(client.clone());
    let reporter = config.report.as_ref().map(ReportClient::new);

    let mut interval = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
    loop {
        interval.tick().await;
        if let Err(e) = run_cycle(&config, &client, &reconciler, reporter.as_ref()).await {
            error!("Reconciliation cycle error: {:#}", e);
        }
    }
}

async fn run_cycle(
    config: &SyncdConfig,
    client: &PanelClient,
    reconciler: &Reconciler,
    reporter: Option<&ReportClient>,
) -> Result<()> {
    info!("Starting reconciliation cycle...");

    // Probe first: a panel with rotten credentials needs an operator,
    // not a retry, and should not burn the whole sweep.
    let mut reachable = Vec::new();
    for panel_config in &config.panels {
        let panel = panel_config.to_panel();
        match client.panel_status(&panel).await {
            Ok(status) => {
                info!(
                    panel = %panel_config.name,
                    xray_state = %status.xray.state,
                    uptime = status.uptime,
                    "panel reachable"
                );
                reachable.push(panel_config);
            }
            Err(Error::Authentication { message, .. }) => {
                error!(
                    panel = %panel_config.name,
                    "panel credentials rejected, skipping until rotated: {}",
                    message
                );
            }
            Err(e) => {
                warn!(panel = %panel_config.name, error = %e, "panel unreachable, skipping this cycle");
            }
        }
    }

    let targets: Vec<_> = config
        .sync_targets()
        .into_iter()
        .filter(|t| reachable.iter().any(|p| p.id == t.panel.id))
        .collect();
    let sync_report = reconciler.sync_targets(&targets).await;

    let mut panel_usage = Vec::new();
    for panel_config in reachable.iter().filter(|p| p.sweep_all) {
        match reconciler.sweep_panel(&panel_config.to_panel()).await {
            Ok(clients) => {
                info!(
                    panel = %panel_config.name,
                    clients = clients.len(),
                    "panel sweep complete"
                );
                panel_usage.push(PanelUsage {
                    panel: panel_config.name.clone(),
                    clients,
                });
            }
            Err(e) => warn!(panel = %panel_config.name, error = %e, "panel sweep failed"),
        }
    }

    let report = UsageReport {
        generated_at: Utc::now(),
        deltas: sync_report.deltas,
        failures: sync_report.failures,
        panel_usage,
    };

    if report.is_empty() {
        return Ok(());
    }
    info!(
        deltas = report.deltas.len(),
        failures = report.failures.len(),
        swept_panels = report.panel_usage.len(),
        "cycle finished"
    );

    if let Some(reporter) = reporter {
        // Best effort: the next cycle re-reads panel-side truth, so a
        // dropped report loses nothing.
        if let Err(e) = reporter.send(&report).await {
            warn!("Usage report delivery failed: {}", e);
        }
    }

    Ok(())
}
