mod config;
mod dashboard;
mod feed_handler;
mod ledger;
mod monitor;
mod normalizer;
mod store;
mod utils;

use anyhow::Result;
use clap::Parser;

use crate::{config::Settings, monitor::Monitor, store::LedgerStore};

#[derive(Debug, Parser)]
#[command(name = "bullionwatch", version)]
struct Cli {
    /// Refresh once, print the snapshot as JSON and exit
    #[arg(long)]
    once: bool,

    /// Override HISTORY_PATH
    #[arg(long)]
    history_path: Option<String>,

    /// Do not start the HTTP dashboard
    #[arg(long)]
    no_dashboard: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(p) = cli.history_path {
        settings.history_path = p;
    }
    if cli.no_dashboard {
        settings.dashboard_enabled = false;
    }

    let store = LedgerStore::with_capacity(&settings.history_path, settings.history_capacity)?;
    store.init_db()?;

    log::info!(
        "app.start ccy={} poll_secs={} auto_record={} cn_enabled={} history={} capacity={}",
        settings.domestic_ccy,
        settings.poll_secs,
        settings.auto_record,
        settings.cn_enabled,
        store.path(),
        store.capacity()
    );

    let monitor = Monitor::new(settings.clone(), store)?;

    if cli.once {
        monitor.refresh().await;
        let out = serde_json::json!({
            "snapshot": &*monitor.snapshot(),
            "comparisons": monitor.comparisons(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if settings.dashboard_enabled {
        let m = monitor.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve_dashboard(m).await {
                log::error!("dashboard.error {}", e);
            }
        });
    }

    tokio::select! {
        r = monitor::run(monitor.clone()) => {
            r?;
            // Polling disabled: keep serving on-demand refreshes until interrupted.
            tokio::signal::ctrl_c().await?;
        }
        _ = tokio::signal::ctrl_c() => {}
    }
    log::info!("app.stop");
    Ok(())
}
