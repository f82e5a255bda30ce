// SPDX-License-Identifier: MIT
//! flockd — cluster health alert daemon.
//!
//! Watches a cluster's check states (delivered by the coordination
//! service's watch mechanism), turns state transitions into notifications,
//! and re-notifies unresolved problems on a configured cadence. Alert
//! processing runs only on the elected leader.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use flockd::cluster::consul::{AlertSettings, ConsulClient};
use flockd::cluster::LeaderHandle;
use flockd::config::DaemonConfig;
use flockd::notify::LogNotifier;
use flockd::pipeline::processor::CheckProcessor;
use flockd::pipeline::reminders::ReminderScheduler;
use flockd::pipeline::Mailbox;
use flockd::registry::AgentRegistry;
use flockd::rest;
use flockd::AppContext;

/// How often the leadership poll refreshes the cluster leader view.
const LEADER_REFRESH_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "flockd", version, about = "Cluster health alert daemon")]
struct Args {
    /// Path to flockd.toml. Defaults to ./flockd.toml if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the HTTP port.
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. "info" or "flockd=debug".
    #[arg(long, env = "FLOCKD_LOG")]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = DaemonConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }

    // Init once — must happen before any tracing calls above would matter,
    // but config loading wants to log too, so accept losing that one line.
    let filter = args
        .log
        .or_else(|| config.log.clone())
        .unwrap_or_else(|| "info".to_string());
    setup_logging(&filter);

    info!(version = env!("CARGO_PKG_VERSION"), "flockd starting");

    let config = Arc::new(config);
    let cluster = Arc::new(ConsulClient::new(
        &config.consul,
        AlertSettings {
            checks_enabled: config.alerts.checks_enabled,
            change_threshold_secs: config.alerts.change_threshold_secs,
        },
    )?);
    let registry = Arc::new(AgentRegistry::new(&config.consul.address)?);
    let notifier = Arc::new(LogNotifier);
    let leader = Arc::new(LeaderHandle::new());
    let mailbox = Arc::new(Mailbox::new());

    if config.leader.assume {
        info!("leader.assume is set, acting as the alert leader");
        leader.set_leader(true);
    } else {
        info!(
            "leadership is externally driven; this node stays a follower \
             until the election mechanism flips it"
        );
    }

    // ── Shutdown signal ──────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        });
    }

    // ── Leadership view poll ─────────────────────────────────────────────────
    {
        let cluster = cluster.clone();
        let leader = leader.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(LEADER_REFRESH_SECS));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        match cluster.leader_address().await {
                            Ok(addr) => leader.set_has_leader(addr.is_some()),
                            Err(e) => warn!(err = %e, "leader status poll failed"),
                        }
                    }
                }
            }
        });
    }

    // ── Pipeline tasks ───────────────────────────────────────────────────────
    let processor = CheckProcessor::new(
        cluster.clone(),
        notifier.clone(),
        registry,
        leader.clone(),
        mailbox.clone(),
        shutdown_rx.clone(),
    );
    let processor_task = tokio::spawn(processor.run());

    let scheduler = ReminderScheduler::new(
        cluster.clone(),
        notifier,
        leader.clone(),
        shutdown_rx.clone(),
        Duration::from_secs(config.reminders.tick_secs),
    );
    let reminder_task = tokio::spawn(scheduler.run());

    // ── HTTP surface ─────────────────────────────────────────────────────────
    let ctx = Arc::new(AppContext::new(config, cluster, leader, mailbox));
    rest::start_rest_server(ctx, shutdown_rx).await?;

    // Server has drained; make sure the loops see the signal too (covers a
    // bind error path where no signal was ever sent).
    let _ = shutdown_tx.send(true);
    let _ = processor_task.await;
    let _ = reminder_task.await;

    info!("flockd stopped");
    Ok(())
}

/// Resolve on SIGTERM (Unix) or Ctrl-C (all platforms).
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(err = %e, "failed to register SIGTERM handler, falling back to Ctrl-C");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

/// Initialize the tracing subscriber.
///
/// `FLOCKD_LOG_FORMAT=json` switches to structured JSON output for log
/// aggregators; the default is the human-readable compact format.
/// `RUST_LOG` overrides the configured filter.
fn setup_logging(filter: &str) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));
    let use_json = std::env::var("FLOCKD_LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .compact()
            .init();
    }
}
