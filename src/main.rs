/// Phoscon schedule sunrise/sunset monitor
mod clients;
mod config;
mod domain;
mod errors;
mod repo;
mod services;
mod trigger;
mod utils;

use crate::clients::{HttpClient, HttpTransport, SunClient};
use crate::config::AppConfig;
use crate::repo::ScheduleRepo;
use crate::services::SyncService;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Keeps Phoscon sunrise/sunset schedules in line with the actual sun times
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file to parse
    #[arg(short, long)]
    config: PathBuf,

    /// Fetch and update once, then exit
    #[arg(short, long, conflicts_with = "list_schedules")]
    once: bool,

    /// List all Phoscon schedules then exit
    #[arg(short, long)]
    list_schedules: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("could not parse config file '{}'", args.config.display()))?;
    info!("Configuration loaded successfully");

    let transport: Arc<dyn HttpTransport> = Arc::new(HttpClient::new()?);

    let repo = ScheduleRepo::initialize(&config.phoscon, transport.clone())
        .await
        .context("could not initialise phoscon client")?;

    if args.list_schedules {
        print_schedule_list(&repo);
        return Ok(());
    }

    let sun_client = SunClient::new(
        transport,
        &config.sun_server_url,
        config.latitude,
        config.longitude,
    );
    let mut service = SyncService::new(sun_client, repo, config.targets());

    // Perform initial update before doing the periodic ones
    let report = service
        .run_cycle()
        .await
        .context("perform initial update failed")?;
    info!(
        "Initial update done: {} updated, {} unchanged",
        report.updated, report.unchanged
    );

    if args.once {
        info!("One-shot mode, exit with success code");
        return Ok(());
    }

    service
        .run(
            Duration::from_secs(config.poll_period_secs),
            shutdown_signal(),
        )
        .await;

    Ok(())
}

fn print_schedule_list(repo: &ScheduleRepo) {
    let rule = "+-----+--------------------+------------+---------------------+-------------------+";
    let count = repo.len();
    info!(
        "Phoscon schedule list ({} entr{})",
        count,
        if count == 1 { "y" } else { "ies" }
    );

    println!("{rule}");
    println!("| ID  | Name               | Status     | Created             | Schedule (local)  |");
    println!("{rule}");
    for ent in repo.list() {
        println!(
            "| {:03} | {:<18} | {:<10} | {:<19} | {:<17} |",
            ent.id,
            ent.name,
            ent.status,
            ent.created_at.format("%F %T"),
            ent.local_trigger_expr.as_deref().unwrap_or("")
        );
    }
    if count > 0 {
        println!("{rule}");
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
