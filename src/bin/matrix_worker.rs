//! Matrix Worker - periodic compaction of drop reports
//!
//! Rebuilds the drop matrix, pattern matrix and trend tables for every
//! configured (server, source category) scope.
//!
//! Usage:
//!   cargo run --release --bin matrix_worker
//!
//! Environment variables: see `WorkerConfig::from_env`.

use chrono::Utc;
use dotenv::dotenv;
use dropstats::compaction::MatrixCompactor;
use dropstats::config::WorkerConfig;
use dropstats::db::Database;
use dropstats::refdata::SqliteReferenceData;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

#[derive(Debug, Clone, Copy)]
enum Pass {
    Matrices,
    Trends,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Matrix Worker");

    let config = WorkerConfig::from_env()?;
    if !config.enabled {
        info!("⚠️  Worker is DISABLED (set WORKER_ENABLED=true to activate)");
        info!("   └─ Exiting gracefully...");
        return Ok(());
    }

    info!("✅ Worker ENABLED");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Matrix interval: {}s", config.interval_secs);
    info!("   ├─ Trend interval: {}s", config.trend_interval_secs);
    info!(
        "   ├─ Trend window: {} x {}h",
        config.trend_interval_num, config.trend_interval_hours
    );
    info!(
        "   ├─ Servers: {}",
        config.servers.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",")
    );
    info!(
        "   └─ Source categories: {}",
        config
            .source_categories
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );

    let db = Database::open(&config.db_path)?;
    let refdata = Arc::new(SqliteReferenceData::new(db.clone()));
    let compactor = Arc::new(MatrixCompactor::new(
        db,
        refdata.clone(),
        config.trend_interval_length(),
        config.trend_interval_num,
    ));

    let mut matrix_timer = interval(Duration::from_secs(config.interval_secs));
    matrix_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut trend_timer = interval(Duration::from_secs(config.trend_interval_secs));
    trend_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = matrix_timer.tick() => {
                // Pick up reference data edits made since the last pass
                if let Err(e) = refdata.invalidate() {
                    warn!("⚠️  Failed to reset drop info cache: {}", e);
                }
                run_pass(&compactor, &config, Pass::Matrices).await;
            }
            _ = trend_timer.tick() => {
                run_pass(&compactor, &config, Pass::Trends).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown requested, stopping worker");
                break;
            }
        }
    }

    Ok(())
}

/// Run one pass over every configured scope, pausing between scopes
async fn run_pass(compactor: &Arc<MatrixCompactor>, config: &WorkerConfig, pass: Pass) {
    let started = std::time::Instant::now();
    let mut failures = 0usize;

    for &server in &config.servers {
        for &category in &config.source_categories {
            let compactor = compactor.clone();
            let result = tokio::task::spawn_blocking(move || match pass {
                Pass::Matrices => compactor.run_matrices(server, category).map(|_| ()),
                Pass::Trends => compactor.run_trends(server, category, Utc::now()).map(|_| ()),
            })
            .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!(
                        "❌ {:?} pass failed for {}/{}: {}",
                        pass,
                        server.as_str(),
                        category.as_str(),
                        e
                    );
                }
                Err(e) => {
                    failures += 1;
                    error!("❌ {:?} pass task panicked: {}", pass, e);
                }
            }

            sleep(Duration::from_millis(config.separation_ms)).await;
        }
    }

    info!(
        "⏱️  {:?} pass finished in {:.1}s ({} failures)",
        pass,
        started.elapsed().as_secs_f64(),
        failures
    );
}
