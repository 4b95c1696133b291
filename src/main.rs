//! tickcore soak runner
//!
//! Runs several isolated loopback matches as tokio tasks. Each match owns a
//! server, scripted clients and conditioned links. When every match has
//! finished, or on Ctrl+C / SIGTERM, the per-match reports are logged as
//! JSON and the metrics sink is flushed.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use tickcore::config::Config;
use tickcore::loopback::{GameMatch, MatchRegistry};
use tickcore::metrics::{MetricsSink, TracingMetrics};
use tickcore::util::time::{init_process_time, uptime_secs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    init_tracing(&config.log_level, config.log_json);
    init_process_time();

    info!(
        matches = config.soak.matches,
        clients_per_match = config.soak.clients_per_match,
        duration_secs = config.soak.duration_secs,
        tick_rate = config.sim.tick_rate,
        send_rate = config.sim.send_rate,
        latency_min_ms = config.link.latency_min_ms,
        latency_max_ms = config.link.latency_max_ms,
        packet_loss = config.link.packet_loss_percent,
        "Starting tickcore soak run"
    );

    // One sink for the whole process, flushed at shutdown
    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);
    let registry = MatchRegistry::new();
    let duration = (config.soak.duration_secs > 0).then(|| Duration::from_secs(config.soak.duration_secs));

    let mut tasks = Vec::with_capacity(config.soak.matches);
    for index in 0..config.soak.matches {
        let (mut game, handle) = GameMatch::new(
            Uuid::new_v4(),
            config.sim.clone(),
            config.link.clone(),
            metrics.clone(),
            config.soak.seed.wrapping_add(index as u64),
            config.soak.input_rate_limit,
            duration,
        );
        for _ in 0..config.soak.clients_per_match {
            game.add_bot();
        }
        registry.insert(handle);
        tasks.push(tokio::spawn(game.run()));
    }

    info!(
        active_matches = registry.active_matches(),
        total_players = registry.total_players(),
        "Matches running"
    );

    let all = join_all(tasks);
    tokio::pin!(all);
    let results = tokio::select! {
        results = &mut all => results,
        _ = shutdown_signal() => {
            registry.stop_all().await;
            all.await
        }
    };

    for result in results {
        match result {
            Ok(report) => {
                registry.remove(&report.match_id);
                let summary = serde_json::to_string(&report)?;
                info!(match_id = %report.match_id, %summary, "Match report");
            }
            Err(err) => error!(%err, "Match task failed"),
        }
    }

    metrics.flush();
    info!(uptime_secs = uptime_secs(), "Soak run complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(true)))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(%err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping matches");
        }
        _ = terminate => {
            info!("Received terminate signal, stopping matches");
        }
    }
}
