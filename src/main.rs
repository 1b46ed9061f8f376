use anyhow::Result;
use std::time::Duration;
use tracing::{error, info, warn};

use lavabridge::config::Config;
use lavabridge::{ConnectionState, NodePool};

const REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lavabridge=debug".parse()?)
                .add_directive("reqwest=info".parse()?)
                .add_directive("tungstenite=info".parse()?),
        )
        .init();

    info!("🎵 Starting lavabridge v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("{}", config.summary());

    let pool = NodePool::new(config.user_id);
    for options in config.node_options() {
        let label = options.label.clone();
        match pool.create_node(options).await {
            Ok(node) => info!("✅ Node {} connected ({:?})", label, node.state()),
            Err(e) => error!("❌ Node {} unavailable: {}", label, e),
        }
    }

    if pool.is_empty() {
        anyhow::bail!("No node could be connected");
    }

    let reporter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REPORT_INTERVAL);
            loop {
                interval.tick().await;
                report(&pool).await;
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("⚠️ Shutdown signal received, closing nodes...");

    reporter.abort();
    pool.close_all().await;

    info!("👋 All nodes closed");
    Ok(())
}

async fn report(pool: &NodePool) {
    for node in pool.nodes() {
        let state = node.state();
        if state != ConnectionState::Connected {
            warn!(node = %node.label(), ?state, "node not connected");
            continue;
        }

        match node.stats() {
            Some(stats) => info!(
                node = %node.label(),
                players = stats.players,
                playing = stats.playing_players,
                load = node.load(),
                cpu = %format!("{:.1}%", stats.cpu.system_load * 100.0),
                uptime = %humantime::format_duration(Duration::from_millis(stats.uptime)),
                "📊 node stats"
            ),
            None => info!(node = %node.label(), "📊 waiting for first stats frame"),
        }

        if let Ok(status) = node.route_planner_status().await {
            if let Some(kind) = status.kind {
                info!(node = %node.label(), planner = ?kind, "route planner active");
            }
        }
    }
}
