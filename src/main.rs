use anyhow::Result;
use pairwatch_backend::{AppContext, Config};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pairwatch_backend=debug,info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    info!(
        symbols = ?config.symbols,
        timeframes = ?config.timeframes,
        db = %config.database_path,
        "🚀 Starting pairwatch backend"
    );

    let ctx = AppContext::new(config)?;

    // Standard alert set for the first configured pair.
    if let [a, b, ..] = &ctx.config.symbols[..] {
        ctx.alerts().preset_alerts(a, b);
    }

    ctx.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    ctx.stop().await;
    info!("✅ Shutdown complete");
    Ok(())
}
