use anyhow::Context;
use clap::Parser;
use duet_server::{ServerConfig, TopicHub};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    let listener = duet_server::bind(config.addr()).await?;
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    };

    duet_server::serve(listener, TopicHub::new(), shutdown)
        .await
        .context("Relay server failed")
}
