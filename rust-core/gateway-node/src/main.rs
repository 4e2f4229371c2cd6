// SPDX-License-Identifier: PMPL-1.0-or-later
//! Gateway storage node binary
//!
//! Loads configuration, starts the selected storage backends and runs until
//! interrupted.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = gateway_node::load_config()?;
    tracing::info!(
        embedded_kv = config.enable_embedded_kv,
        rpc = config.slave_options.use_rpc,
        hash_keys = config.hash_keys,
        "starting gateway storage node"
    );

    let _node = gateway_node::start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    Ok(())
}
