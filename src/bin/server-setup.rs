//! Standalone server runner.
//!
//! Starts the server exactly as a test run would, waits until it is ready
//! and has its bundles installed, then keeps it up until Ctrl-C so tests can
//! run against it from another process.
//!
//! Usage: `server-setup [properties.json]`. Environment variables override
//! the file (`SERVER_READY_TIMEOUT_SECONDS` sets `server.ready.timeout.seconds`).

use anyhow::Context;
use server_setup::config::{Properties, validate_properties};
use server_setup::{InstanceRegistry, ServerSetup};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut props = match std::env::args().nth(1) {
        Some(path) => Properties::from_file(&path)
            .with_context(|| format!("Cannot load properties from {}", path))?,
        None => Properties::new(),
    };
    props.merge(Properties::from_env());
    validate_properties(&props).context("Invalid configuration")?;

    let setup = ServerSetup::new(InstanceRegistry::global().default_instance(), props)
        .context("Cannot set up server")?;

    tokio::select! {
        result = serve(&setup) => result,
        result = tokio::signal::ctrl_c() => {
            result.context("Cannot listen for Ctrl-C")?;
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    }
}

async fn serve(setup: &ServerSetup) -> anyhow::Result<()> {
    let base_url = setup.server_base_url().await.context("Server setup failed")?;
    tracing::info!(base_url = %base_url, "Server ready, press Ctrl-C to exit");

    // keep.jar.running already blocked inside ensure_ready
    if !setup.config().keep_running {
        setup.keep_alive().await;
    }

    Ok(())
}
