//! MaiRust - IMAP server entry point

use anyhow::Result;
use mairust_common::config::Config;
use mairust_core::{DemoCredentials, ImapServer, MailboxRegistry, PlainTextSource};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting MaiRust IMAP server...");

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("{e}, falling back to defaults");
        Config {
            server: Default::default(),
            logging: Default::default(),
            imap: Default::default(),
        }
    });

    if !config.imap.enabled {
        info!("IMAP server disabled in configuration, exiting");
        return Ok(());
    }

    let registry = Arc::new(MailboxRegistry::new());
    let credentials = Arc::new(DemoCredentials);
    let source = Arc::new(PlainTextSource);

    let imap_server = ImapServer::new(config.imap.clone(), registry, credentials, source);
    info!("Starting IMAP server on {}", config.imap.bind);

    let imap_handle = tokio::spawn(async move {
        if let Err(e) = imap_server.run().await {
            tracing::error!("IMAP server error: {}", e);
        }
    });

    info!("MaiRust server started successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    imap_handle.abort();

    info!("MaiRust server shutdown complete");

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,mairust=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
