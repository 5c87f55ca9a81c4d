use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;

use tracing::info;

use embed_proxy::{AppConfig, ApplicationServer, Logger, ProfileConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // guards are kept alive to flush logs and keep the sentry client around
    let _guards = Logger::init(
        config.cargo_env,
        &config.log_dir,
        config.sentry_dsn.clone(),
    );

    info!("logger and env prepped...");

    let profiles = ProfileConfig::load(config.profiles_file.as_deref())
        .context("failed to load header profiles")?;

    info!(
        "loaded {} header profiles, starting server...",
        profiles.rules.len()
    );

    ApplicationServer::serve(config, profiles)
        .await
        .context("server failed to start")?;

    Ok(())
}
