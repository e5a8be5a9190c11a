//! # harbor server
//!
//! Realtime room-based message hub.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! harbor
//!
//! # Run with a config file in the search path
//! # (harbor.toml, /etc/harbor/harbor.toml, ~/.config/harbor/harbor.toml)
//! harbor
//!
//! # Run with environment variables
//! HARBOR_PORT=8080 HARBOR_HOST=0.0.0.0 harbor
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;
mod session;

use anyhow::Result;
use auth::{Identity, StaticTokenAuthenticator};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "harbor=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting harbor server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Identity resolution is a hard precondition of admission; with an
    // empty token table every upgrade is refused.
    let mut authenticator = StaticTokenAuthenticator::new();
    for (token, entry) in &config.auth.tokens {
        authenticator = authenticator.with_token(
            token.clone(),
            Identity::new(entry.user_id.clone(), entry.username.clone()),
        );
    }
    if config.auth.tokens.is_empty() {
        tracing::warn!("No auth tokens configured; all connections will be refused");
    }

    // Start the server
    handlers::run_server(config, Arc::new(authenticator)).await?;

    Ok(())
}
