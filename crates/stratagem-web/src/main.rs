use std::process::ExitCode;

use clap::Parser;
use stratagem_web::{
    build_model, open_ledger, router, AppState, GatewayArgs, GatewayConfig, GatewayError,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "gateway stopped");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<(), GatewayError> {
    let args = GatewayArgs::parse();
    let config = GatewayConfig::load(&args)?;

    if config.webhook.secret.is_none() {
        warn!("WEBHOOK_SECRET is not set; every webhook delivery will be refused");
    }
    if config.callers.is_empty() {
        warn!("CALLER_TOKENS is empty; agent endpoints will refuse every caller");
    }

    let model = build_model(&config)?;
    let ledger = open_ledger(&config.ledger)?;
    let state = AppState::from_config(&config, model, ledger);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(addr = %config.bind, "gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("gateway stopped cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
