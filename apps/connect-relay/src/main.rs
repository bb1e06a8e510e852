use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use connect_relay::{
    cleanup::spawn_cleanup_task,
    cli::{run_debug_client, Cli, Commands, ServeArgs},
    telemetry, AppState, Config, SystemClock,
};

#[tokio::main]
async fn main() {
    if let Err(err) = telemetry::init_tracing() {
        eprintln!("{err:#}");
    }

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Debug { url, command }) => run_debug_client(url, command).await,
        Some(Commands::Serve(args)) => serve(args).await,
        None => serve(ServeArgs::default()).await,
    };

    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.apply(Config::from_env());
    info!(?config, "starting connect relay");

    let metrics = telemetry::init_metrics()?;
    let state = AppState::from_config(&config).await?.with_metrics(metrics);
    let cleanup = spawn_cleanup_task(
        state.stores(),
        Arc::new(SystemClock),
        config.cleanup_interval(),
    );

    let app = connect_relay::build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, backend = %config.backend, "connect relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cleanup.abort();
    info!("connect relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
