mod api;
mod collector;
mod config;
mod console;
mod console_client;
mod error;
mod models;
mod vsphere;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use exodus_scheduler::Scheduler;
use exodus_store::Database;

use crate::api::AppState;
use crate::collector::CollectorService;
use crate::config::{Cli, Command, Config, LogFormat, ServerMode};
use crate::console::Console;
use crate::console_client::ConsoleClient;
use crate::vsphere::VCenterWalker;

const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let config = Config::from_args(args, cli.log_format, cli.log_level);
            config.validate()?;
            init_tracing(&config);
            run(config).await
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    match config.log_format {
        LogFormat::Console => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        agent_id = %config.agent.agent_id,
        source_id = %config.agent.source_id,
        mode = %config.agent.mode,
        server_mode = %config.server.mode,
        num_workers = config.agent.num_workers,
        console_url = %config.console.url,
        "starting migration agent"
    );
    if let Some(folder) = &config.agent.opa_policies_folder {
        info!(path = %folder.display(), "OPA policies folder configured");
    }

    let db = Database::open(config.agent.data_folder.as_deref())?;
    info!("database initialized");

    let scheduler = Arc::new(Scheduler::new(config.agent.num_workers));

    let token = load_bearer_token(&config)?;
    let console_client = Arc::new(ConsoleClient::new(config.console.url.clone(), token)?);

    let walker = Arc::new(VCenterWalker::new()?);
    let collector = Arc::new(CollectorService::new(
        scheduler.clone(),
        db.clone(),
        walker,
        config.agent.data_folder.clone(),
    ));

    let console = Console::new(
        config.agent.agent_id,
        config.agent.source_id,
        config.agent.mode,
        config.console.update_interval,
        scheduler.clone(),
        console_client,
        collector.clone(),
        &db,
    );

    let statics = (config.server.mode == ServerMode::Prod)
        .then(|| config.server.statics_folder.clone())
        .flatten();
    let router = api::build_router(
        AppState {
            collector,
            console: console.clone(),
        },
        statics.as_deref(),
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.http_port))
        .await
        .with_context(|| format!("binding port {}", config.server.http_port))?;
    info!(port = config.server.http_port, "starting HTTP server");

    let shutdown = CancellationToken::new();
    let drain = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { drain.cancelled().await })
            .await
    });

    let server_finished = tokio::select! {
        result = &mut server => {
            match result {
                Ok(Ok(())) => warn!("HTTP server exited"),
                Ok(Err(e)) => warn!(error = %e, "HTTP server failed"),
                Err(e) => warn!(error = %e, "HTTP server task failed"),
            }
            true
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            false
        }
    };

    shutdown.cancel();
    if !server_finished
        && tokio::time::timeout(HTTP_DRAIN_TIMEOUT, &mut server)
            .await
            .is_err()
    {
        warn!("HTTP drain timed out, aborting server");
        server.abort();
    }

    console.shutdown();
    scheduler.close().await;
    info!("agent stopped");
    Ok(())
}

fn load_bearer_token(config: &Config) -> anyhow::Result<Option<String>> {
    if !config.auth.enabled {
        return Ok(None);
    }
    let Some(path) = &config.auth.jwt_filepath else {
        return Ok(None);
    };
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("reading JWT file {}", path.display()))?;
    Ok(Some(token.trim().to_string()))
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
