use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vanish_core::{Clock, SystemClock};
use vanish_reclaim::spawn_periodic_sweep;
use vanish_server::api::AppState;
use vanish_server::config::VanishConfig;

/// Self-expiring file share server.
#[derive(Parser, Debug)]
#[command(name = "vanish-server", about = "HTTP server for the Vanish file share")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "vanish.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Run the HTTP server (the default).
    Serve,
    /// Run one sweep, print the report as JSON, and exit.
    Sweep,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = VanishConfig::load(&cli.config)?;
    config.apply_env_overrides()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host.clone() {
        config.server.host = host;
    }
    config.validate()?;

    let telemetry_guard = vanish_server::telemetry::init(&config.telemetry, &config.server.environment);

    let outcome = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config).await.map(|()| ExitCode::SUCCESS),
        Commands::Sweep => sweep_once(&config).await,
    };

    telemetry_guard.shutdown();
    outcome
}

async fn serve(config: &VanishConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = vanish_server::store_factory::create_store(&config.store).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = AppState::build(store, clock, config);

    if state.cleanup_secret.is_none() {
        warn!("no cleanup trigger secret configured; /cleanup is open to anyone");
    }
    info!(
        backend = state.backend,
        ttl_ms = config.expiry.ttl_ms,
        max_upload_bytes = config.expiry.max_upload_bytes,
        timers = state.timers.is_some(),
        "vanish configured"
    );

    let shutdown = CancellationToken::new();
    let sweep_task = config.reclaim.enabled.then(|| {
        spawn_periodic_sweep(
            Arc::clone(&state.sweeper),
            Duration::from_secs(config.reclaim.interval_seconds),
            config.reclaim.sweep_on_start,
            shutdown.clone(),
        )
    });
    let timers = state.timers.clone();

    let app = vanish_server::api::router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "vanish-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    let wind_down = async {
        if let Some(task) = sweep_task
            && let Err(e) = task.await
        {
            warn!(error = %e, "periodic sweep task ended abnormally");
        }
        if let Some(timers) = timers {
            timers.shutdown().await;
        }
    };
    if tokio::time::timeout(shutdown_timeout, wind_down).await.is_err() {
        warn!(
            timeout_secs = config.server.shutdown_timeout_seconds,
            "shutdown timeout exceeded; remaining uploads are left to the next sweep"
        );
    }

    info!("vanish-server shut down");
    Ok(())
}

/// Run the `sweep` subcommand: one pass over the store, report on stdout.
async fn sweep_once(config: &VanishConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let store = vanish_server::store_factory::create_store(&config.store).await?;
    let state = AppState::build(store, Arc::new(SystemClock), config);

    match state.sweeper.run().await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "sweep failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
