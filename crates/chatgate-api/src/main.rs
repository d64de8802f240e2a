//! Chatgate CLI and HTTP entry point.
//!
//! Binary name: `chatgate`
//!
//! Parses CLI arguments, loads configuration, initializes logging, then
//! dispatches to the requested command or starts the HTTP server.

mod cli;
mod http;
mod state;

use std::future::IntoFuture;
use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;
use tokio_util::sync::CancellationToken;

use chatgate_types::config::ServiceConfig;
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need configuration
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "chatgate", &mut std::io::stdout());
        return Ok(());
    }

    let base_dir = std::env::current_dir().context("cannot determine working directory")?;
    let loaded = chatgate_infra::config::load_service_config(cli.config.as_deref(), &base_dir)
        .await
        .context("failed to load configuration")?;

    chatgate_observe::tracing_setup::init_tracing(&loaded.config.logging, cli.log_directive())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    if let Some(path) = &loaded.source {
        tracing::info!(path = %path.display(), "configuration loaded");
    }

    let result = match cli.command {
        Commands::Serve { port, host } => {
            let mut config = loaded.config;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            serve(config, cli.quiet).await
        }

        Commands::Config => {
            cli::config::show_config(&loaded.config, loaded.source.as_deref(), cli.json)
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    };

    chatgate_observe::tracing_setup::shutdown_tracing();
    result
}

/// Run the HTTP server until Ctrl+C / SIGTERM, then drain and stop the sweeper.
async fn serve(config: ServiceConfig, quiet: bool) -> anyhow::Result<()> {
    let state = AppState::init(config).context("invalid configuration")?;
    let config = state.config.clone();

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let sweeper = state.start_sweeper();
    let rate_limit = &config.rate_limit;
    tracing::info!(
        %addr,
        enabled = rate_limit.enabled,
        requests_per_second = rate_limit.requests_per_second,
        burst = rate_limit.burst,
        idle_timeout_secs = rate_limit.idle_timeout_secs,
        client_key = ?rate_limit.client_key,
        "admission control configured"
    );

    if !quiet {
        println!(
            "  {} Chatgate listening on {}",
            console::style("⚡").bold(),
            console::style(format!("http://{addr}")).cyan()
        );
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    let router = http::router::build_router(state);
    let shutdown = CancellationToken::new();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .into_future();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, draining connections");
        signal_token.cancel();
    });

    let drain_limit = config.server.shutdown_timeout();
    tokio::select! {
        result = server => result.context("server error")?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(drain_limit).await;
        } => {
            tracing::warn!(
                timeout_secs = drain_limit.as_secs(),
                "in-flight requests did not drain in time, forcing shutdown"
            );
        }
    }

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }

    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
