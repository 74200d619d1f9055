//! Ringleader daemon - LCR ring leader election
//!
//! Usage:
//!   # Start the registry first
//!   ringleaderd registry
//!
//!   # Then start peers with distinct identifiers
//!   ringleaderd peer --id 5
//!   ringleaderd peer --id 11
//!   ringleaderd peer --id 2
//!   ringleaderd peer --id 7
//!
//!   # At any peer prompt: `election` starts a ring-wide election,
//!   # `exit` shuts the peer down.

use anyhow::Context;
use clap::Parser;
use ringleader::{Participant, Registry, RingError};
use ringleaderd::{Cli, Command};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Reject malformed arguments before any socket is opened
    if let Err(e) = cli.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config = cli.ring_config();

    match cli.command {
        Command::Registry { .. } => {
            let (_registry, server) = Registry::serve(config)
                .await
                .context("failed to start registry")?;

            tracing::info!("registry ready, waiting for peer registrations");
            wait_for_shutdown_signal().await;

            tracing::info!("shutting down");
            server.shutdown().await;
        }
        Command::Peer { id, .. } => {
            let peer = Participant::new(id, config).context("invalid peer configuration")?;
            let server = peer.serve().await.context("failed to start peer server")?;

            // Registration failures are distinct so the operator knows
            // whether to pick another id or simply wait and retry.
            match peer.register().await {
                Ok(()) => {}
                Err(RingError::DuplicateId(id)) => {
                    eprintln!("peer {} is already registered, pick a different id", id);
                    std::process::exit(1);
                }
                Err(RingError::ElectionInProgress) => {
                    eprintln!("an election is in progress, retry registration later");
                    std::process::exit(1);
                }
                Err(e) => {
                    return Err(e).context("registration failed");
                }
            }

            run_peer_console(&peer).await;

            tracing::info!(id, "shutting down");
            server.shutdown().await;
        }
    }

    Ok(())
}

/// Interactive peer console: `election` broadcasts an election start,
/// `exit` (or EOF / a shutdown signal) stops the peer
async fn run_peer_console(peer: &Participant) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    eprintln!(
        "peer {}: type 'election' to start an election or 'exit' to quit",
        peer.id()
    );

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    // stdin closed; keep running until a signal arrives
                    wait_for_shutdown_signal().await;
                    return;
                };
                match line.trim() {
                    "election" => {
                        match peer.request_broadcast().await {
                            Ok(()) => tracing::info!(id = peer.id(), "election broadcast requested"),
                            Err(e) => tracing::error!(id = peer.id(), error = %e, "broadcast failed"),
                        }
                    }
                    "exit" => return,
                    "" => {}
                    other => {
                        eprintln!("unknown command: {:?} (try 'election' or 'exit')", other);
                    }
                }
            }
            _ = wait_for_shutdown_signal() => {
                return;
            }
        }
    }
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM");
        }
    }
}
