//! coderoom HTTP and WebSocket server.
//!
//! REST endpoints manage projects, collaborators, stored file trees and chat
//! history. `GET /ws` is the session channel: clients join a project room,
//! chat, push tree edits and receive assistant patches in real time.

mod channel;
mod handlers;
pub mod relay;
pub mod rooms;
mod routes;
mod state;
mod ws;

use coderoom_config::CoderoomConfig;
use tracing::{error, info};

pub use handlers::ErrorResponse;
pub use rooms::{ConnectionId, RoomRegistry};
pub use routes::build_router;
pub use state::{AppState, Settings};

/// Start the server with graceful shutdown on SIGTERM/SIGINT.
pub async fn serve(config: CoderoomConfig) -> Result<(), Box<dyn std::error::Error>> {
    let host = &config.server.host;
    if config.auth.users.is_empty() && !is_loopback_host(host) {
        return Err("Refusing to start without configured users on a non-local host".into());
    }

    let state = AppState::from_config(&config)?;
    let app = build_router(state.clone());

    let addr = format!("{}:{}", host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("coderoom listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            state.rooms().shutdown();
        })
        .await?;
    info!("coderoom shut down gracefully");
    Ok(())
}

fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
        _ = ctrl_c => { info!("Received SIGINT, shutting down..."); }
        _ = terminate => { info!("Received SIGTERM, shutting down..."); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_hosts() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("::1"));
        assert!(!is_loopback_host("0.0.0.0"));
        assert!(!is_loopback_host("example.com"));
    }

    #[tokio::test]
    async fn test_refuses_open_public_bind() {
        let mut config = CoderoomConfig::default();
        config.server.host = "0.0.0.0".to_string();
        let err = serve(config).await.unwrap_err();
        assert!(err.to_string().contains("Refusing"));
    }
}
