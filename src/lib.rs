pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod clock;
pub mod db;
pub mod error;
pub mod jwt;
pub mod lockout;
pub mod password;
pub mod rate_limit;
pub mod revocation;
pub mod session;
pub mod settings;

use std::net::SocketAddr;
use std::sync::Arc;

use api::create_api_router;
use auth::{AuthState, IpSource};
use axum::Router;
use session::SessionService;
use tokio::net::TcpListener;
use tracing::{error, info};

pub struct ServerConfig {
    /// Session service shared by every request
    pub service: Arc<SessionService>,
    /// Where client addresses are read from (requires a trusted proxy for headers)
    pub ip_source: IpSource,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    create_api_router(AuthState::new(
        config.service.clone(),
        config.ip_source.clone(),
    ))
}

/// Run the server on the given listener until `shutdown` resolves. In-flight
/// requests are allowed to finish before this returns.
pub async fn run_server<F>(
    config: ServerConfig,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
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
                error!(error = %e, "Failed to listen for SIGTERM");
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
    info!("Shutdown signal received");
}
