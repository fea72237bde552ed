//! Serve command - runs the API and UI on one port

use std::net::SocketAddr;

use clap::Args;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use crate::api::router::{create_router, MetricsEndpoint};
use crate::config::AppConfig;
use crate::infrastructure::observability::init_metrics;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on (overrides configuration)
    #[arg(long, short)]
    pub port: Option<u16>,
}

/// Run the combined API + UI server
pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = super::bootstrap();
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let state = crate::create_app_state_with_config(&config);
    let metrics = init_metrics(&config.metrics).map(|metrics| MetricsEndpoint {
        metrics,
        path: config.metrics.path.clone(),
    });
    let app = create_router(state, &config.ui, metrics);

    let addr = build_socket_addr(&config)?;
    info!("Starting server on {}", addr);
    if config.ui.enabled {
        info!("UI available at http://{}/ui/", addr);
    }

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn build_socket_addr(config: &AppConfig) -> anyhow::Result<SocketAddr> {
    Ok(SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    )))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
