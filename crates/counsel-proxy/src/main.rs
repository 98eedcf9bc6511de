mod config;
mod cors;
mod error;
mod policy;
mod server;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use counsel_common::gateway::GatewayClient;

use config::ProxyConfig;
use policy::ForwardPolicy;
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting counsel-proxy");

    let config = ProxyConfig::from_env()?;
    let rewrite = format!("{} -> {}", config.rewrite_from, config.rewrite_to);
    info!(
        bind_addr = %config.bind_addr,
        forward_path = %config.forward_path,
        upstream_origin = %config.upstream_origin,
        rewrite = %rewrite,
        timeout_secs = config.gateway.timeout.map(|t| t.as_secs()),
        accept_invalid_certs = config.gateway.accept_invalid_certs,
        "configuration loaded"
    );

    let gateway = Arc::new(GatewayClient::new(config.gateway.clone())?);
    let state = AppState::new(
        gateway,
        ForwardPolicy::envelope(),
        ForwardPolicy::fixed_base(
            config.upstream_origin.clone(),
            config.rewrite_from.clone(),
            config.rewrite_to.clone(),
        ),
    );
    let app = server::router(state, &config.forward_path);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "proxy listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| tracing::error!(error = %e, "proxy server error"))?;

    info!("proxy shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
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
                warn!(error = %e, "failed to listen for SIGTERM");
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
    info!("shutdown signal received");
}
