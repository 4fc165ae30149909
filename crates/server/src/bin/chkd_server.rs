use chkd_deployment::Deployment;
use chkd_local_deployment::LocalDeployment;
use chkd_server::routes;
use chkd_utils::config::ChkdConfig;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;

fn default_port() -> u16 {
    std::env::var("CHKD_HTTP_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4884)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chkd_utils::logging::init();

    let config = ChkdConfig::from_env();
    tracing::info!(data_dir = %config.data_dir.display(), "starting chkd coordinator");

    let deployment = LocalDeployment::open(config).await?;
    let app = routes::router(&deployment)
        .with_state(deployment.clone())
        .layer(CorsLayer::permissive());

    let port = default_port();
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(deployment.clone()))
        .await?;

    Ok(())
}

async fn shutdown_signal(deployment: LocalDeployment) {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutting down");
    deployment.shutdown().await;
}
