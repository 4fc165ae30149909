use chkd_local_deployment::LocalDeployment;
use chkd_server::mcp::belt::BeltServer;
use chkd_utils::config::ChkdConfig;
use rmcp::transport::stdio;
use rmcp::ServiceExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chkd_utils::logging::init();

    let config = ChkdConfig::from_env();
    tracing::info!("starting chkd MCP belt (stdio)");

    let deployment = LocalDeployment::open(config).await?;
    let server = BeltServer::new(deployment);

    let service = server.serve(stdio()).await.map_err(|e| {
        tracing::error!(error = ?e, "failed to start MCP service");
        e
    })?;
    service.waiting().await?;

    Ok(())
}
