use s3_gateway::{
    config::Config,
    credentials::CredentialCache,
    gateway::Gateway,
    passthrough::PassthroughResponder,
    resolver::Resolver,
    s3_client::S3Client,
    server::Server,
    shutdown::{ShutdownCoordinator, ShutdownSignal},
    Result,
};
use std::sync::Arc;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    s3_gateway::logging::init_logging(&config.logging)?;

    info!(
        "Starting s3-gateway v{} (built: {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIMESTAMP")
    );

    // rustls needs a process-wide crypto provider before any TLS config is built
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    let credentials = Arc::new(CredentialCache::from_config(&config.credentials));
    let client = Arc::new(S3Client::new(
        &config.storage,
        Arc::clone(&credentials),
        config.server.request_timeout,
    )?);

    let resolver = Resolver::new(config.storage.virtual_host_domain.clone());
    let gateway = Arc::new(Gateway::new(
        resolver,
        client,
        config.server.passthrough_enabled,
    ));
    let passthrough = Arc::new(PassthroughResponder::new(&config.storage, credentials)?);

    let server = Server::bind(
        &config.server.listen_address,
        gateway,
        passthrough,
        config.server.idle_timeout,
    )
    .await?;

    let shutdown_coordinator = ShutdownCoordinator::new();
    let shutdown_signal = ShutdownSignal::new(shutdown_coordinator.subscribe());

    tokio::spawn(async move {
        if let Err(e) = shutdown_coordinator.listen_for_shutdown().await {
            error!("Shutdown listener failed: {}", e);
        }
    });

    server.run(shutdown_signal).await?;

    info!("s3-gateway stopped");
    Ok(())
}
