use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gs_manager::{
    api::{ApiServer, AppState},
    config::Config,
    ports::{PortAllocator, Reservations},
    runtime::{ContainerRuntime, docker::DockerClient},
    servers::Lifecycle,
    telemetry,
    templates::TemplateRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    telemetry::init(config.log_format);

    let docker = DockerClient::connect(&config.docker_socket.to_string_lossy())
        .with_context(|| format!("connecting to {}", config.docker_socket.display()))?;
    docker.ping().await.context("docker daemon is not responding")?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    let templates = match &config.templates {
        Some(path) => TemplateRegistry::load(path)?,
        None => TemplateRegistry::builtin(),
    };

    let reservations = Reservations::new(config.reservation_ttl());
    let ports = PortAllocator::new(runtime.clone(), reservations);
    let lifecycle = Lifecycle::new(runtime, Arc::new(templates), ports, config.lifecycle());

    info!(
        data_root = %config.data_root.display(),
        socket = %config.docker_socket.display(),
        "gs-manager starting"
    );

    let state = AppState {
        lifecycle: Arc::new(lifecycle),
        streams: config.streams(),
    };
    ApiServer::new(state, &config.listen, config.port)
        .start_server()
        .await?;

    Ok(())
}
