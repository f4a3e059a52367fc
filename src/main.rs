use grpc_stratus::config::Config;
use grpc_stratus::{server, telemetry};

#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    telemetry::init(&config.log.filter);

    tracing::info!(
        address = %config.server.address,
        network = %config.server.network,
        "Configuration loaded"
    );

    server::start(&config).await?;
    Ok(())
}
