use std::sync::Arc;

use crate::BoxError;
use crate::app::{App, AppError};
use crate::config::Config;
use crate::services::middleware::{logging, recovery};
use crate::services::registry::MemoryRegistry;

/// 按配置启动 gRPC 服务，阻塞到收到退出信号
pub async fn start(config: &Config) -> Result<(), AppError> {
    let registry = MemoryRegistry::new();

    let server = config
        .grpc_server()
        .middleware([recovery(), logging()])
        .build();

    let opts = config
        .app_options_builder()
        .server(Arc::new(server))
        .registrar(Arc::new(registry.clone()))
        .after_start(move |ctx| {
            let registry = registry.clone();
            async move {
                tracing::info!(
                    name = %ctx.name,
                    instances = registry.instance_count(&ctx.name),
                    endpoints = ?ctx.endpoints,
                    "Service registered"
                );
                Ok::<_, BoxError>(())
            }
        })
        .build()?;

    let app = App::new(opts);
    tracing::info!(id = %app.id(), name = %app.name(), version = %app.version(), "Starting application");
    app.run().await
}
