use std::sync::Arc;
use std::time::Duration;

use tonic::body::Body;
use tonic::transport::{Channel, Endpoint};
use tower::Layer;

use super::error::ClientError;
use crate::services::middleware::{HttpMiddleware, MiddlewareLayer, MiddlewareService, timeout};
use crate::services::registry::Discovery;
use crate::services::resolver::discovery::DISCOVERY_SCHEME;
use crate::services::resolver::{BalancedChannel, DiscoveryBuilder, DiscoveryResolver};

/// gRPC 客户端中间件
pub type ClientMiddleware = HttpMiddleware<Body, Body>;

/// 带中间件的客户端通道，可直接传给生成的客户端
pub type ClientChannel = MiddlewareService<Channel, Body, Body>;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// gRPC 客户端连接
///
/// `endpoint` 可以是直连地址 `127.0.0.1:9000`，
/// 也可以是服务发现目标 `discovery:///helloworld`（需要配置 [`Discovery`]）。
pub struct GrpcClient {
    channel: ClientChannel,
    target: String,
    resolver: Option<DiscoveryResolver>,
}

impl GrpcClient {
    pub fn builder(endpoint: impl Into<String>) -> GrpcClientBuilder {
        GrpcClientBuilder::new(endpoint)
    }

    pub fn channel(&self) -> ClientChannel {
        self.channel.clone()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// 停止服务发现的解析循环
    pub async fn close(&self) {
        if let Some(resolver) = &self.resolver {
            resolver.close().await;
        }
    }
}

/// [`GrpcClient`] 构建器
pub struct GrpcClientBuilder {
    endpoint: String,
    timeout: Duration,
    middlewares: Vec<ClientMiddleware>,
    discovery: Option<Arc<dyn Discovery>>,
    debug_log: bool,
}

impl GrpcClientBuilder {
    fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: DEFAULT_CALL_TIMEOUT,
            middlewares: Vec::new(),
            discovery: None,
            debug_log: false,
        }
    }

    /// 单次调用的超时，`Duration::ZERO` 表示不限制
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn middleware(mut self, middlewares: impl IntoIterator<Item = ClientMiddleware>) -> Self {
        self.middlewares.extend(middlewares);
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// 以 JSON 打印每批发现的实例
    pub fn debug_log(mut self, debug_log: bool) -> Self {
        self.debug_log = debug_log;
        self
    }

    /// 使用安全连接，只选择 `grpcs` 或 `isSecure=true` 的端点
    pub async fn connect(self) -> Result<GrpcClient, ClientError> {
        self.dial(false).await
    }

    /// 使用明文连接
    pub async fn connect_insecure(self) -> Result<GrpcClient, ClientError> {
        self.dial(true).await
    }

    async fn dial(self, insecure: bool) -> Result<GrpcClient, ClientError> {
        if self.endpoint.is_empty() {
            return Err(ClientError::MissingEndpoint);
        }

        let (channel, resolver) = if is_discovery_target(&self.endpoint) {
            let discovery = self
                .discovery
                .clone()
                .ok_or_else(|| ClientError::MissingDiscovery(self.endpoint.clone()))?;
            let balanced = Arc::new(BalancedChannel::new().secure(!insecure));
            let resolver = DiscoveryBuilder::new(discovery)
                .insecure(insecure)
                .debug_log(self.debug_log)
                .build(&self.endpoint, balanced.clone())
                .await?;
            (balanced.channel(), Some(resolver))
        } else {
            (direct_channel(&self.endpoint, insecure)?, None)
        };

        tracing::debug!(
            target_endpoint = %self.endpoint,
            insecure,
            timeout_ms = %self.timeout.as_millis(),
            "gRPC client connected"
        );

        let mut middlewares = Vec::with_capacity(self.middlewares.len() + 1);
        middlewares.push(timeout(self.timeout));
        middlewares.extend(self.middlewares);

        Ok(GrpcClient {
            channel: MiddlewareLayer::global(middlewares).layer(channel),
            target: self.endpoint,
            resolver,
        })
    }
}

fn is_discovery_target(endpoint: &str) -> bool {
    endpoint
        .split_once("://")
        .is_some_and(|(scheme, _)| scheme == DISCOVERY_SCHEME)
}

// 直连地址延迟建立连接
fn direct_channel(address: &str, insecure: bool) -> Result<Channel, ClientError> {
    let uri = if address.contains("://") {
        address.to_string()
    } else {
        let scheme = if insecure { "http" } else { "https" };
        format!("{scheme}://{address}")
    };
    let endpoint = Endpoint::from_shared(uri).map_err(|err| ClientError::InvalidEndpoint {
        endpoint: address.to_string(),
        reason: err.to_string(),
    })?;
    Ok(endpoint.connect_lazy())
}
