use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::body::Body;
use tonic::service::Routes;
use url::Url;

use super::Server;
use super::error::ServerError;
use super::host::advertise_addr;
use crate::services::middleware::{HttpMiddleware, Matcher, MiddlewareLayer};
use crate::services::resolver::endpoint::new_endpoint;

/// gRPC 服务端中间件
pub type ServerMiddleware = HttpMiddleware<Body, Body>;

pub const DEFAULT_NETWORK: &str = "tcp";
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:0";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ListenerState {
    listener: Option<TcpListener>,
    endpoint: Option<Url>,
    started: bool,
}

/// 基于 tonic 的 [`Server`] 实现
pub struct GrpcServer {
    network: String,
    address: String,
    timeout: Duration,
    routes: Routes,
    layer: MiddlewareLayer<Body, Body>,
    state: Mutex<ListenerState>,
    stop: CancellationToken,
    started: AtomicBool,
    done: watch::Sender<bool>,
}

impl GrpcServer {
    pub fn builder() -> GrpcServerBuilder {
        GrpcServerBuilder::default()
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    // 首次调用时绑定监听，之后复用
    async fn listen(&self, state: &mut ListenerState) -> Result<Url, ServerError> {
        if let Some(endpoint) = &state.endpoint {
            return Ok(endpoint.clone());
        }

        if self.network != DEFAULT_NETWORK {
            return Err(ServerError::UnsupportedNetwork(self.network.clone()));
        }
        if self.address.is_empty() {
            return Err(ServerError::InvalidAddress(self.address.clone()));
        }

        let listener = TcpListener::bind(&self.address)
            .await
            .map_err(ServerError::Bind)?;
        let local = listener.local_addr().map_err(ServerError::Bind)?;
        let host = advertise_addr(local);
        let endpoint = new_endpoint("grpc", &host, false)
            .map_err(|err| ServerError::Endpoint(format!("{host}: {err}")))?;

        tracing::debug!(
            local_addr = %local,
            endpoint = %endpoint,
            "gRPC listener bound"
        );

        state.listener = Some(listener);
        state.endpoint = Some(endpoint.clone());
        Ok(endpoint)
    }
}

#[async_trait]
impl Server for GrpcServer {
    async fn start(&self, token: CancellationToken) -> Result<(), ServerError> {
        let listener = {
            let mut state = self.state.lock().await;
            if state.started {
                return Err(ServerError::AlreadyStarted);
            }
            self.listen(&mut state).await?;
            state.started = true;
            state
                .listener
                .take()
                .ok_or(ServerError::AlreadyStarted)?
        };

        let local = listener.local_addr().map_err(ServerError::Bind)?;
        tracing::info!(address = %local, "gRPC server listening");

        self.started.store(true, Ordering::SeqCst);
        let stop = self.stop.clone();
        let shutdown = async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = stop.cancelled() => {}
            }
        };

        let mut builder = tonic::transport::Server::builder();
        if !self.timeout.is_zero() {
            builder = builder.timeout(self.timeout);
        }
        let result = builder
            .layer(self.layer.clone())
            .add_routes(self.routes.clone())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await;

        self.done.send_replace(true);
        tracing::info!(address = %local, "gRPC server stopped");
        result.map_err(ServerError::from)
    }

    async fn stop(&self) -> Result<(), ServerError> {
        self.stop.cancel();
        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(address = %self.address, "Stopping gRPC server");
        let mut done = self.done.subscribe();
        done.wait_for(|done| *done)
            .await
            .map(|_| ())
            .map_err(|err| ServerError::Other(Box::new(err)))
    }

    async fn endpoint(&self) -> Result<Url, ServerError> {
        let mut state = self.state.lock().await;
        self.listen(&mut state).await
    }
}

/// [`GrpcServer`] 构建器
pub struct GrpcServerBuilder {
    network: String,
    address: String,
    timeout: Duration,
    routes: Routes,
    matcher: Matcher<ServerMiddleware>,
}

impl Default for GrpcServerBuilder {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            timeout: DEFAULT_TIMEOUT,
            routes: Routes::default(),
            matcher: Matcher::new(),
        }
    }
}

impl GrpcServerBuilder {
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 注册的 gRPC 服务
    pub fn routes(mut self, routes: Routes) -> Self {
        self.routes = routes;
        self
    }

    /// 对所有方法生效的中间件
    pub fn middleware(mut self, middlewares: impl IntoIterator<Item = ServerMiddleware>) -> Self {
        self.matcher.use_global(middlewares);
        self
    }

    /// 按方法选择器注册中间件，如 `/helloworld.Greeter/*`
    pub fn use_middleware(
        mut self,
        selector: &str,
        middlewares: impl IntoIterator<Item = ServerMiddleware>,
    ) -> Self {
        self.matcher.add(selector, middlewares);
        self
    }

    pub fn build(self) -> GrpcServer {
        GrpcServer {
            network: self.network,
            address: self.address,
            timeout: self.timeout,
            routes: self.routes,
            layer: MiddlewareLayer::new(self.matcher),
            state: Mutex::new(ListenerState::default()),
            stop: CancellationToken::new(),
            started: AtomicBool::new(false),
            done: watch::channel(false).0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::resolver::endpoint::parse_endpoint;
    use std::sync::Arc;

    fn local_server() -> GrpcServer {
        GrpcServer::builder().address("127.0.0.1:0").build()
    }

    #[tokio::test]
    async fn test_endpoint_is_stable() {
        let server = local_server();
        let first = server.endpoint().await.unwrap();
        let second = server.endpoint().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.scheme(), "grpc");
        assert_eq!(first.host_str(), Some("127.0.0.1"));

        let address = parse_endpoint(&[first.to_string()], "grpc", false).unwrap();
        assert!(address.unwrap().starts_with("127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_unsupported_network() {
        let server = GrpcServer::builder().network("unix").build();
        assert!(matches!(
            server.endpoint().await,
            Err(ServerError::UnsupportedNetwork(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let server = local_server();
        tokio::time::timeout(Duration::from_secs(1), server.stop())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let server = Arc::new(local_server());
        let token = CancellationToken::new();

        let running = {
            let server = server.clone();
            let token = token.clone();
            tokio::spawn(async move { server.start(token).await })
        };

        // 等待服务开始监听
        tokio::time::timeout(Duration::from_secs(5), async {
            while !server.started.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), server.stop())
            .await
            .unwrap()
            .unwrap();
        running.await.unwrap().unwrap();

        assert!(matches!(
            server.start(token).await,
            Err(ServerError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_group_token_shuts_down() {
        let server = Arc::new(local_server());
        let token = CancellationToken::new();

        let running = {
            let server = server.clone();
            let token = token.clone();
            tokio::spawn(async move { server.start(token).await })
        };

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
