use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::AppContext;
use super::error::AppError;
use super::signals::Signal;
use crate::BoxError;
use crate::services::registry::Registrar;
use crate::services::transport::Server;

pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// 生命周期钩子
pub type Hook = Arc<dyn Fn(AppContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// 触发优雅退出的方式
#[derive(Debug, Clone)]
pub enum ShutdownTrigger {
    /// 监听系统信号
    Signals(Vec<Signal>),
    /// 由外部令牌触发，常用于测试与嵌入
    Token(CancellationToken),
    /// 只能通过 `stop` 或父令牌退出
    Disabled,
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        ShutdownTrigger::Signals(Signal::defaults())
    }
}

/// 应用配置，由 [`AppOptions::builder`] 构建
pub struct AppOptions {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) metadata: HashMap<String, String>,
    pub(crate) endpoints: Vec<String>,
    pub(crate) shutdown: ShutdownTrigger,
    pub(crate) parent: Option<CancellationToken>,
    pub(crate) registrar: Option<Arc<dyn Registrar>>,
    pub(crate) registry_timeout: Duration,
    pub(crate) stop_timeout: Duration,
    pub(crate) servers: Vec<Arc<dyn Server>>,
    pub(crate) before_start: Vec<Hook>,
    pub(crate) after_start: Vec<Hook>,
    pub(crate) before_stop: Vec<Hook>,
    pub(crate) after_stop: Vec<Hook>,
}

impl AppOptions {
    pub fn builder() -> AppOptionsBuilder {
        AppOptionsBuilder::default()
    }
}

fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn(AppContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |ctx: AppContext| -> BoxFuture<'static, Result<(), BoxError>> { Box::pin(f(ctx)) })
}

/// [`AppOptions`] 构建器
pub struct AppOptionsBuilder {
    id: Option<String>,
    name: String,
    version: String,
    metadata: HashMap<String, String>,
    endpoints: Vec<String>,
    shutdown: ShutdownTrigger,
    parent: Option<CancellationToken>,
    registrar: Option<Arc<dyn Registrar>>,
    registry_timeout: Duration,
    stop_timeout: Duration,
    servers: Vec<Arc<dyn Server>>,
    before_start: Vec<Hook>,
    after_start: Vec<Hook>,
    before_stop: Vec<Hook>,
    after_stop: Vec<Hook>,
}

impl Default for AppOptionsBuilder {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            version: String::new(),
            metadata: HashMap::new(),
            endpoints: Vec::new(),
            shutdown: ShutdownTrigger::default(),
            parent: None,
            registrar: None,
            registry_timeout: DEFAULT_REGISTRY_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            servers: Vec::new(),
            before_start: Vec::new(),
            after_start: Vec::new(),
            before_stop: Vec::new(),
            after_stop: Vec::new(),
        }
    }
}

impl AppOptionsBuilder {
    /// 实例ID，未设置时生成 UUID
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_map(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// 显式公布的端点，设置后不再询问服务端
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    pub fn endpoints(mut self, endpoints: impl IntoIterator<Item = String>) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    pub fn signals(mut self, signals: Vec<Signal>) -> Self {
        self.shutdown = ShutdownTrigger::Signals(signals);
        self
    }

    /// 用令牌代替系统信号触发退出
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = ShutdownTrigger::Token(token);
        self
    }

    pub fn disable_signals(mut self) -> Self {
        self.shutdown = ShutdownTrigger::Disabled;
        self
    }

    /// 父令牌取消时应用随之退出
    pub fn parent(mut self, token: CancellationToken) -> Self {
        self.parent = Some(token);
        self
    }

    pub fn registrar(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn registry_timeout(mut self, timeout: Duration) -> Self {
        self.registry_timeout = timeout;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn server(mut self, server: Arc<dyn Server>) -> Self {
        self.servers.push(server);
        self
    }

    pub fn servers(mut self, servers: impl IntoIterator<Item = Arc<dyn Server>>) -> Self {
        self.servers.extend(servers);
        self
    }

    pub fn before_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AppContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.before_start.push(hook(f));
        self
    }

    pub fn after_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AppContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.after_start.push(hook(f));
        self
    }

    pub fn before_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AppContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.before_stop.push(hook(f));
        self
    }

    pub fn after_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AppContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.after_stop.push(hook(f));
        self
    }

    pub fn build(self) -> Result<AppOptions, AppError> {
        let id = match self.id {
            Some(id) if id.trim().is_empty() => {
                return Err(AppError::Config("id must not be empty".to_string()));
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        if self.registry_timeout.is_zero() {
            return Err(AppError::Config("registry_timeout must be non-zero".to_string()));
        }
        if self.stop_timeout.is_zero() {
            return Err(AppError::Config("stop_timeout must be non-zero".to_string()));
        }

        for endpoint in &self.endpoints {
            if endpoint.is_empty() {
                return Err(AppError::Config("endpoint must not be empty".to_string()));
            }
            Url::parse(endpoint)
                .map_err(|e| AppError::Config(format!("invalid endpoint {endpoint}: {e}")))?;
        }

        Ok(AppOptions {
            id,
            name: self.name,
            version: self.version,
            metadata: self.metadata,
            endpoints: self.endpoints,
            shutdown: self.shutdown,
            parent: self.parent,
            registrar: self.registrar,
            registry_timeout: self.registry_timeout,
            stop_timeout: self.stop_timeout,
            servers: self.servers,
            before_start: self.before_start,
            after_start: self.after_start,
            before_stop: self.before_stop,
            after_stop: self.after_stop,
        })
    }
}
