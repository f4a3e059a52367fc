use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::endpoint::parse_endpoint;
use super::error::ResolverError;
use super::{Attributes, ClientConn, ResolvedAddress};
use crate::services::registry::{Discovery, RegistryError, ServiceInstance, Watcher};

/// 服务发现目标的协议名：`discovery:///<service>`
pub const DISCOVERY_SCHEME: &str = "discovery";

/// 端点协议的基础名
const ENDPOINT_SCHEME: &str = "grpc";

/// 订阅出错后的重试间隔
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// 打开订阅的默认超时
const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(10);

/// 将服务发现的订阅结果持续转换为连接层的地址集合
///
/// 每一批非空的实例列表都会整体替换之前发布的地址集合；空批次会被丢弃，
/// 避免注册中心短暂异常时清空所有可用连接。
pub struct DiscoveryResolver {
    watcher: Arc<dyn Watcher>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryResolver {
    /// 启动解析循环
    pub fn spawn(
        watcher: Arc<dyn Watcher>,
        conn: Arc<dyn ClientConn>,
        insecure: bool,
        debug_log: bool,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_loop(
            watcher.clone(),
            conn,
            cancel.clone(),
            insecure,
            debug_log,
        ));
        Self {
            watcher,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// 立即解析，订阅模型下不需要做任何事
    pub fn resolve_now(&self) {}

    /// 停止解析循环并停止底层订阅
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Err(err) = self.watcher.stop().await {
            tracing::error!(error = %err, "Failed to stop discovery watcher");
        }
        if let Some(task) = self.task.lock().await.take()
            && let Err(err) = task.await
        {
            tracing::warn!(error = %err, "Resolver task ended abnormally");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for DiscoveryResolver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn watch_loop(
    watcher: Arc<dyn Watcher>,
    conn: Arc<dyn ClientConn>,
    cancel: CancellationToken,
    insecure: bool,
    debug_log: bool,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = watcher.next() => result,
        };

        let instances = match result {
            Ok(instances) => instances,
            Err(RegistryError::Cancelled) => return,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to watch discovery endpoint");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                }
                continue;
            }
        };

        update(conn.as_ref(), instances, insecure, debug_log).await;
    }
}

async fn update(
    conn: &dyn ClientConn,
    instances: Vec<ServiceInstance>,
    insecure: bool,
    debug_log: bool,
) {
    // 记录原始批次，包括被去重或解析失败的实例
    let batch = if debug_log { encode_batch(&instances) } else { None };
    let addresses = resolve_addresses(instances, insecure);

    if addresses.is_empty() {
        tracing::warn!("Zero endpoint found, refused to write");
        return;
    }

    if let Some(json) = batch {
        tracing::info!(instances = %json, "Update discovery instances");
    }

    if let Err(err) = conn.update_state(addresses).await {
        tracing::error!(error = %err, "Failed to update resolver state");
    }
}

fn encode_batch(instances: &[ServiceInstance]) -> Option<String> {
    match serde_json::to_string(instances) {
        Ok(json) => Some(json),
        Err(err) => {
            tracing::debug!(error = %err, "Failed to encode instances for logging");
            None
        }
    }
}

/// 将一批实例转换为去重后的地址列表，保持实例顺序
pub fn resolve_addresses(instances: Vec<ServiceInstance>, insecure: bool) -> Vec<ResolvedAddress> {
    let mut seen = HashSet::new();
    let mut addresses = Vec::with_capacity(instances.len());

    for instance in instances {
        let endpoint = match parse_endpoint(&instance.endpoints, ENDPOINT_SCHEME, !insecure) {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => continue,
            Err(err) => {
                tracing::error!(
                    instance_id = %instance.id,
                    endpoints = ?instance.endpoints,
                    error = %err,
                    "Failed to parse discovery endpoint"
                );
                continue;
            }
        };
        if !seen.insert(endpoint.clone()) {
            continue;
        }

        let instance = Arc::new(instance);
        addresses.push(ResolvedAddress {
            server_name: instance.name.clone(),
            endpoint,
            attributes: Attributes {
                metadata: instance.metadata.clone(),
                instance,
            },
        });
    }

    addresses
}

/// 从 `discovery:///<service>` 目标中解析服务名
pub fn parse_target(target: &str) -> Result<String, ResolverError> {
    let url = url::Url::parse(target)
        .map_err(|err| ResolverError::InvalidTarget(format!("{target}: {err}")))?;
    if url.scheme() != DISCOVERY_SCHEME {
        return Err(ResolverError::InvalidTarget(target.to_string()));
    }
    let name = url.path().trim_start_matches('/');
    if name.is_empty() {
        return Err(ResolverError::InvalidTarget(target.to_string()));
    }
    Ok(name.to_string())
}

/// 为 `discovery:///` 目标创建 [`DiscoveryResolver`]
#[derive(Clone)]
pub struct DiscoveryBuilder {
    discovery: Arc<dyn Discovery>,
    timeout: Duration,
    insecure: bool,
    debug_log: bool,
}

impl DiscoveryBuilder {
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self {
            discovery,
            timeout: DEFAULT_BUILD_TIMEOUT,
            insecure: false,
            debug_log: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn debug_log(mut self, debug_log: bool) -> Self {
        self.debug_log = debug_log;
        self
    }

    pub fn scheme(&self) -> &'static str {
        DISCOVERY_SCHEME
    }

    /// 打开订阅并启动解析循环
    pub async fn build(
        &self,
        target: &str,
        conn: Arc<dyn ClientConn>,
    ) -> Result<DiscoveryResolver, ResolverError> {
        let service_name = parse_target(target)?;

        let watcher = tokio::time::timeout(self.timeout, self.discovery.watch(&service_name))
            .await
            .map_err(|_| ResolverError::Timeout)??;

        tracing::debug!(
            service_name = %service_name,
            insecure = self.insecure,
            "Discovery resolver started"
        );

        Ok(DiscoveryResolver::spawn(
            watcher,
            conn,
            self.insecure,
            self.debug_log,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// 按脚本依次返回结果，脚本耗尽后阻塞直到被停止
    struct ScriptedWatcher {
        script: StdMutex<VecDeque<Result<Vec<ServiceInstance>, RegistryError>>>,
        stopped: CancellationToken,
        stop_called: AtomicBool,
    }

    impl ScriptedWatcher {
        fn new(script: Vec<Result<Vec<ServiceInstance>, RegistryError>>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
                stopped: CancellationToken::new(),
                stop_called: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Watcher for ScriptedWatcher {
        async fn next(&self) -> Result<Vec<ServiceInstance>, RegistryError> {
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(result) => result,
                None => {
                    self.stopped.cancelled().await;
                    Err(RegistryError::Cancelled)
                }
            }
        }

        async fn stop(&self) -> Result<(), RegistryError> {
            self.stop_called.store(true, Ordering::SeqCst);
            self.stopped.cancel();
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingConn {
        updates: StdMutex<Vec<Vec<String>>>,
    }

    impl RecordingConn {
        fn updates(&self) -> Vec<Vec<String>> {
            self.updates.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClientConn for RecordingConn {
        async fn update_state(&self, addresses: Vec<ResolvedAddress>) -> Result<(), ResolverError> {
            self.updates
                .lock()
                .unwrap()
                .push(addresses.into_iter().map(|a| a.endpoint).collect());
            Ok(())
        }
    }

    fn instance(id: &str, endpoints: &[&str]) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            name: "helloworld".to_string(),
            version: "v1".to_string(),
            endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_addresses_dedup_and_skip() {
        let instances = vec![
            instance("a", &["grpc://10.0.0.1:9000?isSecure=false"]),
            instance("b", &["grpc://10.0.0.1:9000?isSecure=false"]),
            instance("c", &["http://10.0.0.2:8000"]),
            instance("d", &["::bad::"]),
            instance("e", &["grpc://10.0.0.3:9000?isSecure=false"]),
        ];
        let addresses = resolve_addresses(instances, true);
        let endpoints: Vec<_> = addresses.iter().map(|a| a.endpoint.as_str()).collect();
        assert_eq!(endpoints, vec!["10.0.0.1:9000", "10.0.0.3:9000"]);
        assert_eq!(addresses[0].attributes.instance.id, "a");
        assert_eq!(addresses[0].server_name, "helloworld");
    }

    #[test]
    fn test_debug_batch_keeps_discarded_instances() {
        let instances = vec![
            instance("a", &["grpc://10.0.0.1:9000?isSecure=false"]),
            instance("b", &["grpc://10.0.0.1:9000?isSecure=false"]),
            instance("d", &["::bad::"]),
        ];
        let json = encode_batch(&instances).unwrap();
        let decoded: Vec<ServiceInstance> = serde_json::from_str(&json).unwrap();
        let ids: Vec<_> = decoded.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
        assert_eq!(resolve_addresses(instances, true).len(), 1);
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("discovery:///helloworld").unwrap(), "helloworld");
        assert!(parse_target("dns:///helloworld").is_err());
        assert!(parse_target("discovery:///").is_err());
        assert!(parse_target("helloworld").is_err());
    }

    async fn wait_for_updates(conn: &RecordingConn, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while conn.updates().len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("resolver did not publish in time");
    }

    #[tokio::test]
    async fn test_empty_batch_is_discarded() {
        let watcher = ScriptedWatcher::new(vec![
            Ok(vec![instance("a", &["grpc://10.0.0.1:9000?isSecure=false"])]),
            Ok(vec![]),
            Ok(vec![instance("b", &["grpc://10.0.0.2:9000?isSecure=false"])]),
        ]);
        let conn = Arc::new(RecordingConn::default());
        let resolver = DiscoveryResolver::spawn(watcher.clone(), conn.clone(), true, true);

        wait_for_updates(&conn, 2).await;
        assert_eq!(
            conn.updates(),
            vec![vec!["10.0.0.1:9000".to_string()], vec!["10.0.0.2:9000".to_string()]]
        );

        resolver.close().await;
        assert!(watcher.stop_called.load(Ordering::SeqCst));
        assert!(resolver.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_retried() {
        let watcher = ScriptedWatcher::new(vec![
            Err(RegistryError::Backend("connection refused".to_string())),
            Ok(vec![instance("a", &["grpc://10.0.0.1:9000?isSecure=false"])]),
        ]);
        let conn = Arc::new(RecordingConn::default());
        let resolver = DiscoveryResolver::spawn(watcher, conn.clone(), true, false);

        wait_for_updates(&conn, 1).await;
        assert_eq!(conn.updates(), vec![vec!["10.0.0.1:9000".to_string()]]);
        resolver.close().await;
    }

    #[tokio::test]
    async fn test_cancelled_watch_ends_loop() {
        let watcher = ScriptedWatcher::new(vec![Err(RegistryError::Cancelled)]);
        let conn = Arc::new(RecordingConn::default());
        let resolver = DiscoveryResolver::spawn(watcher, conn.clone(), true, false);

        let task = resolver.task.lock().await.take().unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should exit on cancellation")
            .unwrap();
        assert!(conn.updates().is_empty());
        resolver.resolve_now();
    }

    #[tokio::test]
    async fn test_builder_watches_memory_registry() {
        use crate::services::registry::{MemoryRegistry, Registrar};

        let registry = MemoryRegistry::new();
        registry
            .register(&instance("a", &["grpc://10.0.0.1:9000?isSecure=false"]))
            .await
            .unwrap();

        let conn = Arc::new(RecordingConn::default());
        let builder = DiscoveryBuilder::new(Arc::new(registry.clone())).insecure(true);
        let resolver = builder
            .build("discovery:///helloworld", conn.clone())
            .await
            .unwrap();

        wait_for_updates(&conn, 1).await;
        registry
            .register(&instance("b", &["grpc://10.0.0.2:9000?isSecure=false"]))
            .await
            .unwrap();
        wait_for_updates(&conn, 2).await;
        assert_eq!(
            conn.updates()[1],
            vec!["10.0.0.1:9000".to_string(), "10.0.0.2:9000".to_string()]
        );

        resolver.close().await;
    }
}
