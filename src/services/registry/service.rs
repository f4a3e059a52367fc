use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use super::error::RegistryError;
use super::types::{
    Discovery, Registrar, ServiceInstance, ServiceTable, WatchChannels, Watcher,
};

/// 进程内注册中心
///
/// 按服务名分组保存实例，并通过 `watch` 通道向订阅者推送完整的实例快照。
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    services: ServiceTable,
    channels: WatchChannels,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有已注册的服务名
    pub fn list_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// 指定服务当前的实例数量
    pub fn instance_count(&self, service_name: &str) -> usize {
        self.services
            .get(service_name)
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }

    // 实例快照按ID排序，保证订阅者看到稳定的顺序
    fn snapshot(&self, service_name: &str) -> Vec<ServiceInstance> {
        let Some(instances) = self.services.get(service_name).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let mut list: Vec<ServiceInstance> = instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    fn sender(&self, service_name: &str) -> watch::Sender<Vec<ServiceInstance>> {
        self.channels
            .entry(service_name.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0)
            .clone()
    }

    fn publish(&self, service_name: &str) {
        let snapshot = self.snapshot(service_name);
        let count = snapshot.len();
        self.sender(service_name).send_replace(snapshot);
        tracing::debug!(
            service_name = %service_name,
            instance_count = count,
            "Published service snapshot to watchers"
        );
    }
}

#[async_trait]
impl Registrar for MemoryRegistry {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), RegistryError> {
        if instance.id.is_empty() {
            return Err(RegistryError::MissingId);
        }

        // 持有外层条目锁写入，避免与注销时的空表清理交错
        self.services
            .entry(instance.name.clone())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .insert(instance.id.clone(), instance.clone());

        tracing::info!(
            service_name = %instance.name,
            instance_id = %instance.id,
            endpoints = ?instance.endpoints,
            "Registering service instance"
        );

        self.publish(&instance.name);
        Ok(())
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<(), RegistryError> {
        let removed = match self.services.get(&instance.name) {
            Some(entry) => {
                let instances = entry.value().clone();
                drop(entry);
                instances.remove(&instance.id).is_some()
            }
            None => false,
        };

        if !removed {
            return Err(RegistryError::NotFound(instance.id.clone()));
        }

        self.services
            .remove_if(&instance.name, |_, instances| instances.is_empty());

        tracing::info!(
            service_name = %instance.name,
            instance_id = %instance.id,
            "Deregistered service instance"
        );

        self.publish(&instance.name);
        Ok(())
    }
}

#[async_trait]
impl Discovery for MemoryRegistry {
    async fn get_service(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        Ok(self.snapshot(service_name))
    }

    async fn watch(&self, service_name: &str) -> Result<Arc<dyn Watcher>, RegistryError> {
        let receiver = self.sender(service_name).subscribe();
        tracing::debug!(service_name = %service_name, "New watcher created");
        Ok(Arc::new(MemoryWatcher {
            receiver: Mutex::new(receiver),
            first: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        }))
    }
}

/// [`MemoryRegistry`] 的订阅句柄
#[derive(Debug)]
pub struct MemoryWatcher {
    receiver: Mutex<watch::Receiver<Vec<ServiceInstance>>>,
    first: AtomicBool,
    cancel: CancellationToken,
}

#[async_trait]
impl Watcher for MemoryWatcher {
    async fn next(&self) -> Result<Vec<ServiceInstance>, RegistryError> {
        if self.cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        let mut receiver = self.receiver.lock().await;

        // 首次调用：已有实例则立即返回
        if self.first.swap(false, Ordering::SeqCst) {
            let current = receiver.borrow_and_update().clone();
            if !current.is_empty() {
                return Ok(current);
            }
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(RegistryError::Cancelled),
            changed = receiver.changed() => match changed {
                Ok(()) => Ok(receiver.borrow_and_update().clone()),
                Err(_) => Err(RegistryError::Cancelled),
            },
        }
    }

    async fn stop(&self) -> Result<(), RegistryError> {
        self.cancel.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn instance(id: &str, endpoint: &str) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            name: "helloworld".to_string(),
            version: "v1".to_string(),
            endpoints: vec![endpoint.to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn register_rejects_missing_identifier() {
        let registry = MemoryRegistry::new();
        let err = registry
            .register(&ServiceInstance::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingId));
        assert_eq!(err.to_string(), "missing identifier");
    }

    #[tokio::test]
    async fn deregister_unknown_instance_fails() {
        let registry = MemoryRegistry::new();
        let err = registry
            .deregister(&instance("1", "grpc://127.0.0.1:9000"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(id) if id == "1"));
    }

    #[tokio::test]
    async fn register_and_deregister_updates_services() {
        let registry = MemoryRegistry::new();
        registry.register(&instance("b", "grpc://10.0.0.2:9000")).await.unwrap();
        registry.register(&instance("a", "grpc://10.0.0.1:9000")).await.unwrap();

        let listed = registry.get_service("helloworld").await.unwrap();
        assert_eq!(listed.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(registry.list_services(), vec!["helloworld".to_string()]);

        registry.deregister(&instance("a", "")).await.unwrap();
        registry.deregister(&instance("b", "")).await.unwrap();
        assert_eq!(registry.instance_count("helloworld"), 0);
        assert!(registry.list_services().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_churn_keeps_final_registrations() {
        let registry = MemoryRegistry::new();
        let mut handles = Vec::new();

        for i in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let inst = instance(&format!("node-{i}"), "grpc://10.0.0.1:9000");
                for _ in 0..200 {
                    registry.register(&inst).await.unwrap();
                    registry.deregister(&inst).await.unwrap();
                }
                registry.register(&inst).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.instance_count("helloworld"), 32);
        assert_eq!(registry.get_service("helloworld").await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn register_after_service_emptied() {
        let registry = MemoryRegistry::new();
        let a = instance("a", "grpc://10.0.0.1:9000");
        registry.register(&a).await.unwrap();
        registry.deregister(&a).await.unwrap();
        assert!(registry.list_services().is_empty());

        registry.register(&instance("b", "grpc://10.0.0.2:9000")).await.unwrap();
        assert_eq!(registry.instance_count("helloworld"), 1);
    }

    #[tokio::test]
    async fn watcher_returns_existing_instances_first() {
        let registry = MemoryRegistry::new();
        registry.register(&instance("1", "grpc://10.0.0.1:9000")).await.unwrap();

        let watcher = registry.watch("helloworld").await.unwrap();
        let batch = timeout(Duration::from_secs(1), watcher.next())
            .await
            .expect("first batch should be immediate")
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn watcher_blocks_until_change() {
        let registry = MemoryRegistry::new();
        let watcher = registry.watch("helloworld").await.unwrap();

        // 没有实例时首次调用应阻塞
        assert!(
            timeout(Duration::from_millis(50), watcher.next())
                .await
                .is_err()
        );

        let pending = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.register(&instance("1", "grpc://10.0.0.1:9000")).await.unwrap();

        let batch = timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].id, "1");
    }

    #[tokio::test]
    async fn stopped_watcher_returns_cancelled() {
        let registry = MemoryRegistry::new();
        let watcher = registry.watch("helloworld").await.unwrap();

        let pending = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        watcher.stop().await.unwrap();

        let result = timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert!(watcher.next().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn noop_registry_accepts_everything() {
        let registry = crate::services::registry::NoopRegistry;
        assert!(registry.register(&ServiceInstance::default()).await.is_ok());
        assert!(registry.deregister(&ServiceInstance::default()).await.is_ok());
    }
}
