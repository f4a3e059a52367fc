use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::error::RegistryError;

/// 注册中心中的一个服务实例
///
/// 端点格式：`grpc://127.0.0.1:9000?isSecure=false`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// 实例唯一ID，进程生命周期内不变
    pub id: String,
    /// 服务名
    pub name: String,
    /// 编译版本
    pub version: String,
    /// 附加的键值元数据
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// 实例的端点地址
    #[serde(default)]
    pub endpoints: Vec<String>,
}

/// 服务注册
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), RegistryError>;
    async fn deregister(&self, instance: &ServiceInstance) -> Result<(), RegistryError>;
}

/// 服务发现
#[async_trait]
pub trait Discovery: Send + Sync {
    /// 获取指定服务的当前实例列表
    async fn get_service(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError>;
    /// 订阅指定服务的实例变更
    async fn watch(&self, service_name: &str) -> Result<Arc<dyn Watcher>, RegistryError>;
}

/// 服务实例变更的订阅
///
/// `next` 在以下两种情况返回：
/// 1. 首次调用且实例列表非空
/// 2. 实例集合发生变化
///
/// 否则一直阻塞，直到 watcher 被停止（返回 [`RegistryError::Cancelled`]）。
#[async_trait]
pub trait Watcher: Send + Sync {
    async fn next(&self) -> Result<Vec<ServiceInstance>, RegistryError>;
    async fn stop(&self) -> Result<(), RegistryError>;
}

/// 空实现，所有操作直接成功
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRegistry;

#[async_trait]
impl Registrar for NoopRegistry {
    async fn register(&self, _instance: &ServiceInstance) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn deregister(&self, _instance: &ServiceInstance) -> Result<(), RegistryError> {
        Ok(())
    }
}

// 服务名 -> (实例ID -> 实例)
pub type ServiceInstances = Arc<DashMap<String, ServiceInstance>>;

pub type ServiceTable = Arc<DashMap<String, ServiceInstances>>;

// 服务名 -> 实例快照广播
pub(crate) type WatchChannels = Arc<DashMap<String, watch::Sender<Vec<ServiceInstance>>>>;
