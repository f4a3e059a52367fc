use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tonic::transport::{Channel, Endpoint};
use tonic::transport::channel::Change;

use super::ResolvedAddress;
use super::error::ResolverError;

/// 接收解析结果的连接层
#[async_trait]
pub trait ClientConn: Send + Sync {
    /// 用完整的地址集合替换当前集合
    async fn update_state(&self, addresses: Vec<ResolvedAddress>) -> Result<(), ResolverError>;
}

/// 默认的变更队列容量
const DEFAULT_CAPACITY: usize = 64;

/// 基于 tonic 负载均衡通道的 [`ClientConn`]
///
/// 每次收到完整的地址集合时，与上一次的集合做差，
/// 以 [`Change::Insert`] / [`Change::Remove`] 事件更新通道中的端点。
pub struct BalancedChannel {
    channel: Channel,
    changes: mpsc::Sender<Change<String, Endpoint>>,
    current: Mutex<HashSet<String>>,
    connect_timeout: Option<Duration>,
    secure: bool,
}

impl BalancedChannel {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (channel, changes) = Channel::balance_channel::<String>(capacity);
        Self {
            channel,
            changes,
            current: Mutex::new(HashSet::new()),
            connect_timeout: None,
            secure: false,
        }
    }

    /// 新端点的连接超时
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// 使用 `https` 连接端点
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// 负载均衡的通道，可直接用于生成的客户端
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// 当前生效的地址
    pub async fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self.current.lock().await.iter().cloned().collect();
        endpoints.sort();
        endpoints
    }

    fn endpoint(&self, address: &str) -> Result<Endpoint, ResolverError> {
        let scheme = if self.secure { "https" } else { "http" };
        let endpoint = Endpoint::from_shared(format!("{scheme}://{address}")).map_err(|err| {
            ResolverError::InvalidEndpoint {
                endpoint: address.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(match self.connect_timeout {
            Some(timeout) => endpoint.connect_timeout(timeout),
            None => endpoint,
        })
    }
}

impl Default for BalancedChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientConn for BalancedChannel {
    async fn update_state(&self, addresses: Vec<ResolvedAddress>) -> Result<(), ResolverError> {
        let mut current = self.current.lock().await;
        let next: HashSet<String> = addresses.into_iter().map(|a| a.endpoint).collect();

        // 先校验新增的端点，失败时不改动通道
        let inserts = next
            .difference(&current)
            .map(|address| Ok((address.clone(), self.endpoint(address)?)))
            .collect::<Result<Vec<_>, ResolverError>>()?;

        for removed in current.difference(&next) {
            self.changes
                .send(Change::Remove(removed.clone()))
                .await
                .map_err(|_| ResolverError::ConnectionClosed)?;
            tracing::debug!(endpoint = %removed, "Removed endpoint from balanced channel");
        }

        for (added, endpoint) in inserts {
            tracing::debug!(endpoint = %added, "Inserting endpoint into balanced channel");
            self.changes
                .send(Change::Insert(added, endpoint))
                .await
                .map_err(|_| ResolverError::ConnectionClosed)?;
        }

        *current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry::ServiceInstance;
    use crate::services::resolver::Attributes;
    use std::sync::Arc;

    fn address(endpoint: &str) -> ResolvedAddress {
        let instance = Arc::new(ServiceInstance {
            id: endpoint.to_string(),
            name: "helloworld".to_string(),
            ..Default::default()
        });
        ResolvedAddress {
            server_name: instance.name.clone(),
            endpoint: endpoint.to_string(),
            attributes: Attributes {
                metadata: instance.metadata.clone(),
                instance,
            },
        }
    }

    #[tokio::test]
    async fn test_update_state_replaces_set() {
        let balanced = BalancedChannel::new().connect_timeout(Duration::from_millis(100));

        balanced
            .update_state(vec![address("127.0.0.1:9001"), address("127.0.0.1:9002")])
            .await
            .unwrap();
        assert_eq!(
            balanced.endpoints().await,
            vec!["127.0.0.1:9001".to_string(), "127.0.0.1:9002".to_string()]
        );

        balanced
            .update_state(vec![address("127.0.0.1:9002"), address("127.0.0.1:9003")])
            .await
            .unwrap();
        assert_eq!(
            balanced.endpoints().await,
            vec!["127.0.0.1:9002".to_string(), "127.0.0.1:9003".to_string()]
        );
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let balanced = BalancedChannel::new();
        let err = balanced
            .update_state(vec![address("bad address")])
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::InvalidEndpoint { .. }));
        assert!(balanced.endpoints().await.is_empty());
    }
}
