//! 基于服务发现的客户端地址解析
//!
//! 解析器订阅注册中心的实例变更，将每批实例转换为去重后的地址集合，
//! 整体替换地发布给连接层（[`ClientConn`]），由连接层负责负载均衡。

pub mod balancer;
pub mod discovery;
pub mod endpoint;
pub mod error;

use std::collections::HashMap;
use std::sync::Arc;

use crate::services::registry::ServiceInstance;

pub use balancer::{BalancedChannel, ClientConn};
pub use discovery::{DiscoveryBuilder, DiscoveryResolver};
pub use error::ResolverError;

/// 负载均衡策略可见的附加属性
#[derive(Debug, Clone)]
pub struct Attributes {
    /// 实例元数据的副本
    pub metadata: HashMap<String, String>,
    /// 原始实例
    pub instance: Arc<ServiceInstance>,
}

/// 解析结果中的单个地址
#[derive(Debug, Clone)]
pub struct ResolvedAddress {
    /// 路由名，取自实例的服务名
    pub server_name: String,
    /// 去重键：与连接安全要求匹配的 `host:port`
    pub endpoint: String,
    pub attributes: Attributes,
}
