//! gRPC 传输层
//!
//! - `server`: 基于 tonic 的服务端，实现 [`Server`]
//! - `client`: 直连或基于服务发现的客户端通道
//! - `host`: 对外公布地址的计算

pub mod client;
pub mod error;
pub mod host;
pub mod server;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use client::{ClientChannel, ClientMiddleware, GrpcClient, GrpcClientBuilder};
pub use error::{ClientError, ServerError};
pub use server::{GrpcServer, GrpcServerBuilder, ServerMiddleware};

/// 由应用生命周期管理的服务端
#[async_trait]
pub trait Server: Send + Sync {
    /// 开始服务，直到 `token` 被取消或 [`Server::stop`] 被调用后才返回
    async fn start(&self, token: CancellationToken) -> Result<(), ServerError>;

    /// 优雅停止，调用方负责限定等待时间
    async fn stop(&self) -> Result<(), ServerError>;

    /// 对外公布的端点，可能触发监听绑定
    async fn endpoint(&self) -> Result<Url, ServerError>;
}
