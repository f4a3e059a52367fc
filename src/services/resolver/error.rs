use crate::services::registry::RegistryError;

/// 解析器错误类型
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("invalid discovery target: {0}")]
    InvalidTarget(String),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("timed out opening discovery watch")]
    Timeout,
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("connection closed")]
    ConnectionClosed,
}
