use std::time::Duration;

/// 注册中心错误类型
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("missing identifier")]
    MissingId,
    #[error("service instance not found: {0}")]
    NotFound(String),
    #[error("registry operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("watch cancelled")]
    Cancelled,
    #[error("registry backend error: {0}")]
    Backend(String),
}

impl RegistryError {
    /// 取消类错误不应被重试
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RegistryError::Cancelled)
    }
}
