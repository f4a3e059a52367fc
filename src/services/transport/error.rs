use crate::BoxError;
use crate::services::resolver::ResolverError;

/// 服务端错误类型
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("invalid listen address: {0}")]
    InvalidAddress(String),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("server already started")]
    AlreadyStarted,
    #[error("transport error: {0}")]
    Serve(#[from] tonic::transport::Error),
    #[error("server error: {0}")]
    Other(BoxError),
}

/// 客户端错误类型
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("missing endpoint")]
    MissingEndpoint,
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("discovery target {0} requires a discovery source")]
    MissingDiscovery(String),
    #[error("resolver error: {0}")]
    Resolver(#[from] ResolverError),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}
