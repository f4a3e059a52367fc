pub mod app;
pub mod config;
pub mod server;
pub mod services;
pub mod telemetry;

/// 钩子与中间件使用的通用错误类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
