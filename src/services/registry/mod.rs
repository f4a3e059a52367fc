//! Registry module
//!
//! 服务注册与发现：
//! - `types`: 服务实例与注册/发现契约
//! - `error`: 错误类型
//! - `service`: 进程内注册中心实现

pub mod error;
pub mod service;
pub mod types;

pub use error::RegistryError;
pub use service::{MemoryRegistry, MemoryWatcher};
pub use types::{Discovery, NoopRegistry, Registrar, ServiceInstance, Watcher};
