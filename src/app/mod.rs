//! 应用生命周期
//!
//! [`App`] 负责：
//! - 构建并注册服务实例
//! - 并发启动所有服务端，并在退出时逐个停止
//! - 监听退出信号，注销实例后取消所有任务
//! - 在各阶段执行钩子

pub mod error;
pub mod lifecycle;
pub mod options;
pub mod signals;

use std::collections::HashMap;
use std::fmt;

use tokio_util::sync::CancellationToken;

pub use error::{AppError, HookPhase};
pub use lifecycle::App;
pub use options::{AppOptions, AppOptionsBuilder, Hook, ShutdownTrigger};
pub use signals::Signal;

/// 应用所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            AppState::Idle => "idle",
            AppState::Starting => "starting",
            AppState::Running => "running",
            AppState::Stopping => "stopping",
            AppState::Stopped => "stopped",
        };
        f.write_str(state)
    }
}

/// 传给钩子的应用快照
#[derive(Debug, Clone)]
pub struct AppContext {
    pub id: String,
    pub name: String,
    pub version: String,
    pub metadata: HashMap<String, String>,
    /// 已构建实例的端点，`run` 之前为空
    pub endpoints: Vec<String>,
    /// 应用的取消令牌
    pub token: CancellationToken,
}
