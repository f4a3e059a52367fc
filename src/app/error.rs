use std::fmt;
use std::time::Duration;

use tokio::task::JoinError;

use super::AppState;
use crate::BoxError;
use crate::services::registry::RegistryError;
use crate::services::transport::ServerError;

/// 生命周期钩子的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    BeforeStart,
    AfterStart,
    BeforeStop,
    AfterStop,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            HookPhase::BeforeStart => "before_start",
            HookPhase::AfterStart => "after_start",
            HookPhase::BeforeStop => "before_stop",
            HookPhase::AfterStop => "after_stop",
        };
        f.write_str(phase)
    }
}

/// 应用生命周期错误
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{phase} hook failed: {source}")]
    Hook {
        phase: HookPhase,
        #[source]
        source: BoxError,
    },
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("server error: {0}")]
    Server(#[from] ServerError),
    #[error("server stop timed out after {0:?}")]
    StopTimeout(Duration),
    #[error("failed to listen for shutdown signals: {0}")]
    Signal(#[source] std::io::Error),
    #[error("task failed: {0}")]
    Task(#[from] JoinError),
    #[error("invalid state: expected {expected}, found {actual}")]
    InvalidState { expected: AppState, actual: AppState },
    #[error("cancelled")]
    Cancelled,
    #[error("invalid options: {0}")]
    Config(String),
}

impl AppError {
    /// 纯取消不视为失败
    pub fn is_cancelled(&self) -> bool {
        match self {
            AppError::Cancelled => true,
            AppError::Task(err) => err.is_cancelled(),
            _ => false,
        }
    }
}
