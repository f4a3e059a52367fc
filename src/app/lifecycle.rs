use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Barrier, Mutex, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::error::{AppError, HookPhase};
use super::options::{AppOptions, Hook, ShutdownTrigger};
use super::{AppContext, AppState, signals};
use crate::services::registry::{RegistryError, ServiceInstance};
use crate::services::transport::Server;

/// 应用生命周期管理器，克隆后共享同一状态
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    opts: AppOptions,
    token: CancellationToken,
    instance: StdMutex<Option<Arc<ServiceInstance>>>,
    state: watch::Sender<AppState>,
    // 保证最多注销一次
    deregistered: Mutex<bool>,
}

impl App {
    pub fn new(opts: AppOptions) -> Self {
        let token = match &opts.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        Self {
            inner: Arc::new(AppInner {
                opts,
                token,
                instance: StdMutex::new(None),
                state: watch::channel(AppState::Idle).0,
                deregistered: Mutex::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.opts.id
    }

    pub fn name(&self) -> &str {
        &self.inner.opts.name
    }

    pub fn version(&self) -> &str {
        &self.inner.opts.version
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.inner.opts.metadata
    }

    /// 已构建实例的端点，`run` 之前为空
    pub fn endpoints(&self) -> Vec<String> {
        self.instance()
            .map(|instance| instance.endpoints.clone())
            .unwrap_or_default()
    }

    pub fn instance(&self) -> Option<Arc<ServiceInstance>> {
        self.inner
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> AppState {
        *self.inner.state.borrow()
    }

    /// 订阅状态变化
    pub fn watch_state(&self) -> watch::Receiver<AppState> {
        self.inner.state.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    fn context(&self) -> AppContext {
        let opts = &self.inner.opts;
        AppContext {
            id: opts.id.clone(),
            name: opts.name.clone(),
            version: opts.version.clone(),
            metadata: opts.metadata.clone(),
            endpoints: self.endpoints(),
            token: self.inner.token.clone(),
        }
    }

    fn set_state(&self, state: AppState) {
        self.inner.state.send_replace(state);
    }

    /// 启动应用并阻塞到所有服务端退出
    pub async fn run(&self) -> Result<(), AppError> {
        let mut accepted = false;
        self.inner.state.send_if_modified(|state| {
            if *state == AppState::Idle {
                *state = AppState::Starting;
                accepted = true;
            }
            accepted
        });
        if !accepted {
            return Err(AppError::InvalidState {
                expected: AppState::Idle,
                actual: self.state(),
            });
        }

        let result = self.run_inner().await;
        self.set_state(AppState::Stopped);

        match &result {
            Ok(()) => tracing::info!(id = %self.id(), name = %self.name(), "Application stopped"),
            Err(err) => tracing::error!(
                id = %self.id(),
                name = %self.name(),
                error = %err,
                "Application exited with error"
            ),
        }
        result
    }

    async fn run_inner(&self) -> Result<(), AppError> {
        let opts = &self.inner.opts;

        let instance = Arc::new(self.build_instance().await);
        *self
            .inner
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(instance.clone());

        self.run_hooks(HookPhase::BeforeStart, &opts.before_start).await?;

        // 任务组：任一任务出错时取消整个组
        let group = self.inner.token.child_token();
        let mut tasks: JoinSet<Result<(), AppError>> = JoinSet::new();
        let barrier = Arc::new(Barrier::new(opts.servers.len() + 1));

        for server in &opts.servers {
            tasks.spawn(stop_when_cancelled(
                server.clone(),
                group.clone(),
                opts.stop_timeout,
            ));

            let server = server.clone();
            let barrier = barrier.clone();
            let token = group.clone();
            tasks.spawn(async move {
                barrier.wait().await;
                server.start(token).await.map_err(AppError::from)
            });
        }
        barrier.wait().await;

        // 注册失败直接返回，丢弃任务组会中止已启动的任务
        if let Some(registrar) = &opts.registrar {
            // 与 stop 共用同一把锁，启动期间已被停止时不再注册
            let deregistered = self.inner.deregistered.lock().await;
            if *deregistered || group.is_cancelled() {
                tracing::info!(id = %instance.id, "Application stopped before registration");
                return Err(AppError::Cancelled);
            }
            let registered = tokio::select! {
                _ = group.cancelled() => return Err(AppError::Cancelled),
                result = tokio::time::timeout(opts.registry_timeout, registrar.register(&instance)) => result,
            };
            match registered {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(RegistryError::Timeout(opts.registry_timeout).into()),
            }
            drop(deregistered);
        }

        self.set_state(AppState::Running);
        tracing::info!(
            id = %instance.id,
            name = %instance.name,
            version = %instance.version,
            endpoints = ?instance.endpoints,
            servers = opts.servers.len(),
            "Application started"
        );

        self.run_hooks(HookPhase::AfterStart, &opts.after_start).await?;

        tasks.spawn(wait_for_termination(
            self.clone(),
            opts.shutdown.clone(),
            group.clone(),
        ));

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(AppError::from).and_then(|result| result);
            let Err(err) = result else {
                continue;
            };
            if err.is_cancelled() {
                continue;
            }
            if first_error.is_none() {
                group.cancel();
                first_error = Some(err);
            } else {
                tracing::warn!(error = %err, "Additional task failure during shutdown");
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        self.run_hooks(HookPhase::AfterStop, &opts.after_stop).await
    }

    // 显式端点优先，否则按服务端顺序收集
    async fn build_instance(&self) -> ServiceInstance {
        let opts = &self.inner.opts;

        let endpoints = if !opts.endpoints.is_empty() {
            opts.endpoints.clone()
        } else {
            let mut endpoints = Vec::with_capacity(opts.servers.len());
            for server in &opts.servers {
                match server.endpoint().await {
                    Ok(endpoint) => endpoints.push(endpoint.to_string()),
                    Err(err) => {
                        tracing::error!(error = %err, "Failed to get server endpoint");
                    }
                }
            }
            endpoints
        };

        ServiceInstance {
            id: opts.id.clone(),
            name: opts.name.clone(),
            version: opts.version.clone(),
            metadata: opts.metadata.clone(),
            endpoints,
        }
    }

    async fn run_hooks(&self, phase: HookPhase, hooks: &[Hook]) -> Result<(), AppError> {
        for hook in hooks {
            hook(self.context())
                .await
                .map_err(|source| AppError::Hook { phase, source })?;
        }
        Ok(())
    }

    /// 注销实例并取消应用令牌
    ///
    /// 所有 `before_stop` 钩子都会执行，只保留最后一个错误。
    /// 注销失败时直接返回，令牌不会被取消。
    pub async fn stop(&self) -> Result<(), AppError> {
        let opts = &self.inner.opts;

        let mut hook_error = None;
        for hook in &opts.before_stop {
            if let Err(source) = hook(self.context()).await {
                tracing::warn!(error = %source, "before_stop hook failed");
                hook_error = Some(AppError::Hook {
                    phase: HookPhase::BeforeStop,
                    source,
                });
            }
        }

        let instance = self.instance();
        if let (Some(registrar), Some(instance)) = (&opts.registrar, instance) {
            let mut deregistered = self.inner.deregistered.lock().await;
            if !*deregistered {
                let result =
                    tokio::time::timeout(opts.registry_timeout, registrar.deregister(&instance))
                        .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err.into()),
                    Err(_) => return Err(RegistryError::Timeout(opts.registry_timeout).into()),
                }
                *deregistered = true;
            }
        }

        self.inner.state.send_if_modified(|state| {
            if matches!(*state, AppState::Starting | AppState::Running) {
                *state = AppState::Stopping;
                return true;
            }
            false
        });
        self.inner.token.cancel();

        match hook_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn stop_when_cancelled(
    server: Arc<dyn Server>,
    group: CancellationToken,
    stop_timeout: Duration,
) -> Result<(), AppError> {
    group.cancelled().await;
    match tokio::time::timeout(stop_timeout, server.stop()).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(AppError::StopTimeout(stop_timeout)),
    }
}

async fn wait_for_termination(
    app: App,
    trigger: ShutdownTrigger,
    group: CancellationToken,
) -> Result<(), AppError> {
    match trigger {
        ShutdownTrigger::Disabled => {
            group.cancelled().await;
            Err(AppError::Cancelled)
        }
        ShutdownTrigger::Token(token) => {
            tokio::select! {
                _ = group.cancelled() => Err(AppError::Cancelled),
                _ = token.cancelled() => app.stop().await,
            }
        }
        ShutdownTrigger::Signals(list) => {
            tokio::select! {
                _ = group.cancelled() => Err(AppError::Cancelled),
                received = signals::wait_for(&list) => {
                    received.map_err(AppError::Signal)?;
                    app.stop().await
                }
            }
        }
    }
}
