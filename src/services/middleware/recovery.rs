use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tonic::Status;

use super::{Handler, Middleware, handler_fn};

/// 未知请求错误的默认描述
pub const UNKNOWN_REQUEST: &str = "unknown request error";

/// 将 panic 信息转换为结构化错误
pub type RecoveryHandler = Arc<dyn Fn(&str) -> Status + Send + Sync>;

/// 捕获内层处理器 panic 的中间件，默认返回 `Unknown`
pub fn recovery<Req, Res>() -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    recovery_with(Arc::new(|_panic: &str| Status::unknown(UNKNOWN_REQUEST)))
}

/// 使用自定义处理函数的 recovery 中间件
pub fn recovery_with<Req, Res>(on_panic: RecoveryHandler) -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    Arc::new(move |next: Handler<Req, Res>| {
        let on_panic = on_panic.clone();
        handler_fn(move |req: Req| {
            let next = next.clone();
            let on_panic = on_panic.clone();
            async move {
                // 同步调用与 future 执行期间的 panic 都在这里被捕获
                let guarded = AssertUnwindSafe(async move { next(req).await });
                match guarded.catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        let backtrace = Backtrace::force_capture();
                        tracing::error!(
                            panic = %message,
                            backtrace = %backtrace,
                            "Recovered from panic in request handler"
                        );
                        Err(on_panic(&message))
                    }
                }
            }
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
