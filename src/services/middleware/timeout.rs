use std::sync::Arc;
use std::time::Duration;

use tonic::Status;

use super::{Handler, Middleware, handler_fn};

/// 为内层调用设置超时，超时返回 `DeadlineExceeded`
///
/// `Duration::ZERO` 表示不限制。
pub fn timeout<Req, Res>(duration: Duration) -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    Arc::new(move |next: Handler<Req, Res>| {
        if duration.is_zero() {
            return next;
        }
        handler_fn(move |req: Req| {
            let next = next.clone();
            async move {
                match tokio::time::timeout(duration, next(req)).await {
                    Ok(result) => result,
                    Err(_) => Err(Status::deadline_exceeded(format!(
                        "call timed out after {duration:?}"
                    ))),
                }
            }
        })
    })
}
