use std::sync::Arc;
use std::time::Instant;

use tonic::Status;

use super::{Handler, HttpMiddleware, handler_fn};

/// 记录每次调用的方法、耗时与 gRPC 状态码
pub fn logging<B, ResB>() -> HttpMiddleware<B, ResB>
where
    B: Send + 'static,
    ResB: Send + 'static,
{
    Arc::new(
        move |next: Handler<http::Request<B>, http::Response<ResB>>| {
            handler_fn(move |req: http::Request<B>| {
                let next = next.clone();
                async move {
                    let operation = req.uri().path().to_string();
                    let started = Instant::now();
                    let result = next(req).await;
                    let latency_ms = started.elapsed().as_millis();

                    match &result {
                        Ok(response) => {
                            // trailers-only 响应的状态码在头部中
                            let code = Status::from_header_map(response.headers())
                                .map(|status| status.code())
                                .unwrap_or(tonic::Code::Ok);
                            tracing::info!(
                                operation = %operation,
                                code = ?code,
                                latency_ms = %latency_ms,
                                "Handled gRPC call"
                            );
                        }
                        Err(status) => {
                            tracing::warn!(
                                operation = %operation,
                                code = ?status.code(),
                                message = %status.message(),
                                latency_ms = %latency_ms,
                                "gRPC call failed"
                            );
                        }
                    }

                    result
                }
            })
        },
    )
}
