use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use http::HeaderValue;
use tonic::Status;
use tower::util::ServiceExt;
use tower::{Layer, Service};

use super::{HttpMiddleware, Matcher, chain, handler_fn};
use crate::BoxError;

/// 在 tower 服务栈中应用中间件链
///
/// 每个请求以 URI 路径（`/package.Service/Method`）作为完整方法名去匹配中间件，
/// 中间件返回的 [`Status`] 错误会被编码成 gRPC 响应头。
pub struct MiddlewareLayer<B, ResB> {
    matcher: Arc<Matcher<HttpMiddleware<B, ResB>>>,
}

impl<B, ResB> MiddlewareLayer<B, ResB> {
    pub fn new(matcher: Matcher<HttpMiddleware<B, ResB>>) -> Self {
        Self {
            matcher: Arc::new(matcher),
        }
    }

    /// 对所有方法生效的中间件列表（客户端使用）
    pub fn global(middlewares: Vec<HttpMiddleware<B, ResB>>) -> Self {
        let mut matcher = Matcher::new();
        matcher.use_global(middlewares);
        Self::new(matcher)
    }
}

impl<B, ResB> Clone for MiddlewareLayer<B, ResB> {
    fn clone(&self) -> Self {
        Self {
            matcher: self.matcher.clone(),
        }
    }
}

impl<S, B, ResB> Layer<S> for MiddlewareLayer<B, ResB> {
    type Service = MiddlewareService<S, B, ResB>;

    fn layer(&self, inner: S) -> Self::Service {
        MiddlewareService {
            inner,
            matcher: self.matcher.clone(),
        }
    }
}

/// [`MiddlewareLayer`] 生成的服务
pub struct MiddlewareService<S, B, ResB> {
    inner: S,
    matcher: Arc<Matcher<HttpMiddleware<B, ResB>>>,
}

impl<S: Clone, B, ResB> Clone for MiddlewareService<S, B, ResB> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            matcher: self.matcher.clone(),
        }
    }
}

impl<S, B, ResB> Service<http::Request<B>> for MiddlewareService<S, B, ResB>
where
    S: Service<http::Request<B>, Response = http::Response<ResB>> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError> + Send,
    S::Future: Send + 'static,
    B: Send + 'static,
    ResB: Default + Send + 'static,
{
    type Response = http::Response<ResB>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let middlewares = self.matcher.matches(req.uri().path());
        if middlewares.is_empty() {
            return Box::pin(self.inner.call(req));
        }

        // 取出已就绪的服务，留下一个克隆体
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        let terminal = handler_fn(move |req: http::Request<B>| {
            let svc = inner.clone();
            async move {
                svc.oneshot(req)
                    .await
                    .map_err(|err| Status::from_error(err.into()))
            }
        });
        let handler = chain(middlewares)(terminal);

        Box::pin(async move {
            match handler(req).await {
                Ok(response) => Ok(response),
                Err(status) => Ok(status_response(&status)),
            }
        })
    }
}

// gRPC 的 HTTP 状态码总是 200，错误放在 grpc-status/grpc-message 头中
fn status_response<ResB: Default>(status: &Status) -> http::Response<ResB> {
    let mut response = http::Response::new(ResB::default());
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    if let Err(err) = status.add_header(response.headers_mut()) {
        tracing::error!(error = %err, "Failed to encode gRPC status into response headers");
    }
    response
}
