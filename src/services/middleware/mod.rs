//! 调用中间件
//!
//! 中间件以函数式方式包装一个 [`Handler`]，服务端与客户端调用路径共用同一套组合逻辑：
//!
//! ```text
//! chain([m1, m2, m3])(h)  ==  m1(m2(m3(h)))
//! ```
//!
//! 列表中的第一个中间件位于最外层：最先执行前置逻辑，最后执行后置逻辑。

pub mod layer;
pub mod logging;
pub mod matcher;
pub mod recovery;
pub mod timeout;

use std::sync::Arc;

use futures::future::BoxFuture;
use tonic::Status;

pub use layer::{MiddlewareLayer, MiddlewareService};
pub use logging::logging;
pub use matcher::Matcher;
pub use recovery::{recovery, recovery_with};
pub use timeout::timeout;

/// 最内层或被包装后的调用处理器
pub type Handler<Req, Res> =
    Arc<dyn Fn(Req) -> BoxFuture<'static, Result<Res, Status>> + Send + Sync>;

/// 包装处理器的中间件
pub type Middleware<Req, Res> = Arc<dyn Fn(Handler<Req, Res>) -> Handler<Req, Res> + Send + Sync>;

/// 传输层使用的 HTTP 请求/响应中间件
pub type HttpMiddleware<B, ResB> = Middleware<http::Request<B>, http::Response<ResB>>;

/// 由闭包构造处理器
pub fn handler_fn<Req, Res, F, Fut>(f: F) -> Handler<Req, Res>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Res, Status>> + Send + 'static,
{
    Arc::new(move |req: Req| -> BoxFuture<'static, Result<Res, Status>> { Box::pin(f(req)) })
}

/// 由闭包构造中间件
pub fn middleware_fn<Req, Res, F>(f: F) -> Middleware<Req, Res>
where
    F: Fn(Handler<Req, Res>) -> Handler<Req, Res> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// 将有序的中间件列表组合为一个中间件
pub fn chain<Req, Res>(middlewares: Vec<Middleware<Req, Res>>) -> Middleware<Req, Res>
where
    Req: 'static,
    Res: 'static,
{
    Arc::new(move |next: Handler<Req, Res>| {
        middlewares
            .iter()
            .rev()
            .fold(next, |handler, middleware| middleware(handler))
    })
}
