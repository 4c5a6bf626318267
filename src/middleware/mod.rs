//! Middleware pipeline: composable logic wrapped around route handlers.
//!
//! - [`Middleware`] is implemented by every layer.
//! - [`Next`] is the cursor into the rest of the chain.
//! - [`from_middleware`] type-erases a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`LoggerMiddleware`] emits one structured record per request.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;

use crate::{Response, StatusCode, context::Context};

/// Boxed future returned by middleware and handlers.
pub type BoxResponse = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> BoxResponse + Send + Sync + 'static>;

/// The cursor into the remaining middleware chain for one request.
///
/// `Next` is consumed by [`run`](Self::run), so each layer can forward a
/// request at most once.
///
/// # Examples
///
/// ```rust,no_run
/// use trendmap::context::Context;
/// use trendmap::middleware::{BoxResponse, Middleware, Next};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(&self, ctx: Context, next: Next) -> BoxResponse {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    chain: Arc<[MiddlewareHandler]>,
    index: usize,
}

impl Next {
    /// Positions a cursor at the start of `chain`.
    pub fn new(chain: Arc<[MiddlewareHandler]>) -> Self {
        Self { chain, index: 0 }
    }

    /// Invokes the next layer.
    ///
    /// Falls back to a `500` when the chain runs out without producing a
    /// response; a router always terminates its chain with the route handler.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.chain.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::text(
                StatusCode::InternalServerError,
                "No response generated by middleware pipeline",
            ),
        }
    }
}

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A layer around the route handlers.
///
/// A layer may pass the request through, answer it directly without calling
/// `next`, or decorate the downstream response.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponse;
}

/// Logs method, path, status and latency once the response is ready.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponse {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            let status = response.status().as_u16();
            let elapsed_ms = start.elapsed().as_millis() as u64;
            if status >= 500 {
                tracing::warn!(%method, %path, status, elapsed_ms, "request failed");
            } else {
                tracing::info!(%method, %path, status, elapsed_ms, "request served");
            }

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;

    fn ctx() -> Context {
        let (req, _) = Request::parse(b"GET /trends HTTP/1.1\r\n\r\n").unwrap();
        Context::new(req)
    }

    struct Stamp(&'static str);

    impl Middleware for Stamp {
        fn handle(&self, ctx: Context, next: Next) -> BoxResponse {
            let tag = self.0;
            Box::pin(async move {
                let mut response = next.run(ctx).await;
                response.add_header("X-Layer", tag);
                response
            })
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn handle(&self, _ctx: Context, _next: Next) -> BoxResponse {
            Box::pin(async { Response::text(StatusCode::Unauthorized, "Unauthorized") })
        }
    }

    fn terminal() -> MiddlewareHandler {
        Arc::new(|_ctx: Context, _next: Next| -> BoxResponse {
            Box::pin(async { Response::text(StatusCode::Ok, "done") })
        })
    }

    #[tokio::test]
    async fn exhausted_chain_is_a_500() {
        let chain: Arc<[MiddlewareHandler]> = Arc::from(Vec::new());
        let response = Next::new(chain).run(ctx()).await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn layers_wrap_in_order() {
        let chain: Arc<[MiddlewareHandler]> = Arc::from(vec![
            from_middleware(Arc::new(Stamp("outer"))),
            from_middleware(Arc::new(Stamp("inner"))),
            terminal(),
        ]);
        let response = Next::new(chain).run(ctx()).await;
        assert_eq!(response.status(), StatusCode::Ok);
        let layers: Vec<_> = response
            .headers()
            .iter()
            .filter(|(k, _)| *k == "X-Layer")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(layers, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_the_handler() {
        let chain: Arc<[MiddlewareHandler]> = Arc::from(vec![
            from_middleware(Arc::new(LoggerMiddleware)),
            from_middleware(Arc::new(Deny)),
            terminal(),
        ]);
        let response = Next::new(chain).run(ctx()).await;
        assert_eq!(response.status(), StatusCode::Unauthorized);
    }
}
