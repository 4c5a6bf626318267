//! Request routing: map methods and URL patterns to handler functions.
//!
//! | Pattern        | Example match     | Captured params  |
//! |----------------|-------------------|------------------|
//! | `/trends`      | `/trends`         | *(none)*         |
//! | `/trends/:code`| `/trends/CA`      | `code → "CA"`    |
//!
//! Trailing slashes are normalized on both patterns and incoming paths.
//! Routes are matched in registration order and every request, matched or
//! not, passes through the middleware layers in the order they were added.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, Parameters};
use crate::middleware::{BoxResponse, Middleware, MiddlewareHandler, Next, from_middleware};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler.
pub type Handler = Arc<dyn Fn(Context) -> BoxResponse + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Implemented for every `Fn(Context) -> impl Future<Output = Response>`
/// that is `Send + Sync + 'static`.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
}

fn trim_trailing_slash(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    }
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_owned()),
                    None => Segment::Static(s.to_owned()),
                })
                .collect();
            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_owned())
    }

    fn matches(&self, path: &str) -> Option<Parameters> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(Parameters::new),
            Pattern::Parameterized { segments } => {
                let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != parts.len() {
                    return None;
                }

                let mut params = Parameters::new();
                for (segment, part) in segments.iter().zip(parts) {
                    match segment {
                        Segment::Static(s) if s != part => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => params.insert(name.clone(), part.to_owned()),
                    }
                }
                Some(params)
            }
        }
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

enum Resolution {
    Found(Handler, Parameters),
    // The path exists under other methods.
    WrongMethod(Vec<Method>),
    Missing,
}

/// Dispatches requests to registered handlers.
///
/// Unknown paths get `404 Not Found`; known paths requested with an
/// unregistered method get `405 Method Not Allowed` with an `Allow` header.
///
/// # Examples
///
/// ```rust,no_run
/// use trendmap::context::Context;
/// use trendmap::router::Router;
/// use trendmap::{Response, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/health", |_ctx: Context| async { Response::text(StatusCode::Ok, "ok") });
/// router.get("/trends/:code", |ctx: Context| async move {
///     let code = ctx.params().get("code").unwrap_or("").to_owned();
///     Response::text(StatusCode::Ok, code)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    layers: Vec<MiddlewareHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, handler);
    }

    /// Wraps every route in `middleware`; the first layer added is outermost.
    pub fn layer<M: Middleware + 'static>(&mut self, middleware: M) {
        self.layers.push(from_middleware(Arc::new(middleware)));
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn resolve(&self, method: &Method, path: &str) -> Resolution {
        let mut allowed = Vec::new();
        for route in &self.routes {
            if let Some(params) = route.pattern.matches(path) {
                if &route.method == method {
                    return Resolution::Found(Arc::clone(&route.handler), params);
                }
                if !allowed.contains(&route.method) {
                    allowed.push(route.method.clone());
                }
            }
        }
        if allowed.is_empty() {
            Resolution::Missing
        } else {
            Resolution::WrongMethod(allowed)
        }
    }

    /// Runs `request` through the layers and the first matching route.
    pub async fn route(&self, request: Request) -> Response {
        let (terminal, params) = match self.resolve(request.method(), request.path()) {
            Resolution::Found(handler, params) => (terminal_for(handler), params),
            Resolution::WrongMethod(allowed) => (method_not_allowed(&allowed), Parameters::new()),
            Resolution::Missing => (not_found(), Parameters::new()),
        };

        let mut chain = self.layers.clone();
        chain.push(terminal);
        Next::new(Arc::from(chain))
            .run(Context::with_params(request, params))
            .await
    }
}

fn terminal_for(handler: Handler) -> MiddlewareHandler {
    Arc::new(move |ctx: Context, _next: Next| handler(ctx))
}

fn method_not_allowed(allowed: &[Method]) -> MiddlewareHandler {
    let allow = allowed
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    Arc::new(move |_ctx: Context, _next: Next| -> BoxResponse {
        let response = Response::text(StatusCode::MethodNotAllowed, "Method Not Allowed")
            .header("Allow", allow.clone());
        Box::pin(async move { response })
    })
}

fn not_found() -> MiddlewareHandler {
    Arc::new(|_ctx: Context, _next: Next| -> BoxResponse {
        Box::pin(async { Response::text(StatusCode::NotFound, "Not Found") })
    })
}
