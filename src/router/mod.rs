//! Request routing: map a method and exact path to a handler.
//!
//! Paths are compared after stripping a trailing slash, so `/process/` and
//! `/process` are the same route. A known path requested with the wrong method
//! gets `405 Method Not Allowed` and an `Allow` header; an unknown path gets
//! `404 Not Found`. Both still run through the middleware stack so they show
//! up in the request log.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::app::AppState;
use crate::context::Context;
use crate::http::{Method, Request, Response, StatusCode};
use crate::middleware::{Middleware, MiddlewareHandler, Next, from_middleware};

/// Type-erased async handler.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Anything callable as `async fn(Context) -> Response`.
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

struct Route {
    method: Method,
    path: String,
    handler: Handler,
}

/// Dispatches requests to handlers, wrapping each in the middleware stack.
pub struct Router {
    routes: Vec<Route>,
    middlewares: Vec<MiddlewareHandler>,
    state: Arc<AppState>,
}

impl Router {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            routes: Vec::new(),
            middlewares: Vec::new(),
            state,
        }
    }

    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, handler);
    }

    /// Appends a middleware layer. Layers run in the order they were added.
    pub fn layer<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(from_middleware(Arc::new(middleware)));
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx: Context| handler.call(ctx));
        self.routes.push(Route {
            method,
            path: normalize(path).to_owned(),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches `request` and returns the response.
    ///
    /// The first route registered for the method and path wins.
    pub async fn route(&self, request: Request) -> Response {
        let endpoint = self.resolve(request.method(), request.path());

        let mut chain = self.middlewares.clone();
        chain.push(Arc::new(move |ctx: Context, _next: Next| endpoint(ctx)));

        let ctx = Context::new(request, Arc::clone(&self.state));
        Next::new(chain).run(ctx).await
    }

    fn resolve(&self, method: &Method, path: &str) -> Handler {
        let path = normalize(path);
        let mut allowed: Vec<&str> = Vec::new();

        for route in self.routes.iter().filter(|r| r.path == path) {
            if &route.method == method {
                return Arc::clone(&route.handler);
            }
            if !allowed.contains(&route.method.as_str()) {
                allowed.push(route.method.as_str());
            }
        }

        if allowed.is_empty() {
            fixed(|| Response::text(StatusCode::NotFound, "Not Found"))
        } else {
            let allow = allowed.join(", ");
            fixed(move || {
                Response::text(StatusCode::MethodNotAllowed, "Method not allowed")
                    .header("Allow", allow.clone())
            })
        }
    }
}

// A handler that ignores the request and always answers with `make()`.
fn fixed<F>(make: F) -> Handler
where
    F: Fn() -> Response + Send + Sync + 'static,
{
    Arc::new(move |_ctx: Context| -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let response = make();
        Box::pin(async move { response })
    })
}

fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}
