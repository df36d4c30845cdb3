//! Middleware pipeline: before/after logic wrapped around every route.
//!
//! The router builds one chain per request: every registered middleware in
//! order, then the matched endpoint. Each layer receives a [`Next`] cursor and
//! decides whether to call it.
//!
//! - [`Middleware`] is the trait every layer implements.
//! - [`MiddlewareHandler`] is the type-erased, cheaply-cloneable form stored
//!   in the chain.
//! - [`LoggerMiddleware`] logs one line per request.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;

use crate::context::Context;
use crate::http::{Response, StatusCode};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Wraps a [`Middleware`] implementation as a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Cursor into the remaining middleware chain for one request.
///
/// `run` consumes the cursor, so a layer can forward at most once.
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    index: usize,
}

impl Next {
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next layer. An exhausted chain yields a 500, which only
    /// happens if the router forgot to append an endpoint.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::text(
                StatusCode::InternalServerError,
                "No response generated by middleware pipeline",
            )
        }
    }
}

/// A layer in the request pipeline.
///
/// Implementations may pass through (`next.run(ctx).await`), short-circuit
/// with their own [`Response`], or decorate the downstream response.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs method, path, status, and latency of every request at `info`.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();
            let body_bytes = ctx.request().body().len();

            let response = next.run(ctx).await;

            tracing::info!(
                %method,
                %path,
                status = response.status().as_u16(),
                body_bytes,
                elapsed = ?start.elapsed(),
                "request served"
            );

            response
        })
    }
}
