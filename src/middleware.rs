//! Middleware support for request processing.
//!
//! Middleware compose as an onion: each receives the context, the request
//! metadata, and a `next` continuation. Returning an error terminates the
//! chain; everything downstream (later middleware, input validation, the
//! handler) never runs. Router-level middleware observe the matched route
//! and request metadata before any procedure-specific logic, which is the
//! hook for cross-cutting policies such as path blocking or rate limiting.

use crate::context::Context;
use crate::{RpcError, RpcResult};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Kind of procedure being dispatched.
///
/// Fixed at build time; determines the HTTP method / WebSocket semantics a
/// request must use to reach the procedure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcedureKind {
    /// Read-only operation (GET)
    Query,
    /// State-changing operation (POST, JSON body)
    Mutation,
    /// State-changing operation (POST, multipart body)
    FormMutation,
    /// Raw byte-stream response (GET)
    File,
    /// WebSocket-only streaming registration
    Subscription,
}

impl ProcedureKind {
    /// Whether handlers of this kind receive a stream emitter.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Query | Self::Mutation | Self::FormMutation)
    }

    /// The HTTP method requests of this kind arrive with.
    pub fn default_method(&self) -> Method {
        match self {
            Self::Query | Self::File | Self::Subscription => Method::GET,
            Self::Mutation | Self::FormMutation => Method::POST,
        }
    }
}

impl std::fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::FormMutation => write!(f, "formMutation"),
            Self::File => write!(f, "file"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// Request information passed to middleware.
#[derive(Clone, Debug)]
pub struct RequestMeta {
    /// Concrete request path (prefix-stripped), e.g. `"general"`
    pub path: String,
    /// Matched route key, e.g. `":channelId"`
    pub route: String,
    /// Kind of the matched procedure
    pub kind: ProcedureKind,
    /// HTTP method of the request
    pub method: Method,
    /// Request headers
    pub headers: HeaderMap,
    /// Values captured by `:param` route segments
    pub params: HashMap<String, String>,
}

impl RequestMeta {
    /// Build metadata with defaults derived from the kind.
    pub fn new(path: impl Into<String>, kind: ProcedureKind) -> Self {
        let path = path.into();
        Self {
            route: path.clone(),
            path,
            kind,
            method: kind.default_method(),
            headers: HeaderMap::new(),
            params: HashMap::new(),
        }
    }

    /// Set the matched route key.
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    /// Set the captured route parameters.
    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Value captured by the named `:param` segment, if any.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Next function in the middleware chain
pub type Next<Ctx> = Arc<
    dyn Fn(
            Context<Ctx>,
            RequestMeta,
        ) -> Pin<Box<dyn Future<Output = RpcResult<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Middleware function type
pub type MiddlewareFn<Ctx> = Arc<
    dyn Fn(
            Context<Ctx>,
            RequestMeta,
            Next<Ctx>,
        ) -> Pin<Box<dyn Future<Output = RpcResult<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Create middleware from an async function
///
/// # Example
/// ```rust,ignore
/// async fn auth<Ctx>(ctx: Context<Ctx>, meta: RequestMeta, next: Next<Ctx>) -> RpcResult<Value> {
///     if meta.header("authorization").is_none() {
///         return Err(RpcError::unauthorized("missing token"));
///     }
///     next(ctx, meta).await
/// }
/// ```
pub fn from_fn<Ctx, F, Fut>(f: F) -> MiddlewareFn<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
    F: Fn(Context<Ctx>, RequestMeta, Next<Ctx>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<serde_json::Value>> + Send + 'static,
{
    Arc::new(move |ctx, meta, next| Box::pin(f(ctx, meta, next)))
}

/// Reject the request from inside a middleware.
///
/// Shorthand for the common authorization rejection.
pub fn reject(message: impl Into<String>) -> RpcError {
    RpcError::middleware(message)
}
