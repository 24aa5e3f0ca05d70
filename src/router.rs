//! Router: route table, builder, and the dispatch pipeline.
//!
//! A router is assembled from four inputs — a context factory, a route
//! table, global middlewares, and a path prefix — and compiled by
//! [`RouterBuilder::build`], which validates route keys and rejects
//! ambiguous overlap up front. Dispatch then runs every request through
//! the same pipeline: resolve the procedure, build a fresh context, run
//! the middleware chain (global middlewares first, then the procedure's
//! own in attachment order), validate input, invoke the handler, and
//! serialize the result.
//!
//! # Example
//! ```rust,ignore
//! let router = RouterBuilder::new()
//!     .route("index", ProcedureBuilder::new().query(index))
//!     .route("sendMessage", ProcedureBuilder::new().input::<SendMessage>().mutation(send))
//!     .route(":channelId", ProcedureBuilder::new().input::<ChatInput>().subscription(join))
//!     .prefix("/rpc")
//!     .build()?;
//! let app = router.into_axum();
//! ```

use crate::config::RpcConfig;
use crate::context::{Context, ContextFactory, factory_fn};
use crate::form::FormData;
use crate::middleware::{MiddlewareFn, Next, ProcedureKind, RequestMeta};
use crate::procedure::{FileDownload, HandlerSlot, Procedure};
use crate::stream::StreamEmitter;
use crate::subscription::{ConnectionId, Publisher, SubscriptionHub};
use crate::{RpcError, RpcErrorKind, RpcResult};
use http::{HeaderMap, Method};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

/// One parsed segment of a route key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Param(String),
}

pub(crate) struct RouteEntry<Ctx: Clone + Send + Sync + 'static> {
    key: String,
    pattern: Vec<Segment>,
    procedure: Procedure<Ctx>,
}

/// Body of an inbound call.
#[derive(Clone, Debug)]
pub enum CallPayload {
    /// Raw JSON input (query string or JSON body).
    Json(Value),
    /// Decoded multipart form.
    Form(FormData),
}

/// An inbound request addressed to a query, mutation, or form-mutation
/// procedure.
#[derive(Clone, Debug)]
pub struct CallRequest {
    /// Kind the transport mapped the request to.
    pub kind: ProcedureKind,
    /// Concrete path, prefix already stripped.
    pub path: String,
    /// The request body.
    pub payload: CallPayload,
    /// HTTP method of the request.
    pub method: Method,
    /// Request headers.
    pub headers: HeaderMap,
}

impl CallRequest {
    /// A query request with JSON input.
    pub fn query(path: impl Into<String>, input: Value) -> Self {
        Self {
            kind: ProcedureKind::Query,
            path: path.into(),
            payload: CallPayload::Json(input),
            method: Method::GET,
            headers: HeaderMap::new(),
        }
    }

    /// A mutation request with JSON input.
    pub fn mutation(path: impl Into<String>, input: Value) -> Self {
        Self {
            kind: ProcedureKind::Mutation,
            path: path.into(),
            payload: CallPayload::Json(input),
            method: Method::POST,
            headers: HeaderMap::new(),
        }
    }

    /// A form-mutation request with a decoded multipart body.
    pub fn form_mutation(path: impl Into<String>, form: FormData) -> Self {
        Self {
            kind: ProcedureKind::FormMutation,
            path: path.into(),
            payload: CallPayload::Form(form),
            method: Method::POST,
            headers: HeaderMap::new(),
        }
    }

    /// Replace the request headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replace the request method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
}

/// Builder assembling a router from its four construction inputs.
///
/// Defaults: unit context, empty routes, empty middleware, prefix `/`.
pub struct RouterBuilder<Ctx: Clone + Send + Sync + 'static> {
    factory: ContextFactory<Ctx>,
    routes: Vec<(String, Procedure<Ctx>)>,
    middleware: Vec<MiddlewareFn<Ctx>>,
    prefix: String,
    config: RpcConfig,
    hub: SubscriptionHub,
}

impl Default for RouterBuilder<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder<()> {
    /// Create a builder with a unit context and empty tables.
    pub fn new() -> Self {
        Self {
            factory: factory_fn(|_meta| async { Ok(()) }),
            routes: Vec::new(),
            middleware: Vec::new(),
            prefix: "/".to_string(),
            config: RpcConfig::default(),
            hub: SubscriptionHub::new(),
        }
    }
}

impl<Ctx: Clone + Send + Sync + 'static> RouterBuilder<Ctx> {
    /// Set the per-request context factory.
    ///
    /// Switching the context type resets routes and middleware, so call
    /// this before declaring them.
    pub fn context<NewCtx, F, Fut>(self, factory: F) -> RouterBuilder<NewCtx>
    where
        NewCtx: Clone + Send + Sync + 'static,
        F: Fn(RequestMeta) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<NewCtx>> + Send + 'static,
    {
        RouterBuilder {
            factory: factory_fn(factory),
            routes: Vec::new(),
            middleware: Vec::new(),
            prefix: self.prefix,
            config: self.config,
            hub: self.hub,
        }
    }

    /// Append a global middleware.
    ///
    /// Global middlewares run before any procedure-level middleware and
    /// observe the matched route, method, and headers — the hook for
    /// cross-cutting policies such as path blocking.
    pub fn middleware<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context<Ctx>, RequestMeta, Next<Ctx>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Value>> + Send + 'static,
    {
        self.middleware
            .push(Arc::new(move |ctx, meta, next| Box::pin(f(ctx, meta, next))));
        self
    }

    /// Register a procedure under a route key.
    ///
    /// Keys are slash-separated and may contain `:param` segments, e.g.
    /// `"sendMessage"` or `"chat/:channelId"`. The key `"index"` also
    /// answers requests for the bare prefix.
    pub fn route(mut self, key: impl Into<String>, procedure: Procedure<Ctx>) -> Self {
        self.routes.push((key.into(), procedure));
        self
    }

    /// Set the path prefix all routes are served under (default `/`).
    ///
    /// Changing the prefix never changes route identity, only the
    /// externally visible path.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Replace the engine configuration.
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Handle for publishing into subscription topics.
    ///
    /// Available before `build` so handlers can capture it:
    ///
    /// ```rust,ignore
    /// let builder = RouterBuilder::new();
    /// let publisher = builder.publisher();
    /// let router = builder
    ///     .route("sendMessage", send_message_procedure(publisher))
    ///     .build()?;
    /// ```
    pub fn publisher(&self) -> Publisher {
        self.hub.publisher()
    }

    /// Compile the route table and produce a router.
    ///
    /// Route keys are validated and overlapping routes that cannot be
    /// ordered by specificity are rejected here, at setup time, never at
    /// request time.
    pub fn build(self) -> RpcResult<Router<Ctx>> {
        let prefix = normalize_prefix(&self.prefix);
        let mut entries = Vec::with_capacity(self.routes.len());
        for (key, procedure) in self.routes {
            let pattern = parse_route_key(&key)?;
            entries.push(RouteEntry {
                key,
                pattern,
                procedure,
            });
        }

        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                let (a, b) = (&entries[i], &entries[j]);
                if !patterns_overlap(&a.pattern, &b.pattern) {
                    continue;
                }
                let a_dom = dominates(&a.pattern, &b.pattern);
                let b_dom = dominates(&b.pattern, &a.pattern);
                if a_dom && b_dom {
                    return Err(RpcError::bad_request(format!(
                        "duplicate route keys '{}' and '{}'",
                        a.key, b.key
                    )));
                }
                if !a_dom && !b_dom {
                    return Err(RpcError::bad_request(format!(
                        "ambiguous routes '{}' and '{}'",
                        a.key, b.key
                    )));
                }
            }
        }

        Ok(Router {
            inner: Arc::new(RouterInner {
                entries,
                factory: self.factory,
                middleware: self.middleware,
                prefix,
                config: self.config,
                hub: self.hub,
            }),
        })
    }
}

struct RouterInner<Ctx: Clone + Send + Sync + 'static> {
    entries: Vec<RouteEntry<Ctx>>,
    factory: ContextFactory<Ctx>,
    middleware: Vec<MiddlewareFn<Ctx>>,
    prefix: String,
    config: RpcConfig,
    hub: SubscriptionHub,
}

/// Compiled dispatcher for a route table.
///
/// Cheap to clone. Lifecycle is explicit: [`RouterBuilder::build`] is the
/// start, [`Router::stop`] tears down the subscription hub; nothing is
/// process-global, so multiple routers coexist in one process.
pub struct Router<Ctx: Clone + Send + Sync + 'static> {
    inner: Arc<RouterInner<Ctx>>,
}

impl<Ctx: Clone + Send + Sync + 'static> Clone for Router<Ctx> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Ctx: Clone + Send + Sync + 'static> Router<Ctx> {
    /// The normalized path prefix (empty string for `/`).
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// The engine configuration.
    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// The subscription hub.
    pub fn hub(&self) -> &SubscriptionHub {
        &self.inner.hub
    }

    /// Handle for publishing into subscription topics.
    pub fn publisher(&self) -> Publisher {
        self.inner.hub.publisher()
    }

    /// Sorted listing of registered route keys.
    pub fn procedures(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.entries.iter().map(|e| e.key.clone()).collect();
        keys.sort();
        keys
    }

    /// Kind of the procedure a path resolves to, if any.
    pub fn kind_of(&self, path: &str) -> Option<ProcedureKind> {
        self.resolve(path).ok().map(|(e, _)| e.procedure.kind())
    }

    /// Tear down the subscription hub, dropping all connections.
    pub async fn stop(&self) {
        self.inner.hub.shutdown().await;
    }

    fn resolve(&self, path: &str) -> RpcResult<(&RouteEntry<Ctx>, HashMap<String, String>)> {
        let trimmed = path.trim_matches('/');
        let lookup = if trimmed.is_empty() { "index" } else { trimmed };
        let segments: Vec<&str> = lookup.split('/').collect();

        // Build-time ambiguity checks guarantee at most one match per
        // specificity level, so the most-literal match is unique.
        let mut best: Option<(&RouteEntry<Ctx>, HashMap<String, String>, usize)> = None;
        for entry in &self.inner.entries {
            if let Some(params) = match_pattern(&entry.pattern, &segments) {
                let literals = entry
                    .pattern
                    .iter()
                    .filter(|s| matches!(s, Segment::Literal(_)))
                    .count();
                if best.as_ref().is_none_or(|(_, _, b)| literals > *b) {
                    best = Some((entry, params, literals));
                }
            }
        }
        best.map(|(entry, params, _)| (entry, params))
            .ok_or_else(|| RpcError::procedure_not_found(path))
    }

    /// Dispatch a query, mutation, or form-mutation request.
    ///
    /// Pipeline order: resolve → context factory → global middlewares →
    /// procedure middlewares → input validation → handler. The emitter is
    /// closed once the handler returns; server-class failures are logged
    /// and sanitized before they reach the caller.
    pub async fn call(&self, request: CallRequest, emitter: StreamEmitter) -> RpcResult<Value> {
        let result = self.call_inner(request, emitter.clone()).await;
        emitter.close();
        result.map_err(|e| {
            if e.kind.is_server_error() {
                tracing::error!(kind = %e.kind, message = %e.message, "procedure dispatch failed");
            }
            e.sanitize()
        })
    }

    async fn call_inner(&self, request: CallRequest, emitter: StreamEmitter) -> RpcResult<Value> {
        let (entry, params) = self.resolve(&request.path)?;
        let procedure = entry.procedure.clone();
        let route = entry.key.clone();
        if procedure.kind() != request.kind {
            return Err(RpcError::method_not_allowed(&route, procedure.kind()));
        }
        tracing::debug!(path = %request.path, route = %route, kind = %request.kind, "dispatching procedure");

        let meta = RequestMeta {
            path: request.path.clone(),
            route,
            kind: request.kind,
            method: request.method.clone(),
            headers: request.headers.clone(),
            params,
        };
        let ctx = (self.inner.factory)(meta.clone()).await?;

        let handler = procedure.handler().clone();
        let payload = request.payload;
        let max_input = self.inner.config.max_input_size;
        let final_next: Next<Ctx> = Arc::new(move |ctx, _meta| {
            let handler = handler.clone();
            let payload = payload.clone();
            let emitter = emitter.clone();
            Box::pin(async move {
                match (&handler, payload) {
                    (HandlerSlot::Call(h), CallPayload::Json(input)) => {
                        check_input_size(&input, max_input)?;
                        h(ctx, input, emitter).await
                    }
                    (HandlerSlot::Form(h), CallPayload::Form(form)) => h(ctx, form, emitter).await,
                    (HandlerSlot::Form(_), CallPayload::Json(_)) => {
                        Err(RpcError::bad_request("expected a multipart form body"))
                    }
                    (HandlerSlot::Call(_), CallPayload::Form(_)) => {
                        Err(RpcError::bad_request("unexpected multipart body"))
                    }
                    _ => Err(RpcError::bad_request(
                        "procedure is not callable over this transport",
                    )),
                }
            })
        });

        let chain = self.compose_chain(procedure.middleware(), final_next);
        chain(Context::new(ctx), meta).await
    }

    /// Dispatch a file request, bypassing validation and streaming.
    pub async fn fetch_file(&self, path: &str) -> RpcResult<FileDownload> {
        self.fetch_file_inner(path).await.map_err(|e| {
            if e.kind.is_server_error() {
                tracing::error!(kind = %e.kind, message = %e.message, "file dispatch failed");
            }
            e.sanitize()
        })
    }

    async fn fetch_file_inner(&self, path: &str) -> RpcResult<FileDownload> {
        let (entry, params) = self.resolve(path)?;
        let procedure = entry.procedure.clone();
        let route = entry.key.clone();
        let HandlerSlot::File(handler) = procedure.handler().clone() else {
            return Err(RpcError::method_not_allowed(&route, procedure.kind()));
        };

        let meta = RequestMeta::new(path, ProcedureKind::File)
            .with_route(route)
            .with_params(params);
        let ctx = (self.inner.factory)(meta.clone()).await?;

        // The chain carries JSON values; the download travels via a slot
        // the final step fills in.
        let slot: Arc<tokio::sync::Mutex<Option<FileDownload>>> =
            Arc::new(tokio::sync::Mutex::new(None));
        let slot_fill = slot.clone();
        let final_next: Next<Ctx> = Arc::new(move |ctx, _meta| {
            let handler = handler.clone();
            let slot = slot_fill.clone();
            Box::pin(async move {
                let download = handler(ctx).await?;
                *slot.lock().await = Some(download);
                Ok(Value::Null)
            })
        });

        let chain = self.compose_chain(procedure.middleware(), final_next);
        chain(Context::new(ctx), meta).await?;

        let download = slot.lock().await.take();
        download.ok_or_else(|| RpcError::internal("file handler did not produce a response"))
    }

    /// Handle an inbound subscribe message for one connection.
    ///
    /// Validation and the handler run with a fresh context; on success the
    /// connection is registered as a listener and the handler's value is
    /// delivered as the acknowledgment. Failures are delivered as an error
    /// message scoped to this subscription only — the connection itself is
    /// never closed, and other subscribers of the topic observe nothing.
    pub async fn subscribe(&self, connection: ConnectionId, path: &str, input: Value) {
        match self.run_subscription(path, input).await {
            Ok(ack) => {
                self.inner.hub.register(connection, path).await;
                self.inner.hub.send_data(connection, path, ack).await;
            }
            Err(e) => {
                let error = match e.kind {
                    RpcErrorKind::InternalError | RpcErrorKind::SerializationError => {
                        tracing::error!(path, kind = %e.kind, message = %e.message, "subscription handler failed");
                        RpcError::subscription("subscription handler failed")
                    }
                    _ => e,
                };
                self.inner.hub.send_error(connection, path, error).await;
            }
        }
    }

    /// Handle an inbound unsubscribe message. Idempotent.
    pub async fn unsubscribe(&self, connection: ConnectionId, path: &str) {
        self.inner.hub.unregister(connection, path).await;
    }

    async fn run_subscription(&self, path: &str, input: Value) -> RpcResult<Value> {
        let (entry, params) = self.resolve(path)?;
        let procedure = entry.procedure.clone();
        let route = entry.key.clone();
        let HandlerSlot::Subscription(handler) = procedure.handler().clone() else {
            return Err(RpcError::bad_request(format!(
                "procedure '{}' is a {}; subscribe over the WebSocket transport targets subscriptions only",
                route,
                procedure.kind()
            )));
        };

        let meta = RequestMeta::new(path, ProcedureKind::Subscription)
            .with_route(route)
            .with_params(params);
        let ctx = (self.inner.factory)(meta.clone()).await?;

        let max_input = self.inner.config.max_input_size;
        let final_next: Next<Ctx> = Arc::new(move |ctx, _meta| {
            let handler = handler.clone();
            let input = input.clone();
            Box::pin(async move {
                check_input_size(&input, max_input)?;
                handler(ctx, input).await
            })
        });

        let chain = self.compose_chain(procedure.middleware(), final_next);
        chain(Context::new(ctx), meta).await
    }

    /// Wrap the final step in the middleware onion: global middlewares
    /// first, then the procedure's own, each deciding whether to call
    /// through. The reverse fold makes the first-registered middleware the
    /// outermost layer.
    fn compose_chain(&self, procedure_mws: &[MiddlewareFn<Ctx>], final_next: Next<Ctx>) -> Next<Ctx> {
        self.inner
            .middleware
            .iter()
            .chain(procedure_mws.iter())
            .rev()
            .fold(final_next, |next, mw| {
                let mw = mw.clone();
                Arc::new(move |ctx, meta| {
                    let mw = mw.clone();
                    let next = next.clone();
                    Box::pin(async move { (mw)(ctx, meta, next).await })
                })
            })
    }
}

/// Reject inputs whose serialized form exceeds the configured maximum.
pub(crate) fn check_input_size(input: &Value, max: usize) -> RpcResult<()> {
    let serialized = serde_json::to_string(input)
        .map_err(|e| RpcError::serialization(format!("failed to measure input: {}", e)))?;
    if serialized.len() > max {
        return Err(RpcError::payload_too_large(format!(
            "input exceeds {} bytes",
            max
        )));
    }
    Ok(())
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn literal_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[A-Za-z0-9_-]+$").expect("literal segment regex"))
}

fn param_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^:[A-Za-z_][A-Za-z0-9_]*$").expect("param segment regex"))
}

fn parse_route_key(key: &str) -> RpcResult<Vec<Segment>> {
    if key.is_empty() {
        return Err(RpcError::bad_request("empty route key"));
    }
    let mut pattern = Vec::new();
    for segment in key.split('/') {
        if segment.starts_with(':') {
            if !param_segment_re().is_match(segment) {
                return Err(RpcError::bad_request(format!(
                    "route key '{}' has an invalid parameter segment '{}'",
                    key, segment
                )));
            }
            pattern.push(Segment::Param(segment[1..].to_string()));
        } else if literal_segment_re().is_match(segment) {
            pattern.push(Segment::Literal(segment.to_string()));
        } else {
            return Err(RpcError::bad_request(format!(
                "route key '{}' has an invalid segment '{}'",
                key, segment
            )));
        }
    }
    Ok(pattern)
}

/// Whether some request path could match both patterns.
fn patterns_overlap(a: &[Segment], b: &[Segment]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| match (x, y) {
            (Segment::Literal(l), Segment::Literal(r)) => l == r,
            _ => true,
        })
}

/// Whether `a` is at least as specific as `b` at every position.
fn dominates(a: &[Segment], b: &[Segment]) -> bool {
    a.iter()
        .zip(b)
        .all(|(x, y)| !(matches!(x, Segment::Param(_)) && matches!(y, Segment::Literal(_))))
}

fn match_pattern(pattern: &[Segment], segments: &[&str]) -> Option<HashMap<String, String>> {
    if pattern.len() != segments.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (seg, part) in pattern.iter().zip(segments) {
        match seg {
            Segment::Literal(lit) => {
                if lit != part {
                    return None;
                }
            }
            Segment::Param(name) => {
                params.insert(name.clone(), (*part).to_string());
            }
        }
    }
    Some(params)
}
