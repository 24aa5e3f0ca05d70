//! Context types for per-request state.

use crate::RpcResult;
use crate::middleware::RequestMeta;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Context wrapper providing access to application state.
///
/// A fresh context is produced by the router's factory for every request
/// and owned by that request's execution alone. Use `Arc`/interior
/// mutability inside `T` for state middleware needs to write.
#[derive(Clone)]
pub struct Context<T: Clone + Send + Sync + 'static> {
    inner: Arc<T>,
}

impl<T: Clone + Send + Sync + 'static> Context<T> {
    /// Create a new context wrapping the given value
    pub fn new(ctx: T) -> Self {
        Self {
            inner: Arc::new(ctx),
        }
    }

    /// Get a reference to the inner context
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Get the Arc for sharing
    pub fn arc(&self) -> Arc<T> {
        self.inner.clone()
    }
}

impl<T: Clone + Send + Sync + 'static> std::ops::Deref for Context<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: Clone + Send + Sync + 'static + Default> Default for Context<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Empty context for routers that don't need state
#[derive(Clone, Default, Debug)]
pub struct EmptyContext;

/// Boxed per-request context factory.
///
/// Invoked once per inbound request (and once per inbound subscription
/// message) with the request metadata; the produced value is never shared
/// across requests.
pub type ContextFactory<Ctx> = Arc<
    dyn Fn(RequestMeta) -> Pin<Box<dyn Future<Output = RpcResult<Ctx>> + Send>> + Send + Sync,
>;

/// Wrap an async function as a [`ContextFactory`].
pub fn factory_fn<Ctx, F, Fut>(f: F) -> ContextFactory<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
    F: Fn(RequestMeta) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Ctx>> + Send + 'static,
{
    Arc::new(move |meta| Box::pin(f(meta)))
}
