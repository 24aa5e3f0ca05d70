//! Procedure builder and the immutable procedures it produces.
//!
//! A [`ProcedureBuilder`] composes a middleware chain and an input type,
//! then finalizes into a [`Procedure`] of a fixed kind. Builder methods
//! borrow the receiver and return a new value — middleware entries are
//! `Arc`s, so composition is structural sharing, not deep copying — which
//! lets one base builder safely seed many derived procedures:
//!
//! ```rust,ignore
//! let procedure = ProcedureBuilder::<AppCtx>::new();
//! let protected = procedure.with(auth_check);
//!
//! let me = protected.input::<Empty>().query(current_user);
//! let send = protected.input::<SendMessage>().mutation(send_message);
//! // `procedure` and `protected` are still usable, unchanged.
//! ```
//!
//! A finalized [`Procedure`] exposes no further composition; its kind and
//! chain are fixed for the lifetime of the router.

use crate::context::Context;
use crate::form::{FormData, FromFormData};
use crate::middleware::{MiddlewareFn, Next, ProcedureKind, RequestMeta};
use crate::stream::StreamEmitter;
use crate::validation::{Validate, ValidationResult};
use crate::{RpcError, RpcResult};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed handler for query/mutation procedures.
pub(crate) type BoxedCallHandler<Ctx> = Arc<
    dyn Fn(
            Context<Ctx>,
            Value,
            StreamEmitter,
        ) -> Pin<Box<dyn Future<Output = RpcResult<Value>> + Send>>
        + Send
        + Sync,
>;

/// Boxed handler for form-mutation procedures.
pub(crate) type BoxedFormHandler<Ctx> = Arc<
    dyn Fn(
            Context<Ctx>,
            FormData,
            StreamEmitter,
        ) -> Pin<Box<dyn Future<Output = RpcResult<Value>> + Send>>
        + Send
        + Sync,
>;

/// Boxed handler for file procedures.
pub(crate) type BoxedFileHandler<Ctx> = Arc<
    dyn Fn(Context<Ctx>) -> Pin<Box<dyn Future<Output = RpcResult<FileDownload>> + Send>>
        + Send
        + Sync,
>;

/// Boxed handler for subscription procedures.
pub(crate) type BoxedSubscriptionHandler<Ctx> = Arc<
    dyn Fn(Context<Ctx>, Value) -> Pin<Box<dyn Future<Output = RpcResult<Value>> + Send>>
        + Send
        + Sync,
>;

/// A byte payload returned by a file procedure.
#[derive(Debug, Clone)]
pub struct FileDownload {
    /// File name presented to the client.
    pub file_name: String,
    /// Explicit content type; inferred from the file name when absent.
    pub content_type: Option<String>,
    /// The bytes to serve.
    pub body: Bytes,
}

impl FileDownload {
    /// Create a download from a file name and its bytes.
    pub fn new(file_name: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            body: body.into(),
        }
    }

    /// Override the inferred content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The content type to serve: the explicit one, or a guess from the
    /// file name, or `application/octet-stream`.
    pub fn resolved_content_type(&self) -> String {
        match &self.content_type {
            Some(ct) => ct.clone(),
            None => mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .to_string(),
        }
    }
}

/// Type-erased handler storage, one variant per execution shape.
pub(crate) enum HandlerSlot<Ctx: Clone + Send + Sync + 'static> {
    Call(BoxedCallHandler<Ctx>),
    Form(BoxedFormHandler<Ctx>),
    File(BoxedFileHandler<Ctx>),
    Subscription(BoxedSubscriptionHandler<Ctx>),
}

impl<Ctx: Clone + Send + Sync + 'static> Clone for HandlerSlot<Ctx> {
    fn clone(&self) -> Self {
        match self {
            Self::Call(h) => Self::Call(h.clone()),
            Self::Form(h) => Self::Form(h.clone()),
            Self::File(h) => Self::File(h.clone()),
            Self::Subscription(h) => Self::Subscription(h.clone()),
        }
    }
}

/// An immutable, finalized procedure.
///
/// Created once at router-setup time; the kind, middleware chain, and
/// handler never change afterwards.
pub struct Procedure<Ctx: Clone + Send + Sync + 'static> {
    kind: ProcedureKind,
    middleware: Arc<[MiddlewareFn<Ctx>]>,
    handler: HandlerSlot<Ctx>,
}

impl<Ctx: Clone + Send + Sync + 'static> Clone for Procedure<Ctx> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            middleware: self.middleware.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<Ctx: Clone + Send + Sync + 'static> Procedure<Ctx> {
    /// The procedure's kind, fixed at creation.
    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    pub(crate) fn middleware(&self) -> &[MiddlewareFn<Ctx>] {
        &self.middleware
    }

    pub(crate) fn handler(&self) -> &HandlerSlot<Ctx> {
        &self.handler
    }
}

/// Builder for procedures, tracking the input type at compile time.
///
/// `Input` defaults to `()`; call [`ProcedureBuilder::input`] to attach a
/// schema type. The typed builder does not expose `input` again, so
/// attaching two schemas is a compile error rather than a silent
/// last-write-wins.
pub struct ProcedureBuilder<Ctx, Input = ()>
where
    Ctx: Clone + Send + Sync + 'static,
{
    middleware: Vec<MiddlewareFn<Ctx>>,
    _input: PhantomData<fn() -> Input>,
}

impl<Ctx, Input> Clone for ProcedureBuilder<Ctx, Input>
where
    Ctx: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            middleware: self.middleware.clone(),
            _input: PhantomData,
        }
    }
}

impl<Ctx> Default for ProcedureBuilder<Ctx, ()>
where
    Ctx: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> ProcedureBuilder<Ctx, ()>
where
    Ctx: Clone + Send + Sync + 'static,
{
    /// Create a base builder with an empty middleware chain and no input
    /// schema.
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
            _input: PhantomData,
        }
    }

    /// Attach the input type for this procedure.
    ///
    /// The finalizers bound what the type must implement:
    /// `DeserializeOwned + Validate` for query/mutation/subscription,
    /// `FromFormData + Validate` for form mutations.
    pub fn input<NewInput>(&self) -> ProcedureBuilder<Ctx, NewInput> {
        ProcedureBuilder {
            middleware: self.middleware.clone(),
            _input: PhantomData,
        }
    }

    /// Finalize into a file procedure.
    ///
    /// File procedures take no input and bypass validation and streaming;
    /// the returned bytes are piped to the response as-is.
    pub fn file<H, Fut>(&self, handler: H) -> Procedure<Ctx>
    where
        H: Fn(Context<Ctx>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<FileDownload>> + Send + 'static,
    {
        let boxed: BoxedFileHandler<Ctx> = Arc::new(move |ctx| {
            let handler = handler.clone();
            Box::pin(async move { handler(ctx).await })
        });
        Procedure {
            kind: ProcedureKind::File,
            middleware: self.middleware.clone().into(),
            handler: HandlerSlot::File(boxed),
        }
    }
}

impl<Ctx, Input> ProcedureBuilder<Ctx, Input>
where
    Ctx: Clone + Send + Sync + 'static,
{
    /// Append a middleware to the chain, returning a new builder.
    ///
    /// The receiver is untouched; procedure middlewares run after the
    /// router's global middlewares, in attachment order.
    pub fn with<F, Fut>(&self, mw: F) -> Self
    where
        F: Fn(Context<Ctx>, RequestMeta, Next<Ctx>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Value>> + Send + 'static,
    {
        let mut middleware = self.middleware.clone();
        middleware.push(Arc::new(move |ctx, meta, next| Box::pin(mw(ctx, meta, next))));
        Self {
            middleware,
            _input: PhantomData,
        }
    }

    /// Append an already-boxed middleware.
    pub fn with_fn(&self, mw: MiddlewareFn<Ctx>) -> Self {
        let mut middleware = self.middleware.clone();
        middleware.push(mw);
        Self {
            middleware,
            _input: PhantomData,
        }
    }

    /// Number of middlewares attached so far.
    pub fn middleware_len(&self) -> usize {
        self.middleware.len()
    }

    /// Finalize into a query procedure (read-only).
    pub fn query<H, Fut, Output>(&self, handler: H) -> Procedure<Ctx>
    where
        Input: DeserializeOwned + Validate + Send + 'static,
        H: Fn(Context<Ctx>, Input, StreamEmitter) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Output>> + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        self.finish_call(ProcedureKind::Query, handler)
    }

    /// Finalize into a mutation procedure (state-changing).
    pub fn mutation<H, Fut, Output>(&self, handler: H) -> Procedure<Ctx>
    where
        Input: DeserializeOwned + Validate + Send + 'static,
        H: Fn(Context<Ctx>, Input, StreamEmitter) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Output>> + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        self.finish_call(ProcedureKind::Mutation, handler)
    }

    /// Finalize into a form-mutation procedure (multipart body).
    pub fn form_mutation<H, Fut, Output>(&self, handler: H) -> Procedure<Ctx>
    where
        Input: FromFormData + Validate + Send + 'static,
        H: Fn(Context<Ctx>, Input, StreamEmitter) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Output>> + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        let boxed: BoxedFormHandler<Ctx> = Arc::new(move |ctx, form, emitter| {
            let handler = handler.clone();
            Box::pin(async move {
                let input = Input::from_form(form).map_err(|r| RpcError::validation(r.errors))?;
                check_valid(input.validate())?;
                let output = handler(ctx, input, emitter).await?;
                to_output_value(output)
            })
        });
        Procedure {
            kind: ProcedureKind::FormMutation,
            middleware: self.middleware.clone().into(),
            handler: HandlerSlot::Form(boxed),
        }
    }

    /// Finalize into a subscription procedure.
    ///
    /// The handler runs once per inbound subscribe message and returns the
    /// initial acknowledgment value delivered to the subscriber.
    pub fn subscription<H, Fut, Output>(&self, handler: H) -> Procedure<Ctx>
    where
        Input: DeserializeOwned + Validate + Send + 'static,
        H: Fn(Context<Ctx>, Input) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Output>> + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        let boxed: BoxedSubscriptionHandler<Ctx> = Arc::new(move |ctx, raw| {
            let handler = handler.clone();
            Box::pin(async move {
                let input: Input = decode_input(raw)?;
                check_valid(input.validate())?;
                let output = handler(ctx, input).await?;
                to_output_value(output)
            })
        });
        Procedure {
            kind: ProcedureKind::Subscription,
            middleware: self.middleware.clone().into(),
            handler: HandlerSlot::Subscription(boxed),
        }
    }

    fn finish_call<H, Fut, Output>(&self, kind: ProcedureKind, handler: H) -> Procedure<Ctx>
    where
        Input: DeserializeOwned + Validate + Send + 'static,
        H: Fn(Context<Ctx>, Input, StreamEmitter) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Output>> + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        let boxed: BoxedCallHandler<Ctx> = Arc::new(move |ctx, raw, emitter| {
            let handler = handler.clone();
            Box::pin(async move {
                let input: Input = decode_input(raw)?;
                check_valid(input.validate())?;
                let output = handler(ctx, input, emitter).await?;
                to_output_value(output)
            })
        });
        Procedure {
            kind,
            middleware: self.middleware.clone().into(),
            handler: HandlerSlot::Call(boxed),
        }
    }
}

fn decode_input<T: DeserializeOwned>(raw: Value) -> RpcResult<T> {
    serde_json::from_value(raw).map_err(|e| RpcError::invalid_input(e.to_string()))
}

fn check_valid(result: ValidationResult) -> RpcResult<()> {
    if result.is_valid() {
        Ok(())
    } else {
        Err(RpcError::validation(result.errors))
    }
}

fn to_output_value<T: Serialize>(output: T) -> RpcResult<Value> {
    serde_json::to_value(output)
        .map_err(|e| RpcError::serialization(format!("failed to serialize output: {}", e)))
}
