//! Typed procedure routing and execution over HTTP and WebSocket.
//!
//! `brpc` maps declared procedures — queries, mutations, form mutations,
//! file downloads, and subscriptions — onto inbound requests, runs each
//! through a composable middleware chain, validates input against the
//! procedure's schema, and serializes the result: a single value, a file,
//! or a live stream of status events. Subscriptions multiplex many logical
//! event streams over one WebSocket connection, with per-topic fan-out and
//! per-subscriber error isolation.
//!
//! # Example
//! ```rust,ignore
//! use brpc::{ProcedureBuilder, RouterBuilder, RpcResult, StatusEvent};
//!
//! async fn index(_ctx: brpc::Context<()>, _input: (), _stream: brpc::StreamEmitter) -> RpcResult<&'static str> {
//!     Ok("Hello from brpc")
//! }
//!
//! let router = RouterBuilder::new()
//!     .route("index", ProcedureBuilder::new().query(index))
//!     .prefix("/rpc")
//!     .build()?;
//!
//! // Serve with any axum host:
//! let app = router.into_axum();
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod form;
pub mod integrations;
pub mod middleware;
pub mod procedure;
pub mod router;
pub mod stream;
pub mod subscription;
pub mod validation;

#[cfg(test)]
mod tests;

pub use config::RpcConfig;
pub use context::{Context, EmptyContext};
pub use error::{RpcError, RpcErrorKind, RpcResult};
pub use form::{FormData, FormLimits, FromFormData, UploadedFile};
pub use middleware::{ProcedureKind, RequestMeta};
pub use procedure::{FileDownload, Procedure, ProcedureBuilder};
pub use router::{CallPayload, CallRequest, Router, RouterBuilder};
pub use stream::{EmitError, StatusEvent, StreamEmitter, status_channel};
pub use subscription::{
    ClientMessage, ConnectionId, Publisher, ServerMessage, SubscriptionHub,
};
pub use validation::{FieldError, Validate, ValidationResult};
