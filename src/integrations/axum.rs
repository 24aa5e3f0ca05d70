//! HTTP and WebSocket transport over axum.
//!
//! [`Router::into_axum`] mounts the route table under the configured
//! prefix:
//!
//! - `GET <prefix>/<route>?input=<json>` → query (or file, for file
//!   procedures)
//! - `POST <prefix>/<route>` with a JSON body → mutation
//! - `POST <prefix>/<route>` with a multipart body → form mutation
//! - `GET <prefix>/ws` → WebSocket upgrade for subscriptions (a route key
//!   named `ws` would be shadowed by this endpoint)
//!
//! Plain responses use the `{"data": ...}` / `{"error": ...}` envelope
//! with the HTTP status derived from the error kind. A handler that emits
//! status events switches the response to `application/x-ndjson`: one JSON
//! object per line, zero or more status frames (objects with an `"event"`
//! key) in emission order, then exactly one terminal `{"data"}` or
//! `{"error"}` frame. Clients rely on this framing; it is stable.

use crate::middleware::ProcedureKind;
use crate::procedure::FileDownload;
use crate::router::{CallRequest, Router};
use crate::stream::{StatusEvent, StatusReceiver, status_channel};
use crate::subscription::{ClientMessage, ConnectionId, ServerMessage};
use crate::{RpcError, RpcResult, form};
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

/// Content type of streaming responses.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Query-string parameters accepted by GET requests.
#[derive(Debug, Deserialize)]
pub struct GetParams {
    /// JSON-encoded input for the query procedure.
    pub input: Option<String>,
}

impl<Ctx: Clone + Send + Sync + 'static> Router<Ctx> {
    /// Mount the router as an `axum::Router` the host server can serve.
    pub fn into_axum(self) -> axum::Router {
        let prefix = self.prefix().to_string();
        let ws_path = format!("{}/ws", prefix);
        let wildcard = format!("{}/{{*path}}", prefix);
        let root = if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.clone()
        };

        let mut app = axum::Router::new()
            .route(&ws_path, get(ws_handler::<Ctx>))
            .route(&wildcard, get(http_get::<Ctx>).post(http_post::<Ctx>))
            .route(&root, get(http_get_root::<Ctx>).post(http_post_root::<Ctx>));
        if !prefix.is_empty() {
            app = app.route(
                &format!("{}/", prefix),
                get(http_get_root::<Ctx>).post(http_post_root::<Ctx>),
            );
        }
        app.with_state(self)
    }
}

async fn http_get<Ctx: Clone + Send + Sync + 'static>(
    State(router): State<Router<Ctx>>,
    Path(path): Path<String>,
    Query(params): Query<GetParams>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    get_common(router, path, params, method, headers).await
}

async fn http_get_root<Ctx: Clone + Send + Sync + 'static>(
    State(router): State<Router<Ctx>>,
    Query(params): Query<GetParams>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    get_common(router, String::new(), params, method, headers).await
}

async fn get_common<Ctx: Clone + Send + Sync + 'static>(
    router: Router<Ctx>,
    path: String,
    params: GetParams,
    method: Method,
    headers: HeaderMap,
) -> Response {
    if matches!(router.kind_of(&path), Some(ProcedureKind::File)) {
        return match router.fetch_file(&path).await {
            Ok(download) => file_response(download),
            Err(error) => error_response(error),
        };
    }

    let input = match parse_get_input(params.input) {
        Ok(input) => input,
        Err(error) => return error_response(error),
    };
    let request = CallRequest::query(path, input)
        .with_method(method)
        .with_headers(headers);
    respond_call(router, request).await
}

async fn http_post<Ctx: Clone + Send + Sync + 'static>(
    State(router): State<Router<Ctx>>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    post_common(router, path, method, headers, body).await
}

async fn http_post_root<Ctx: Clone + Send + Sync + 'static>(
    State(router): State<Router<Ctx>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    post_common(router, String::new(), method, headers, body).await
}

async fn post_common<Ctx: Clone + Send + Sync + 'static>(
    router: Router<Ctx>,
    path: String,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let request = if content_type.starts_with("multipart/form-data") {
        match form::decode(&content_type, body, &router.config().form).await {
            Ok(form) => CallRequest::form_mutation(path, form),
            Err(error) => return error_response(error),
        }
    } else {
        let input = if body.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(&body) {
                Ok(input) => input,
                Err(e) => return error_response(RpcError::invalid_input(e.to_string())),
            }
        };
        CallRequest::mutation(path, input)
    };

    respond_call(router, request.with_method(method).with_headers(headers)).await
}

fn parse_get_input(raw: Option<String>) -> RpcResult<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(s) => serde_json::from_str(&s)
            .map_err(|e| RpcError::invalid_input(format!("query input: {}", e))),
    }
}

/// Dispatch a call and shape the response.
///
/// The decision between a plain envelope and NDJSON framing is made at the
/// first frame: if the handler completes before emitting anything, the
/// response is the plain envelope; the first emitted event commits the
/// response to streaming.
async fn respond_call<Ctx: Clone + Send + Sync + 'static>(
    router: Router<Ctx>,
    request: CallRequest,
) -> Response {
    let (emitter, mut rx) = status_channel(router.config().channel_buffer);
    let dispatch = router.clone();
    let mut task = tokio::spawn(async move { dispatch.call(request, emitter).await });

    tokio::select! {
        first = rx.recv() => match first {
            Some(event) => stream_response(event, rx, task),
            None => envelope_response(join_result(task.await)),
        },
        joined = &mut task => {
            let result = join_result(joined);
            let mut buffered = Vec::new();
            while let Ok(event) = rx.try_recv() {
                buffered.push(event);
            }
            if buffered.is_empty() {
                envelope_response(result)
            } else {
                buffered_stream_response(buffered, result)
            }
        }
    }
}

fn join_result(joined: Result<RpcResult<Value>, JoinError>) -> RpcResult<Value> {
    joined.unwrap_or_else(|e| Err(RpcError::internal(format!("handler task failed: {}", e))))
}

fn stream_response(
    first: StatusEvent,
    mut rx: StatusReceiver,
    mut task: JoinHandle<RpcResult<Value>>,
) -> Response {
    let (tx, frames) = futures::channel::mpsc::unbounded::<Result<String, Infallible>>();
    tokio::spawn(async move {
        if tx.unbounded_send(Ok(event_frame(&first))).is_err() {
            return;
        }
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        // A failed send means the client went away; dropping
                        // rx closes the handler's emitter.
                        if tx.unbounded_send(Ok(event_frame(&event))).is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = tx.unbounded_send(Ok(terminal_frame(join_result(task.await))));
                        break;
                    }
                },
                joined = &mut task => {
                    // Emitters are closed by now; drain what was buffered
                    // before completion, then finish with the terminal frame.
                    while let Ok(event) = rx.try_recv() {
                        let _ = tx.unbounded_send(Ok(event_frame(&event)));
                    }
                    let _ = tx.unbounded_send(Ok(terminal_frame(join_result(joined))));
                    break;
                }
            }
        }
    });
    ndjson_response(frames)
}

fn buffered_stream_response(events: Vec<StatusEvent>, result: RpcResult<Value>) -> Response {
    let mut body = String::new();
    for event in &events {
        body.push_str(&event_frame(event));
    }
    body.push_str(&terminal_frame(result));
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

fn ndjson_response(
    frames: impl Stream<Item = Result<String, Infallible>> + Send + 'static,
) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(frames),
    )
        .into_response()
}

fn event_frame(event: &StatusEvent) -> String {
    let mut line = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    line
}

fn terminal_frame(result: RpcResult<Value>) -> String {
    let value = match result {
        Ok(data) => serde_json::json!({ "data": data }),
        Err(error) => serde_json::json!({ "error": error }),
    };
    let mut line = value.to_string();
    line.push('\n');
    line
}

fn envelope_response(result: RpcResult<Value>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(serde_json::json!({ "data": data }))).into_response(),
        Err(error) => error_response(error),
    }
}

fn error_response(error: RpcError) -> Response {
    (
        error.kind.http_status(),
        Json(serde_json::json!({ "error": error })),
    )
        .into_response()
}

fn file_response(download: FileDownload) -> Response {
    let content_type = download.resolved_content_type();
    let disposition = format!("inline; filename=\"{}\"", download.file_name);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(download.body),
    )
        .into_response()
}

async fn ws_handler<Ctx: Clone + Send + Sync + 'static>(
    State(router): State<Router<Ctx>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| ws_connection(router, socket))
        .into_response()
}

/// Per-connection receive/send loop.
///
/// Inbound subscribe/unsubscribe messages are processed in arrival order;
/// outbound messages drain from the connection's hub outbox. Closing the
/// socket (either direction) detaches the connection, which unregisters
/// every subscription it held.
async fn ws_connection<Ctx: Clone + Send + Sync + 'static>(router: Router<Ctx>, mut socket: WebSocket) {
    let connection = ConnectionId::new();
    let (outbox, mut outbox_rx) = mpsc::channel::<ServerMessage>(router.config().channel_buffer);
    router.hub().attach(connection, outbox).await;
    tracing::debug!(%connection, "websocket open");

    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Subscribe { path, input }) => {
                        router.subscribe(connection, &path, input).await;
                    }
                    Ok(ClientMessage::Unsubscribe { path }) => {
                        router.unsubscribe(connection, &path).await;
                    }
                    Err(e) => {
                        router
                            .hub()
                            .send_error(
                                connection,
                                "",
                                RpcError::bad_request(format!("malformed message: {}", e)),
                            )
                            .await;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // binary unsupported; ping/pong handled by axum
                Some(Err(_)) => break,
            },
            outbound = outbox_rx.recv() => match outbound {
                Some(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(%connection, "failed to encode outbound message: {}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break, // hub shut down
            },
        }
    }

    router.hub().detach(connection).await;
    tracing::debug!(%connection, "websocket closed");
}
