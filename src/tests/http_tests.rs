//! HTTP layer tests, driving the mounted axum router request by request.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::form::{FormData, FromFormData, UploadedFile};
use crate::integrations::axum::NDJSON_CONTENT_TYPE;
use crate::router::RouterBuilder;
use crate::stream::{StatusEvent, StreamEmitter};
use crate::validation::{FieldError, Validate, ValidationResult};
use crate::{Context, FileDownload, ProcedureBuilder, RpcResult};

// =============================================================================
// Fixture app
// =============================================================================

#[derive(Debug, Deserialize)]
struct SendMessage {
    username: String,
    text: String,
}

impl Validate for SendMessage {
    fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();
        if self.username.is_empty() {
            errors.push(FieldError::required("username"));
        }
        if self.text.is_empty() {
            errors.push(FieldError::required("text"));
        }
        ValidationResult::from_errors(errors)
    }
}

#[derive(Debug, Deserialize)]
struct Greet {
    name: String,
}

impl Validate for Greet {
    fn validate(&self) -> ValidationResult {
        ValidationResult::ok()
    }
}

#[derive(Debug)]
struct Upload {
    file: UploadedFile,
}

impl FromFormData for Upload {
    fn from_form(form: FormData) -> Result<Self, ValidationResult> {
        match form.require_file("file") {
            Ok(file) => Ok(Self { file: file.clone() }),
            Err(e) => Err(ValidationResult::from_errors(vec![e])),
        }
    }
}

impl Validate for Upload {
    fn validate(&self) -> ValidationResult {
        ValidationResult::ok()
    }
}

async fn index(_ctx: Context<()>, _input: (), _stream: StreamEmitter) -> RpcResult<&'static str> {
    Ok("Hello from brpc")
}

async fn greet(_ctx: Context<()>, input: Greet, _stream: StreamEmitter) -> RpcResult<String> {
    Ok(format!("Hello, {}!", input.name))
}

async fn send_message(
    _ctx: Context<()>,
    input: SendMessage,
    stream: StreamEmitter,
) -> RpcResult<Value> {
    stream.emit(StatusEvent::new("messageSent")).await?;
    Ok(json!({ "id": 1, "username": input.username, "text": input.text }))
}

async fn avatar(_ctx: Context<()>) -> RpcResult<FileDownload> {
    Ok(FileDownload::new("avatar.png", &b"PNG_DATA"[..]))
}

async fn upload(_ctx: Context<()>, input: Upload, _stream: StreamEmitter) -> RpcResult<Value> {
    Ok(json!({ "size": input.file.len() }))
}

fn app() -> axum::Router {
    RouterBuilder::new()
        .route("index", ProcedureBuilder::new().query(index))
        .route("greet", ProcedureBuilder::new().input::<Greet>().query(greet))
        .route(
            "sendMessage",
            ProcedureBuilder::new()
                .input::<SendMessage>()
                .mutation(send_message),
        )
        .route("avatar", ProcedureBuilder::new().file(avatar))
        .route(
            "upload",
            ProcedureBuilder::new().input::<Upload>().form_mutation(upload),
        )
        .build()
        .unwrap()
        .into_axum()
}

async fn read_body(response: axum::response::Response) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&read_body(response).await).unwrap()
}

// =============================================================================
// Plain envelopes
// =============================================================================

#[tokio::test]
async fn get_root_serves_the_index_query() {
    let response = app()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({ "data": "Hello from brpc" }));
}

#[tokio::test]
async fn get_named_route_serves_the_same_query() {
    let response = app()
        .oneshot(Request::builder().uri("/index").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({ "data": "Hello from brpc" }));
}

#[tokio::test]
async fn get_passes_query_string_input() {
    // input = {"name":"World"} percent-encoded
    let uri = "/greet?input=%7B%22name%22%3A%22World%22%7D";
    let response = app()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({ "data": "Hello, World!" }));
}

#[tokio::test]
async fn unknown_route_is_a_not_found_envelope() {
    let response = app()
        .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await;
    assert_eq!(body["error"]["kind"], "PROCEDURE_NOT_FOUND");
}

#[tokio::test]
async fn posting_to_a_query_is_method_not_allowed() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/index")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = read_json(response).await;
    assert_eq!(body["error"]["kind"], "METHOD_NOT_ALLOWED");
}

#[tokio::test]
async fn invalid_json_body_is_a_validation_error() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sendMessage")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"]["kind"], "VALIDATION_ERROR");
}

// =============================================================================
// Streaming responses
// =============================================================================

#[tokio::test]
async fn emitting_mutation_streams_ndjson_frames_in_order() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sendMessage")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"username":"a","text":"hi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        NDJSON_CONTENT_TYPE
    );

    let body = read_body(response).await;
    let lines: Vec<Value> = std::str::from_utf8(&body)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], json!({ "event": "messageSent" }));
    assert_eq!(
        lines[1],
        json!({ "data": { "id": 1, "username": "a", "text": "hi" } })
    );
}

#[tokio::test]
async fn non_emitting_query_stays_a_plain_envelope() {
    let response = app()
        .oneshot(Request::builder().uri("/index").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("application/json"));
}

// =============================================================================
// Files
// =============================================================================

#[tokio::test]
async fn file_route_serves_bytes_with_inferred_content_type() {
    let response = app()
        .oneshot(Request::builder().uri("/avatar").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "inline; filename=\"avatar.png\""
    );
    assert_eq!(&read_body(response).await[..], b"PNG_DATA");
}

// =============================================================================
// Multipart
// =============================================================================

#[tokio::test]
async fn multipart_post_dispatches_the_form_mutation() {
    let boundary = "----brpc-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"doc.txt\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: text/plain\r\n\r\n");
    body.extend_from_slice(b"hello world");
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({ "data": { "size": 11 } }));
}

// =============================================================================
// Prefixes
// =============================================================================

#[tokio::test]
async fn prefix_moves_the_surface_without_changing_route_identity() {
    let app = RouterBuilder::new()
        .route("index", ProcedureBuilder::new().query(index))
        .prefix("/rpc")
        .build()
        .unwrap()
        .into_axum();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/rpc/index").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/rpc").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Outside the prefix nothing is mounted.
    let response = app
        .oneshot(Request::builder().uri("/index").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
