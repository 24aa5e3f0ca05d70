//! Property-based tests for input validation: route keys, schema checks,
//! and form-field rules.

use proptest::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::form::{FormData, FromFormData, UploadedFile};
use crate::router::{CallRequest, RouterBuilder};
use crate::stream::status_channel;
use crate::validation::{FieldError, Validate, ValidationResult};
use crate::{Context, ProcedureBuilder, RpcErrorKind, RpcResult};

fn empty_query() -> crate::Procedure<()> {
    ProcedureBuilder::new().query(|_ctx: Context<()>, _input: (), _stream| async { Ok("ok") })
}

fn build_with_key(key: &str) -> RpcResult<crate::Router<()>> {
    RouterBuilder::new().route(key, empty_query()).build()
}

// =============================================================================
// Route key validation
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Valid slash-separated keys build successfully.
    #[test]
    fn prop_valid_keys_accepted(
        segments in prop::collection::vec("[a-zA-Z][a-zA-Z0-9_-]{0,10}", 1..4)
    ) {
        let key = segments.join("/");
        prop_assert!(build_with_key(&key).is_ok(), "key '{}' should be accepted", key);
    }

    /// Parameter segments are accepted anywhere in the key.
    #[test]
    fn prop_param_segments_accepted(
        literal in "[a-z][a-z0-9]{0,8}",
        param in "[a-zA-Z][a-zA-Z0-9_]{0,8}"
    ) {
        let key = format!("{}/:{}", literal, param);
        prop_assert!(build_with_key(&key).is_ok(), "key '{}' should be accepted", key);
    }

    /// Keys with characters outside the segment alphabet are rejected.
    #[test]
    fn prop_invalid_char_keys_rejected(
        prefix in "[a-z]{1,5}",
        invalid_char in "[^a-zA-Z0-9_/:-]",
        suffix in "[a-z]{1,5}"
    ) {
        let key = format!("{}{}{}", prefix, invalid_char, suffix);
        let result = build_with_key(&key);
        prop_assert!(result.is_err(), "key '{}' should be rejected", key);
    }

    /// Empty segments (leading, trailing, or doubled slashes) are rejected.
    #[test]
    fn prop_empty_segments_rejected(name in "[a-z]{1,8}") {
        prop_assert!(build_with_key(&format!("/{}", name)).is_err());
        prop_assert!(build_with_key(&format!("{}/", name)).is_err());
        prop_assert!(build_with_key(&format!("{}//{}", name, name)).is_err());
    }
}

#[test]
fn empty_key_is_rejected() {
    assert!(build_with_key("").is_err());
}

#[test]
fn bare_or_malformed_params_are_rejected() {
    assert!(build_with_key(":").is_err());
    assert!(build_with_key("a/:1bad").is_err());
}

// =============================================================================
// Schema validation through dispatch
// =============================================================================

#[derive(Debug, Deserialize)]
struct Profile {
    name: String,
    age: i64,
}

impl Validate for Profile {
    fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();
        if self.name.is_empty() {
            errors.push(FieldError::required("name"));
        }
        if !(0..=150).contains(&self.age) {
            errors.push(FieldError::range("age", 0, 150));
        }
        ValidationResult::from_errors(errors)
    }
}

proptest! {
    /// For all inputs failing the schema, the response is a validation
    /// error carrying field detail and the handler never runs.
    #[test]
    fn prop_schema_failures_surface_fields(age in 151i64..10_000) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let router = RouterBuilder::new()
                .route(
                    "profile",
                    ProcedureBuilder::new().input::<Profile>().mutation(
                        |_ctx: Context<()>, input: Profile, _stream| async move { Ok(input.age) },
                    ),
                )
                .build()
                .unwrap();

            let (emitter, _rx) = status_channel(4);
            let err = router
                .call(
                    CallRequest::mutation("profile", json!({ "name": "", "age": age })),
                    emitter,
                )
                .await
                .unwrap_err();

            prop_assert_eq!(err.kind, RpcErrorKind::ValidationError);
            let fields = err.fields.unwrap();
            prop_assert_eq!(fields.len(), 2);
            prop_assert_eq!(fields[0].field.as_str(), "name");
            prop_assert_eq!(fields[1].field.as_str(), "age");
            Ok(())
        })?;
    }

    /// Valid inputs pass through untouched.
    #[test]
    fn prop_valid_inputs_reach_the_handler(age in 0i64..=150) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let router = RouterBuilder::new()
                .route(
                    "profile",
                    ProcedureBuilder::new().input::<Profile>().mutation(
                        |_ctx: Context<()>, input: Profile, _stream| async move { Ok(input.age) },
                    ),
                )
                .build()
                .unwrap();

            let (emitter, _rx) = status_channel(4);
            let value = router
                .call(
                    CallRequest::mutation("profile", json!({ "name": "a", "age": age })),
                    emitter,
                )
                .await
                .unwrap();
            prop_assert_eq!(value, json!(age));
            Ok(())
        })?;
    }
}

// =============================================================================
// Form input rules
// =============================================================================

/// Typed form input with file rules declared in the schema.
#[derive(Debug)]
struct AvatarUpload {
    username: String,
    avatar: UploadedFile,
}

impl FromFormData for AvatarUpload {
    fn from_form(form: FormData) -> Result<Self, ValidationResult> {
        let mut errors = Vec::new();
        let username = match form.require_field("username") {
            Ok(value) => value.to_string(),
            Err(e) => {
                errors.push(e);
                String::new()
            }
        };
        let avatar = match form.require_file("avatar") {
            Ok(file) => file.clone(),
            Err(e) => {
                errors.push(e);
                return Err(ValidationResult::from_errors(errors));
            }
        };
        if errors.is_empty() {
            Ok(Self { username, avatar })
        } else {
            Err(ValidationResult::from_errors(errors))
        }
    }
}

impl Validate for AvatarUpload {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::ok();
        if self.username.is_empty() {
            result.push(FieldError::required("username"));
        }
        if let Err(e) = self.avatar.check_mime("avatar", &["image/"]) {
            result.push(e);
        }
        if let Err(e) = self.avatar.check_size("avatar", 5 * 1024 * 1024) {
            result.push(e);
        }
        result
    }
}

fn avatar_router() -> crate::Router<()> {
    RouterBuilder::new()
        .route(
            "upload",
            ProcedureBuilder::new().input::<AvatarUpload>().form_mutation(
                |_ctx: Context<()>, input: AvatarUpload, _stream| async move {
                    Ok(json!({ "username": input.username, "size": input.avatar.len() }))
                },
            ),
        )
        .build()
        .unwrap()
}

fn avatar_form(content_type: &str, bytes: &[u8]) -> FormData {
    let mut form = FormData::new();
    form.insert_field("username", "alice");
    form.insert_file(
        "avatar",
        UploadedFile::new(
            Some("avatar.png".into()),
            Some(content_type.into()),
            bytes.to_vec(),
        ),
    );
    form
}

#[tokio::test]
async fn form_input_with_valid_file_passes() {
    let router = avatar_router();
    let (emitter, _rx) = status_channel(4);
    let value = router
        .call(
            CallRequest::form_mutation("upload", avatar_form("image/png", b"PNG")),
            emitter,
        )
        .await
        .unwrap();
    assert_eq!(value, json!({ "username": "alice", "size": 3 }));
}

#[tokio::test]
async fn mime_rule_produces_a_field_scoped_error() {
    let router = avatar_router();
    let (emitter, _rx) = status_channel(4);
    let err = router
        .call(
            CallRequest::form_mutation("upload", avatar_form("text/plain", b"nope")),
            emitter,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, RpcErrorKind::ValidationError);
    assert_eq!(err.fields.unwrap()[0].field, "avatar");
}

#[tokio::test]
async fn missing_form_fields_are_reported_by_name() {
    let router = avatar_router();
    let (emitter, _rx) = status_channel(4);
    let err = router
        .call(
            CallRequest::form_mutation("upload", FormData::new()),
            emitter,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, RpcErrorKind::ValidationError);
    let fields = err.fields.unwrap();
    assert!(fields.iter().any(|f| f.field == "username"));
    assert!(fields.iter().any(|f| f.field == "avatar"));
}

#[tokio::test]
async fn json_body_sent_to_a_form_mutation_is_rejected() {
    let router = avatar_router();
    let (emitter, _rx) = status_channel(4);
    let err = router
        .call(
            CallRequest {
                payload: crate::CallPayload::Json(Value::Null),
                ..CallRequest::form_mutation("upload", FormData::new())
            },
            emitter,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, RpcErrorKind::BadRequest);
}
