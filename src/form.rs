//! Multipart form decoding for form-mutation procedures.
//!
//! A `multipart/form-data` body is decoded into a [`FormData`] map before
//! validation: non-file fields become strings, file fields become
//! [`UploadedFile`] descriptors carrying the bytes. Engine-level size
//! limits are enforced while the body is decoded — the per-field cap is
//! checked chunk by chunk, not after buffering — so an adversarial upload
//! is rejected as early as possible. Schema-level rules (accepted MIME
//! categories, per-field maximums) belong in the input type's `Validate`
//! impl and produce field-scoped errors.

use crate::validation::{FieldError, ValidationResult};
use crate::{RpcError, RpcResult};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;

/// Default maximum total body size for multipart (50 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 50 * 1024 * 1024;

/// Default maximum size per field (10 MB).
pub const DEFAULT_MAX_FIELD_SIZE: usize = 10 * 1024 * 1024;

/// Limits applied while decoding a multipart body.
#[derive(Debug, Clone)]
pub struct FormLimits {
    /// Maximum total body size in bytes.
    pub max_body_size: usize,
    /// Maximum size per field in bytes.
    pub max_field_size: usize,
    /// Maximum number of fields allowed.
    pub max_fields: usize,
}

impl Default for FormLimits {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_field_size: DEFAULT_MAX_FIELD_SIZE,
            max_fields: 100,
        }
    }
}

impl FormLimits {
    /// Create limits with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum body size.
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Set the maximum per-field size.
    pub fn max_field_size(mut self, size: usize) -> Self {
        self.max_field_size = size;
        self
    }

    /// Set the maximum number of fields.
    pub fn max_fields(mut self, count: usize) -> Self {
        self.max_fields = count;
        self
    }
}

/// A file uploaded via a multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// The original file name from the client.
    pub file_name: Option<String>,
    /// The MIME type declared for the part.
    pub content_type: Option<String>,
    /// The file content.
    pub data: Bytes,
}

impl UploadedFile {
    /// Create a descriptor from its parts.
    pub fn new(
        file_name: Option<String>,
        content_type: Option<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name,
            content_type,
            data: data.into(),
        }
    }

    /// File size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the file is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File extension from the client file name.
    pub fn extension(&self) -> Option<&str> {
        self.file_name
            .as_ref()
            .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext))
    }

    /// Schema rule: the file's MIME type must match one of `allowed`
    /// (prefix match, so `"image/"` accepts any image type).
    pub fn check_mime(&self, field: &str, allowed: &[&str]) -> Result<(), FieldError> {
        match &self.content_type {
            Some(ct) if allowed.iter().any(|a| ct.starts_with(a)) => Ok(()),
            _ => Err(FieldError::mime(field, allowed)),
        }
    }

    /// Schema rule: the file must not exceed `max_bytes`.
    pub fn check_size(&self, field: &str, max_bytes: usize) -> Result<(), FieldError> {
        if self.data.len() > max_bytes {
            Err(FieldError::too_large(field, max_bytes))
        } else {
            Ok(())
        }
    }

    /// JSON descriptor of the file (name, type, size) without the bytes.
    pub fn descriptor(&self) -> serde_json::Value {
        serde_json::json!({
            "fileName": self.file_name,
            "mimeType": self.content_type,
            "size": self.data.len(),
        })
    }
}

/// Decoded multipart body: string fields plus file descriptors.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
}

impl FormData {
    /// Create an empty form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a string field.
    pub fn insert_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Insert a file field.
    pub fn insert_file(&mut self, name: impl Into<String>, file: UploadedFile) {
        self.files.insert(name.into(), file);
    }

    /// Get a string field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Get a file field.
    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name)
    }

    /// Get a string field or a field-scoped "required" error.
    pub fn require_field(&self, name: &str) -> Result<&str, FieldError> {
        self.field(name).ok_or_else(|| FieldError::required(name))
    }

    /// Get a file field or a field-scoped "required" error.
    pub fn require_file(&self, name: &str) -> Result<&UploadedFile, FieldError> {
        self.file(name).ok_or_else(|| FieldError::required(name))
    }

    /// Names of the string fields.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Names of the file fields.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

/// Conversion from a decoded form into a typed input.
///
/// The form-mutation analogue of deserialization: failures are reported as
/// field-scoped validation errors, not parse failures.
pub trait FromFormData: Sized {
    /// Build the input from the decoded form.
    fn from_form(form: FormData) -> Result<Self, ValidationResult>;
}

impl FromFormData for FormData {
    fn from_form(form: FormData) -> Result<Self, ValidationResult> {
        Ok(form)
    }
}

/// Decode a multipart body into a [`FormData`].
///
/// `content_type` is the request's full `Content-Type` header value; the
/// boundary is parsed from it. The total-size limit is checked up front,
/// the per-field limit while each part is read.
pub async fn decode(content_type: &str, body: Bytes, limits: &FormLimits) -> RpcResult<FormData> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|_| RpcError::bad_request("missing or invalid multipart boundary"))?;

    if body.len() > limits.max_body_size {
        return Err(RpcError::payload_too_large(format!(
            "multipart body exceeds {} bytes",
            limits.max_body_size
        )));
    }

    let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);
    let mut form = FormData::new();
    let mut count = 0usize;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| RpcError::bad_request(format!("multipart parse error: {}", e)))?
    {
        count += 1;
        if count > limits.max_fields {
            return Err(RpcError::bad_request(format!(
                "too many multipart fields (max {})",
                limits.max_fields
            )));
        }

        let name = field.name().unwrap_or_default().to_owned();
        let file_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(ToString::to_string);

        let mut buf = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| RpcError::bad_request(format!("multipart read error: {}", e)))?
        {
            if buf.len() + chunk.len() > limits.max_field_size {
                return Err(RpcError::payload_too_large(format!(
                    "field '{}' exceeds {} bytes",
                    name, limits.max_field_size
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        if file_name.is_some() {
            form.insert_file(name, UploadedFile::new(file_name, content_type, buf.freeze()));
        } else {
            let value = String::from_utf8(buf.to_vec()).map_err(|_| {
                RpcError::bad_request(format!("field '{}' is not valid UTF-8", name))
            })?;
            form.insert_field(name, value);
        }
    }

    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multipart_body(boundary: &str, parts: &[(&str, &str, Option<&str>, &[u8])]) -> Bytes {
        let mut body = Vec::new();
        for (name, content_type, filename, data) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            if let Some(fname) = filename {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{fname}\"\r\n"
                    )
                    .as_bytes(),
                );
            } else {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n").as_bytes(),
                );
            }
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        Bytes::from(body)
    }

    fn content_type(boundary: &str) -> String {
        format!("multipart/form-data; boundary={boundary}")
    }

    #[tokio::test]
    async fn decodes_fields_and_files() {
        let boundary = "----boundary";
        let body = multipart_body(
            boundary,
            &[
                ("username", "text/plain", None, b"alice"),
                ("avatar", "image/png", Some("avatar.png"), b"PNG_DATA"),
            ],
        );

        let form = decode(&content_type(boundary), body, &FormLimits::default())
            .await
            .unwrap();

        assert_eq!(form.field("username"), Some("alice"));
        let avatar = form.file("avatar").unwrap();
        assert_eq!(avatar.file_name.as_deref(), Some("avatar.png"));
        assert_eq!(avatar.content_type.as_deref(), Some("image/png"));
        assert_eq!(&avatar.data[..], b"PNG_DATA");
    }

    #[tokio::test]
    async fn rejects_missing_boundary() {
        let result = decode("multipart/form-data", Bytes::new(), &FormLimits::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_oversized_body_up_front() {
        let boundary = "----boundary";
        let limits = FormLimits::new().max_body_size(8);
        let err = decode(
            &content_type(boundary),
            Bytes::from(vec![0u8; 64]),
            &limits,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, crate::RpcErrorKind::PayloadTooLarge);
    }

    #[tokio::test]
    async fn rejects_oversized_field_during_decode() {
        let boundary = "----boundary";
        let big = vec![b'x'; 64];
        let body = multipart_body(boundary, &[("file", "text/plain", Some("big.txt"), &big)]);
        let limits = FormLimits::new().max_field_size(16);

        let err = decode(&content_type(boundary), body, &limits)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::RpcErrorKind::PayloadTooLarge);
        assert!(err.message.contains("file"));
    }

    #[tokio::test]
    async fn rejects_too_many_fields() {
        let boundary = "----boundary";
        let body = multipart_body(
            boundary,
            &[
                ("a", "text/plain", None, b"1"),
                ("b", "text/plain", None, b"2"),
                ("c", "text/plain", None, b"3"),
            ],
        );
        let limits = FormLimits::new().max_fields(2);

        assert!(decode(&content_type(boundary), body, &limits).await.is_err());
    }

    #[test]
    fn mime_rule_matches_prefix() {
        let file = UploadedFile::new(
            Some("photo.png".into()),
            Some("image/png".into()),
            &b"data"[..],
        );
        assert!(file.check_mime("photo", &["image/"]).is_ok());
        assert!(file.check_mime("photo", &["image/png"]).is_ok());
        assert!(file.check_mime("photo", &["text/"]).is_err());
    }

    #[test]
    fn size_rule_is_field_scoped() {
        let file = UploadedFile::new(None, None, &b"12345"[..]);
        assert!(file.check_size("doc", 5).is_ok());
        let err = file.check_size("doc", 4).unwrap_err();
        assert_eq!(err.field, "doc");
    }

    #[test]
    fn extension_from_file_name() {
        let file = UploadedFile::new(Some("report.pdf".into()), None, Bytes::new());
        assert_eq!(file.extension(), Some("pdf"));
        let bare = UploadedFile::new(Some("README".into()), None, Bytes::new());
        assert_eq!(bare.extension(), None);
    }
}
