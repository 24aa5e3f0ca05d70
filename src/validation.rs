//! Input validation seam.
//!
//! The engine treats schemas as a black-box capability: an input type
//! declares its rules by implementing [`Validate`], and the dispatch layer
//! calls `validate` after deserialization and before the handler runs. A
//! failed check produces field-scoped [`FieldError`]s, never a generic
//! parse failure.
//!
//! # Example
//! ```rust,ignore
//! #[derive(Deserialize)]
//! struct CreateUser {
//!     name: String,
//!     age: i64,
//! }
//!
//! impl Validate for CreateUser {
//!     fn validate(&self) -> ValidationResult {
//!         let mut errors = Vec::new();
//!         if self.name.is_empty() {
//!             errors.push(FieldError::required("name"));
//!         }
//!         if !(0..=150).contains(&self.age) {
//!             errors.push(FieldError::range("age", 0, 150));
//!         }
//!         ValidationResult::from_errors(errors)
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};

/// A single field-scoped validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// The offending field, as named in the input.
    pub field: String,
    /// What went wrong.
    pub message: String,
}

impl FieldError {
    /// Create a field error with a custom message.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// The field is required but missing or empty.
    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("'{}' is required", field);
        Self { field, message }
    }

    /// The field's value is outside the accepted range.
    pub fn range(field: impl Into<String>, min: i64, max: i64) -> Self {
        let field = field.into();
        let message = format!("'{}' must be between {} and {}", field, min, max);
        Self { field, message }
    }

    /// The field's payload exceeds the accepted size.
    pub fn too_large(field: impl Into<String>, max_bytes: usize) -> Self {
        let field = field.into();
        let message = format!("'{}' exceeds {} bytes", field, max_bytes);
        Self { field, message }
    }

    /// The field's MIME type is not in the accepted set.
    pub fn mime(field: impl Into<String>, allowed: &[&str]) -> Self {
        let field = field.into();
        let message = format!("'{}' must be one of: {}", field, allowed.join(", "));
        Self { field, message }
    }
}

/// Outcome of running a schema check: either valid, or a list of
/// field-scoped errors. Never both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Accumulated field errors; empty means the input is valid.
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    /// A passing result.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Build a result from accumulated errors.
    pub fn from_errors(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    /// True when no field failed.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record an additional field error.
    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Fold another result's errors into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }
}

/// Schema capability implemented by procedure input types.
///
/// `validate` runs after deserialization and before the handler; a handler
/// never observes input that failed this check.
pub trait Validate {
    /// Check the already-deserialized value against its declared rules.
    fn validate(&self) -> ValidationResult;
}

impl Validate for () {
    fn validate(&self) -> ValidationResult {
        ValidationResult::ok()
    }
}

impl Validate for serde_json::Value {
    fn validate(&self) -> ValidationResult {
        ValidationResult::ok()
    }
}
