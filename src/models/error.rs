//! Decode and validation error types for kafka-persist models
//!
//! These errors describe why a single record was rejected. They never stop a
//! worker; the worker logs them and moves on to the next record.

use std::fmt;
use thiserror::Error;

/// Validation error for a single field of a decoded message
#[derive(Error, Debug, Clone)]
pub struct ValidationError {
    /// The kind of validation error
    pub kind: ValidationErrorKind,
    /// The field that failed validation
    pub field: String,
    /// Optional additional context
    pub context: Option<String>,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(kind: ValidationErrorKind, field: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            context: None,
        }
    }

    /// Create a validation error with additional context
    pub fn with_context(
        kind: ValidationErrorKind,
        field: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            field: field.into(),
            context: Some(context.into()),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(
                f,
                "Validation failed for field '{}': {} - {}",
                self.field, self.kind, ctx
            ),
            None => write!(
                f,
                "Validation failed for field '{}': {}",
                self.field, self.kind
            ),
        }
    }
}

/// Specific validation error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Field is required but missing or blank
    #[error("Required field is missing")]
    RequiredField,

    /// Field value is too long
    #[error("Value exceeds maximum length")]
    TooLong { max: usize },

    /// Custom validation error
    #[error("{0}")]
    Custom(String),
}

/// Convert errors reported by the `validator` derive
///
/// Only the first failing field is kept; a message has a single checked
/// field.
impl From<validator::ValidationErrors> for ValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        let Some((field, first)) = field_errors
            .iter()
            .find_map(|(name, errs)| errs.first().map(|e| (name.to_string(), e)))
        else {
            return ValidationError::with_context(
                ValidationErrorKind::Custom("field constraint violated".to_string()),
                "message",
                errors.to_string(),
            );
        };

        let kind = match &*first.code {
            "required" => ValidationErrorKind::RequiredField,
            "too_long" => ValidationErrorKind::TooLong {
                max: first
                    .params
                    .get("max")
                    .and_then(|max| max.as_u64())
                    .unwrap_or_default() as usize,
            },
            other => ValidationErrorKind::Custom(other.to_string()),
        };

        match &first.message {
            Some(message) => ValidationError::with_context(kind, field, message.to_string()),
            None => ValidationError::new(kind, field),
        }
    }
}

/// Why a record payload could not be turned into a message
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload is not valid UTF-8
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Payload is not a JSON message object
    #[error("payload is not a valid message: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload parsed but a field failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Result type alias for decode operations
pub type DecodeResult<T> = Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let error = ValidationError::new(ValidationErrorKind::RequiredField, "content");
        let display = error.to_string();
        assert!(display.contains("content"));
        assert!(display.contains("Required field"));
    }

    #[test]
    fn test_validation_error_with_context() {
        let error = ValidationError::with_context(
            ValidationErrorKind::TooLong { max: 10 },
            "content",
            "got 11 bytes",
        );
        assert_eq!(error.context.as_deref(), Some("got 11 bytes"));
        assert!(error.to_string().ends_with("got 11 bytes"));
    }

    #[test]
    fn test_from_validator_errors_maps_codes() {
        let mut errors = validator::ValidationErrors::new();
        let mut too_long = validator::ValidationError::new("too_long");
        too_long.message = Some("got 12 bytes".into());
        too_long.add_param("max".into(), &10);
        errors.add("content", too_long);

        let error = ValidationError::from(errors);
        assert_eq!(error.kind, ValidationErrorKind::TooLong { max: 10 });
        assert_eq!(error.field, "content");
        assert_eq!(error.context.as_deref(), Some("got 12 bytes"));

        let mut errors = validator::ValidationErrors::new();
        errors.add("content", validator::ValidationError::new("required"));
        let error = ValidationError::from(errors);
        assert_eq!(error.kind, ValidationErrorKind::RequiredField);
        assert!(error.context.is_none());
    }
}
