//! Error types for the data-model runtime.
//!
//! This module defines the error taxonomy shared by the schema registry, the
//! record model, the batching engine, the device conversion engine, the table
//! codec, and the markup parsers, along with utility constructors for creating
//! errors with appropriate context.

use thiserror::Error;

use crate::core::device::Device;

/// A single field-level validation failure.
///
/// Validation collects one of these per offending field so that callers see
/// every problem at once instead of only the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    /// The name of the field that failed validation.
    pub field: String,
    /// A human-readable reason for the failure.
    pub reason: String,
}

impl std::fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Enum representing the errors that can occur in the data-model runtime.
#[derive(Error, Debug)]
pub enum DataError {
    /// A field was re-registered with an incompatible kind, or a registered
    /// type was redefined. Registry misuse; aborts the registration.
    #[error("schema conflict for type '{type_name}': {reason}")]
    SchemaConflict {
        /// The record type whose registration conflicted.
        type_name: String,
        /// A description of the conflict.
        reason: String,
    },

    /// One or more record fields failed validation. Recoverable; the caller
    /// may retry with corrected data. All failing fields are reported.
    #[error("validation failed for {} field(s): {}", failures.len(), format_failures(failures))]
    Validation {
        /// Every field-level failure found during validation.
        failures: Vec<FieldFailure>,
    },

    /// Records of mixed field kinds were passed to the batching engine.
    /// Caller bug; fatal for that call.
    #[error("heterogeneous batch: {message}")]
    BatchHeterogeneity {
        /// A description of the kind mismatch.
        message: String,
    },

    /// The requested compute device is not available in the active runtime.
    /// Recoverable by falling back to another device.
    #[error("device '{device}' is not available")]
    DeviceUnavailable {
        /// The device that was requested.
        device: Device,
    },

    /// A table row's encoded field set disagrees with the expected schema.
    /// Indicates a stale schema or corrupted storage; never silently coerced.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// A description of the disagreement.
        message: String,
    },

    /// The markup document is structurally invalid (unbalanced or
    /// unparseable). Fatal for that document only.
    #[error("markup parse error at byte {location}: {message}")]
    MarkupParse {
        /// Byte offset into the input where parsing failed.
        location: u64,
        /// A description of the structural problem.
        message: String,
    },

    /// Error indicating invalid input to an operation.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },
}

fn format_failures(failures: &[FieldFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenient result alias for data-model operations.
pub type DataResult<T> = Result<T, DataError>;

impl DataError {
    /// Creates a schema conflict error for a record type.
    pub fn schema_conflict(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaConflict {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a validation error from the collected field failures.
    pub fn validation(failures: Vec<FieldFailure>) -> Self {
        Self::Validation { failures }
    }

    /// Creates a batch heterogeneity error with context.
    pub fn batch_heterogeneity(message: impl Into<String>) -> Self {
        Self::BatchHeterogeneity {
            message: message.into(),
        }
    }

    /// Creates a schema mismatch error with context.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Creates a markup parse error at the given byte offset.
    pub fn markup_parse(location: u64, message: impl Into<String>) -> Self {
        Self::MarkupParse {
            location,
            message: message.into(),
        }
    }

    /// Creates an invalid input error with a message.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_reports_every_failure() {
        let err = DataError::validation(vec![
            FieldFailure {
                field: "image".into(),
                reason: "expected tensor".into(),
            },
            FieldFailure {
                field: "label".into(),
                reason: "missing".into(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("2 field(s)"));
        assert!(text.contains("image: expected tensor"));
        assert!(text.contains("label: missing"));
    }

    #[test]
    fn markup_parse_error_carries_location() {
        let err = DataError::markup_parse(42, "unbalanced element");
        assert!(err.to_string().contains("byte 42"));
    }
}
