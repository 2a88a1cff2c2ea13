//! # Error Types
//!
//! Fallible public operations return `eyre::Result`. The failures a caller may
//! need to tell apart are typed here and travel inside the report, so callers
//! match with `report.downcast_ref::<SchemaError>()` and friends.
//!
//! | Error | Raised by | Fatal |
//! |-------|-----------|-------|
//! | `SchemaError` | schema compile, payload walk, query compile | yes |
//! | `ModifyError` | field validation | no, collected per record |
//! | `CodecError` | mutation batching | yes |
//! | `DecodeError` | result decoding | yes, for that decode call only |

use thiserror::Error;

use crate::types::{TypeTag, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A type name that the installed schema does not define.
    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("unknown type id {0}")]
    UnknownTypeId(u16),

    /// A payload key, query field or include path that the type does not define.
    #[error("unknown field '{field}' on type '{type_name}'")]
    UnknownField { type_name: String, field: String },

    #[error("field '{field}' on type '{type_name}' is not a reference")]
    NotAReference { type_name: String, field: String },

    #[error("field '{field}' cannot be declared with type {kind}")]
    UnsupportedKind { field: String, kind: TypeTag },

    /// The type allocated every field number it may ever use.
    #[error("type '{0}' has no field numbers left")]
    FieldSpaceExhausted(String),

    #[error("invalid definition for '{path}': {reason}")]
    InvalidDefinition { path: String, reason: String },

    #[error("field '{0}' has no sort index")]
    NotSortable(String),

    #[error("field '{0}' is not numeric")]
    NotNumeric(String),

    #[error("unknown locale '{0}'")]
    UnknownLocale(String),

    #[error("type '{0}' is defined twice")]
    DuplicateType(String),

    #[error("invalid filter on '{field}': {reason}")]
    InvalidFilter { field: String, reason: String },
}

/// A value rejected by a field's validation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid value for {type_name}.{field}: {reason}")]
pub struct ModifyError {
    pub type_name: String,
    pub field: String,
    pub value: Value,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A single record does not fit the largest mutation buffer allowed.
    #[error("record needs at least {needed} bytes but the mutation buffer is capped at {max}")]
    OutOfSpace { needed: usize, max: usize },

    #[error("no schema installed")]
    NoSchema,
}

/// Result bytes that disagree with the reader schema used to read them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("result truncated at offset {offset}: need {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("unexpected item marker {marker} at offset {offset}")]
    UnexpectedMarker { offset: usize, marker: u8 },

    #[error("field {field} is not part of the reader schema")]
    UnknownField { field: String },

    #[error("checksum mismatch in field '{field}'")]
    Checksum { field: String },

    #[error("invalid payload for '{field}': {reason}")]
    InvalidPayload { field: String, reason: &'static str },

    #[error("record index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_survive_eyre_reports() {
        let report = eyre::Report::new(SchemaError::UnknownType("user".into()));
        assert_eq!(
            report.downcast_ref::<SchemaError>(),
            Some(&SchemaError::UnknownType("user".into()))
        );
        assert_eq!(report.to_string(), "unknown type 'user'");
    }

    #[test]
    fn modify_error_names_type_and_field() {
        let err = ModifyError {
            type_name: "user".into(),
            field: "status".into(),
            value: Value::from("gone"),
            reason: "not an enum value".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for user.status: not an enum value"
        );
    }
}
