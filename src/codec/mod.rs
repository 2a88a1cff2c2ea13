//! # Field Codecs
//!
//! One [`FieldCodec`] per (type tag, placement) pair. The schema compiler binds
//! the matching codec to every `FieldDescriptor`, so neither the encoder nor
//! the decoder branches on the tag per value: they call through the function
//! pointers cached on the descriptor.
//!
//! | Codec | encode | decode input |
//! |-------|--------|--------------|
//! | fixed (numbers, bool, enum, micro-buffer) | in place in the main region | main slice |
//! | main string / main vector | in place, length byte or zero padding | main slice |
//! | string, alias, text | cursor + string payload | `locale flag [orig_len] data` |
//! | binary | cursor + `len data crc32` | `data crc32` |
//! | json | cursor + `len bytes` | bytes |
//! | vector, colvec | cursor + `len elements` | elements |
//! | cardinality | cursor + `len xxh64*` | `count:u32` |
//! | reference, references | cursor + reference payloads | nested records |

pub mod binary;
pub mod fixed;
pub mod reference;
pub mod string;
pub mod vector;

use std::fmt;

use bumpalo::Bump;

use crate::decode::ReadField;
use crate::error::DecodeError;
use crate::modify::{FieldError, ModifyCtx};
use crate::schema::FieldDescriptor;
use crate::types::{TypeTag, Value};

pub type EncodeFn = fn(&mut ModifyCtx, &FieldDescriptor, &Value) -> Result<(), FieldError>;
pub type ValidateFn = fn(&FieldDescriptor, &Value) -> Result<(), String>;
pub type FillFn = fn(&FieldDescriptor, &Value, &mut [u8]);
pub type DecodeFn = fn(&ReadField, &[u8], &Bump) -> Result<Value, DecodeError>;
pub type EmptyFn = fn(&ReadField) -> Value;

pub struct FieldCodec {
    pub tag: TypeTag,
    pub separate: bool,
    pub encode: EncodeFn,
    pub validate: ValidateFn,
    /// Writes a value into a main-region slot. No-op for separate codecs.
    pub fill_main: FillFn,
    pub decode: DecodeFn,
    /// Value of a field the record does not carry.
    pub empty: EmptyFn,
}

impl fmt::Debug for FieldCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCodec")
            .field("tag", &self.tag)
            .field("separate", &self.separate)
            .finish_non_exhaustive()
    }
}

pub fn codec_for(tag: TypeTag, separate: bool) -> &'static FieldCodec {
    match (tag, separate) {
        (TypeTag::Timestamp, _) => &fixed::TIMESTAMP,
        (TypeTag::Number, _) => &fixed::NUMBER,
        (TypeTag::Int8, _) => &fixed::INT8,
        (TypeTag::Uint8, _) => &fixed::UINT8,
        (TypeTag::Int16, _) => &fixed::INT16,
        (TypeTag::Uint16, _) => &fixed::UINT16,
        (TypeTag::Int32, _) => &fixed::INT32,
        (TypeTag::Uint32, _) => &fixed::UINT32,
        (TypeTag::Boolean, _) => &fixed::BOOLEAN,
        (TypeTag::Enum, _) => &fixed::ENUM,
        (TypeTag::MicroBuffer, _) => &fixed::MICRO_BUFFER,
        (TypeTag::String, false) => &string::MAIN_STRING,
        (TypeTag::String, true) => &string::STRING,
        (TypeTag::Alias, _) => &string::ALIAS,
        (TypeTag::Text, _) => &string::TEXT,
        (TypeTag::Binary, _) => &binary::BINARY,
        (TypeTag::Json, _) => &binary::JSON,
        (TypeTag::Cardinality, _) => &binary::CARDINALITY,
        (TypeTag::Vector, false) => &vector::MAIN_VECTOR,
        (TypeTag::Vector, true) => &vector::VECTOR,
        (TypeTag::Colvec, _) => &vector::COLVEC,
        (TypeTag::Reference, _) => &reference::REFERENCE,
        (TypeTag::References, _) => &reference::REFERENCES,
        (TypeTag::Null | TypeTag::Aliases | TypeTag::Object | TypeTag::Id, _) => &fixed::NULL,
    }
}

pub(crate) fn no_fill(_: &FieldDescriptor, _: &Value, _: &mut [u8]) {}

pub(crate) fn type_mismatch(expected: &str, value: &Value) -> String {
    format!("expected {expected}, got {}", value_kind(value))
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Int(_) => "integer",
        Value::Float(_) => "number",
        Value::Timestamp(_) => "timestamp",
        Value::String(_) => "string",
        Value::Binary(_) => "binary",
        Value::Vector(_) => "vector",
        Value::Json(_) => "json",
        Value::Text(_) => "text",
        Value::List(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Writes a `DELETE` for a separate field, or nothing while creating.
pub(crate) fn delete_field(ctx: &mut ModifyCtx, desc: &FieldDescriptor) -> Result<(), FieldError> {
    if ctx.is_create() {
        return Ok(());
    }
    ctx.begin_field(desc.number, desc.tag, crate::modify::ops::DELETE, 0)
}

/// Writes `op len:u32 body` for a length-prefixed separate payload.
pub(crate) fn write_payload(
    ctx: &mut ModifyCtx,
    desc: &FieldDescriptor,
    body: &[u8],
) -> Result<(), FieldError> {
    let op = ctx.write_op();
    ctx.begin_field(desc.number, desc.tag, op, 4 + body.len())?;
    ctx.put_u32(body.len() as u32);
    ctx.put_bytes(body);
    Ok(())
}

pub(crate) fn invalid_payload(field: &ReadField, reason: &'static str) -> DecodeError {
    DecodeError::InvalidPayload {
        field: field.name.clone(),
        reason,
    }
}
