//! Vector and columnar-vector codecs.
//!
//! Elements are stored little-endian in the declared base type. Inputs with a
//! different base are cast, and inputs longer than the declared size are
//! truncated. Small vectors sit in the main region zero-padded to their full
//! width; the rest (and every colvec) travel as `len:u32 elements`.

use bumpalo::Bump;

use super::{delete_field, invalid_payload, type_mismatch, write_payload, FieldCodec};
use crate::decode::ReadField;
use crate::error::DecodeError;
use crate::modify::{FieldError, ModifyCtx};
use crate::schema::{FieldDescriptor, VectorSpec};
use crate::types::{TypeTag, TypedVector, Value};

/// Coerces a vector-ish value into the declared base type.
pub(crate) fn coerce(spec: VectorSpec, value: &Value) -> Option<TypedVector> {
    match value {
        Value::Vector(v) => Some(v.cast(spec.base)),
        Value::List(items) => TypedVector::from_values(spec.base, items),
        Value::Binary(bytes) => TypedVector::from_le_bytes(spec.base, bytes),
        _ => None,
    }
}

fn spec_of(desc: &FieldDescriptor) -> Result<VectorSpec, FieldError> {
    desc.vector
        .ok_or_else(|| FieldError::Invalid(format!("{} has no vector shape", desc.name)))
}

fn validate_vector(desc: &FieldDescriptor, value: &Value) -> Result<(), String> {
    if value.is_null() {
        return Ok(());
    }
    let Some(spec) = desc.vector else {
        return Err(format!("{} has no vector shape", desc.name));
    };
    coerce(spec, value)
        .map(drop)
        .ok_or_else(|| type_mismatch("a numeric vector", value))
}

fn read_elements(field: &ReadField, bytes: &[u8]) -> Result<Value, DecodeError> {
    let spec = field
        .vector
        .ok_or_else(|| invalid_payload(field, "field has no vector shape"))?;
    TypedVector::from_le_bytes(spec.base, bytes)
        .map(Value::Vector)
        .ok_or_else(|| invalid_payload(field, "vector bytes are not a multiple of the element width"))
}

fn decode_vector(field: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    read_elements(field, bytes)
}

// ----------------------------------------------------------------------------
// main-region vector
// ----------------------------------------------------------------------------

fn fill_main_vector(desc: &FieldDescriptor, value: &Value, slot: &mut [u8]) {
    slot.fill(0);
    let Some(vector) = desc.vector.and_then(|spec| coerce(spec, value)) else {
        return;
    };
    let limit = slot.len() / vector.base().width();
    let mut bytes = Vec::with_capacity(slot.len());
    vector.write_le(limit, &mut bytes);
    slot[..bytes.len()].copy_from_slice(&bytes);
}

/// Zeroes of the declared size, for main and separate vectors alike.
fn empty_vector(field: &ReadField) -> Value {
    match field.vector {
        Some(spec) => Value::Vector(TypedVector::zeroed(spec.base, spec.size as usize)),
        None => Value::Null,
    }
}

pub static MAIN_VECTOR: FieldCodec = FieldCodec {
    tag: TypeTag::Vector,
    separate: false,
    encode: super::fixed::encode_in_place,
    validate: validate_vector,
    fill_main: fill_main_vector,
    decode: decode_vector,
    empty: empty_vector,
};

// ----------------------------------------------------------------------------
// separate vector, colvec
// ----------------------------------------------------------------------------

fn encode_vector(ctx: &mut ModifyCtx, desc: &FieldDescriptor, value: &Value) -> Result<(), FieldError> {
    let spec = spec_of(desc)?;
    if value.is_null() {
        return delete_field(ctx, desc);
    }
    let vector = coerce(spec, value)
        .ok_or_else(|| FieldError::Invalid(type_mismatch("a numeric vector", value)))?;
    if vector.is_empty() {
        return delete_field(ctx, desc);
    }
    let mut body = Vec::with_capacity(vector.encoded_len(spec.size as usize));
    vector.write_le(spec.size as usize, &mut body);
    write_payload(ctx, desc, &body)
}

pub static VECTOR: FieldCodec = FieldCodec {
    tag: TypeTag::Vector,
    separate: true,
    encode: encode_vector,
    validate: validate_vector,
    fill_main: super::no_fill,
    decode: decode_vector,
    empty: empty_vector,
};

pub static COLVEC: FieldCodec = FieldCodec {
    tag: TypeTag::Colvec,
    separate: true,
    encode: encode_vector,
    validate: validate_vector,
    fill_main: super::no_fill,
    decode: decode_vector,
    empty: empty_vector,
};
