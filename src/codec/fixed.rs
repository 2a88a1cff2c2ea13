//! Fixed-width main-region codecs.
//!
//! These fields are written in place at their offset: no cursor, no length.
//! A `null` value resets the slot to zero (enum: unset). Numeric fields also
//! accept `{"increment": n}` / `{"decrement": n}`, which become counter
//! operations on update and start from the default on create.

use bumpalo::Bump;

use super::{no_fill, type_mismatch, FieldCodec};
use crate::decode::ReadField;
use crate::error::DecodeError;
use crate::modify::{ops, FieldError, ModifyCtx};
use crate::schema::FieldDescriptor;
use crate::types::{TypeTag, Value};

/// Splits a counter operation into its op byte and delta.
pub(crate) fn counter(value: &Value) -> Option<(u8, &Value)> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    if let Some(delta) = map.get("increment") {
        return Some((ops::INCREMENT, delta));
    }
    map.get("decrement").map(|delta| (ops::DECREMENT, delta))
}

pub(crate) fn encode_in_place(
    ctx: &mut ModifyCtx,
    desc: &FieldDescriptor,
    value: &Value,
) -> Result<(), FieldError> {
    let slot = ctx.main_slot(desc.offset, desc.len);
    (desc.codec.fill_main)(desc, value, slot);
    Ok(())
}

fn encode_numeric(
    ctx: &mut ModifyCtx,
    desc: &FieldDescriptor,
    value: &Value,
) -> Result<(), FieldError> {
    let Some((op, delta)) = counter(value) else {
        return encode_in_place(ctx, desc, value);
    };
    if ctx.is_create() {
        let base = desc.default.as_ref().and_then(Value::as_f64).unwrap_or(0.0);
        let delta = delta.as_f64().unwrap_or(0.0);
        let start = if op == ops::INCREMENT {
            base + delta
        } else {
            base - delta
        };
        return encode_in_place(ctx, desc, &Value::Float(start));
    }
    let width = desc.len as usize;
    let mut bytes = [0u8; 8];
    (desc.codec.fill_main)(desc, delta, &mut bytes[..width]);
    ctx.stage_increment(op, desc.tag, desc.offset, &bytes[..width])
}

fn check_number(
    desc: &FieldDescriptor,
    value: &Value,
    lo: f64,
    hi: f64,
    integral: bool,
) -> Result<(), String> {
    let (target, is_counter) = match counter(value) {
        Some((_, delta)) => (delta, true),
        None => (value, false),
    };
    let n = match target {
        Value::Null if !is_counter => return Ok(()),
        Value::Int(_) | Value::Float(_) | Value::Timestamp(_) => target.as_f64().unwrap_or(0.0),
        other => return Err(type_mismatch("a number", other)),
    };
    if !n.is_finite() && integral {
        return Err("expected a finite number".into());
    }
    if integral && n.fract() != 0.0 {
        return Err(format!("{n} is not an integer"));
    }
    if n < lo || n > hi {
        return Err(format!("{n} is out of range for {}", desc.tag));
    }
    if !is_counter {
        if let Some(min) = desc.min.filter(|&min| n < min) {
            return Err(format!("{n} is below the minimum {min}"));
        }
        if let Some(max) = desc.max.filter(|&max| n > max) {
            return Err(format!("{n} is above the maximum {max}"));
        }
    }
    Ok(())
}

fn fixed_bytes<const N: usize>(field: &ReadField, bytes: &[u8]) -> Result<[u8; N], DecodeError> {
    bytes
        .try_into()
        .map_err(|_| super::invalid_payload(field, "main slot has the wrong width"))
}

macro_rules! int_codec {
    ($codec:ident, $tag:ident, $ty:ty, $fill:ident, $validate:ident, $decode:ident) => {
        fn $fill(_: &FieldDescriptor, value: &Value, slot: &mut [u8]) {
            let v = value.as_f64().map_or(0, |f| f as i64);
            let v = value.as_i64().unwrap_or(v);
            slot.copy_from_slice(&(v as $ty).to_le_bytes());
        }

        fn $validate(desc: &FieldDescriptor, value: &Value) -> Result<(), String> {
            check_number(desc, value, <$ty>::MIN as f64, <$ty>::MAX as f64, true)
        }

        fn $decode(field: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
            let raw = fixed_bytes::<{ std::mem::size_of::<$ty>() }>(field, bytes)?;
            Ok(Value::Int(<$ty>::from_le_bytes(raw) as i64))
        }

        pub static $codec: FieldCodec = FieldCodec {
            tag: TypeTag::$tag,
            separate: false,
            encode: encode_numeric,
            validate: $validate,
            fill_main: $fill,
            decode: $decode,
            empty: empty_int,
        };
    };
}

fn empty_int(_: &ReadField) -> Value {
    Value::Int(0)
}

int_codec!(INT8, Int8, i8, fill_i8, validate_i8, decode_i8);
int_codec!(UINT8, Uint8, u8, fill_u8, validate_u8, decode_u8);
int_codec!(INT16, Int16, i16, fill_i16, validate_i16, decode_i16);
int_codec!(UINT16, Uint16, u16, fill_u16, validate_u16, decode_u16);
int_codec!(INT32, Int32, i32, fill_i32, validate_i32, decode_i32);
int_codec!(UINT32, Uint32, u32, fill_u32, validate_u32, decode_u32);

// ----------------------------------------------------------------------------
// timestamp, number
// ----------------------------------------------------------------------------

fn fill_timestamp(_: &FieldDescriptor, value: &Value, slot: &mut [u8]) {
    let v = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .unwrap_or(0);
    slot.copy_from_slice(&v.to_le_bytes());
}

fn validate_timestamp(desc: &FieldDescriptor, value: &Value) -> Result<(), String> {
    check_number(desc, value, i64::MIN as f64, i64::MAX as f64, false)
}

fn decode_timestamp(field: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    Ok(Value::Timestamp(i64::from_le_bytes(fixed_bytes(field, bytes)?)))
}

fn empty_timestamp(_: &ReadField) -> Value {
    Value::Timestamp(0)
}

pub static TIMESTAMP: FieldCodec = FieldCodec {
    tag: TypeTag::Timestamp,
    separate: false,
    encode: encode_numeric,
    validate: validate_timestamp,
    fill_main: fill_timestamp,
    decode: decode_timestamp,
    empty: empty_timestamp,
};

fn fill_number(_: &FieldDescriptor, value: &Value, slot: &mut [u8]) {
    slot.copy_from_slice(&value.as_f64().unwrap_or(0.0).to_le_bytes());
}

fn validate_number(desc: &FieldDescriptor, value: &Value) -> Result<(), String> {
    check_number(desc, value, f64::MIN, f64::MAX, false)
}

fn decode_number(field: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    Ok(Value::Float(f64::from_le_bytes(fixed_bytes(field, bytes)?)))
}

fn empty_number(_: &ReadField) -> Value {
    Value::Float(0.0)
}

pub static NUMBER: FieldCodec = FieldCodec {
    tag: TypeTag::Number,
    separate: false,
    encode: encode_numeric,
    validate: validate_number,
    fill_main: fill_number,
    decode: decode_number,
    empty: empty_number,
};

// ----------------------------------------------------------------------------
// boolean, enum
// ----------------------------------------------------------------------------

fn fill_boolean(_: &FieldDescriptor, value: &Value, slot: &mut [u8]) {
    slot[0] = value.as_bool().unwrap_or(false) as u8;
}

fn validate_boolean(_: &FieldDescriptor, value: &Value) -> Result<(), String> {
    match value {
        Value::Null | Value::Bool(_) => Ok(()),
        other => Err(type_mismatch("a boolean", other)),
    }
}

fn decode_boolean(field: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    let [b] = fixed_bytes::<1>(field, bytes)?;
    Ok(Value::Bool(b != 0))
}

fn empty_boolean(_: &ReadField) -> Value {
    Value::Bool(false)
}

pub static BOOLEAN: FieldCodec = FieldCodec {
    tag: TypeTag::Boolean,
    separate: false,
    encode: encode_in_place,
    validate: validate_boolean,
    fill_main: fill_boolean,
    decode: decode_boolean,
    empty: empty_boolean,
};

fn fill_enum(desc: &FieldDescriptor, value: &Value, slot: &mut [u8]) {
    slot[0] = value
        .as_str()
        .and_then(|s| desc.enum_index(s))
        .map_or(0, |i| i as u8 + 1);
}

fn validate_enum(desc: &FieldDescriptor, value: &Value) -> Result<(), String> {
    match value {
        Value::Null => Ok(()),
        Value::String(s) if desc.enum_index(s).is_some() => Ok(()),
        Value::String(s) => Err(format!("'{s}' is not one of the enum values")),
        other => Err(type_mismatch("an enum member", other)),
    }
}

fn decode_enum(field: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    let [b] = fixed_bytes::<1>(field, bytes)?;
    if b == 0 {
        return Ok(Value::Null);
    }
    field
        .enum_values
        .get(b as usize - 1)
        .map(|s| Value::String(s.clone()))
        .ok_or_else(|| super::invalid_payload(field, "enum index out of range"))
}

fn empty_null(_: &ReadField) -> Value {
    Value::Null
}

pub static ENUM: FieldCodec = FieldCodec {
    tag: TypeTag::Enum,
    separate: false,
    encode: encode_in_place,
    validate: validate_enum,
    fill_main: fill_enum,
    decode: decode_enum,
    empty: empty_null,
};

// ----------------------------------------------------------------------------
// micro-buffer
// ----------------------------------------------------------------------------

fn micro_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Binary(b) => Some(b),
        Value::String(s) => Some(s.as_bytes()),
        _ => None,
    }
}

fn fill_micro_buffer(_: &FieldDescriptor, value: &Value, slot: &mut [u8]) {
    slot.fill(0);
    if let Some(bytes) = micro_bytes(value) {
        let n = bytes.len().min(slot.len());
        slot[..n].copy_from_slice(&bytes[..n]);
    }
}

fn validate_micro_buffer(desc: &FieldDescriptor, value: &Value) -> Result<(), String> {
    if value.is_null() {
        return Ok(());
    }
    match micro_bytes(value) {
        Some(b) if b.len() <= desc.len as usize => Ok(()),
        Some(b) => Err(format!("{} bytes do not fit a {}-byte buffer", b.len(), desc.len)),
        None => Err(type_mismatch("binary", value)),
    }
}

fn decode_micro_buffer(_: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    Ok(Value::Binary(bytes.to_vec()))
}

fn empty_micro_buffer(field: &ReadField) -> Value {
    Value::Binary(vec![0; field.len as usize])
}

pub static MICRO_BUFFER: FieldCodec = FieldCodec {
    tag: TypeTag::MicroBuffer,
    separate: false,
    encode: encode_in_place,
    validate: validate_micro_buffer,
    fill_main: fill_micro_buffer,
    decode: decode_micro_buffer,
    empty: empty_micro_buffer,
};

// ----------------------------------------------------------------------------
// types that cannot carry values
// ----------------------------------------------------------------------------

fn encode_nothing(_: &mut ModifyCtx, desc: &FieldDescriptor, _: &Value) -> Result<(), FieldError> {
    Err(FieldError::Invalid(format!("{} fields cannot be written", desc.tag)))
}

fn validate_nothing(desc: &FieldDescriptor, _: &Value) -> Result<(), String> {
    Err(format!("{} fields cannot be written", desc.tag))
}

fn decode_nothing(_: &ReadField, _: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    Ok(Value::Null)
}

pub static NULL: FieldCodec = FieldCodec {
    tag: TypeTag::Null,
    separate: false,
    encode: encode_nothing,
    validate: validate_nothing,
    fill_main: no_fill,
    decode: decode_nothing,
    empty: empty_null,
};
