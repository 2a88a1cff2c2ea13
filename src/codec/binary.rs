//! Binary, json and cardinality codecs.
//!
//! ```text
//! binary       len:u32 data crc32:u32
//! json         len:u32 serde_json bytes
//! cardinality  len:u32 xxh64:u64*        (result body: count:u32)
//! ```
//!
//! Cardinality fields are write-only sets: the encoder sends content hashes
//! of the added members and the engine answers with the distinct count.

use bumpalo::Bump;

use super::{delete_field, invalid_payload, type_mismatch, write_payload, FieldCodec};
use crate::decode::ReadField;
use crate::encoding::{crc32, hash64, ByteReader, PutLe};
use crate::error::DecodeError;
use crate::modify::{FieldError, ModifyCtx};
use crate::schema::FieldDescriptor;
use crate::types::{TypeTag, Value};

// ----------------------------------------------------------------------------
// binary
// ----------------------------------------------------------------------------

fn encode_binary(ctx: &mut ModifyCtx, desc: &FieldDescriptor, value: &Value) -> Result<(), FieldError> {
    match value {
        Value::Binary(data) if !data.is_empty() => {
            let mut body = Vec::with_capacity(data.len() + 4);
            body.put_bytes(data);
            body.put_u32(crc32(data));
            write_payload(ctx, desc, &body)
        }
        _ => delete_field(ctx, desc),
    }
}

fn validate_binary(desc: &FieldDescriptor, value: &Value) -> Result<(), String> {
    match value {
        Value::Null => Ok(()),
        Value::Binary(data) => match desc.max_bytes {
            Some(max) if data.len() > max as usize => {
                Err(format!("{} bytes exceed the maximum of {max}", data.len()))
            }
            _ => Ok(()),
        },
        other => Err(type_mismatch("binary", other)),
    }
}

fn decode_binary(field: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    if bytes.len() < 4 {
        return Err(invalid_payload(field, "missing checksum"));
    }
    let (data, trailer) = bytes.split_at(bytes.len() - 4);
    let stored = ByteReader::new(trailer).u32()?;
    if stored != crc32(data) {
        return Err(DecodeError::Checksum {
            field: field.name.clone(),
        });
    }
    Ok(Value::Binary(data.to_vec()))
}

fn empty_binary(_: &ReadField) -> Value {
    Value::Binary(Vec::new())
}

pub static BINARY: FieldCodec = FieldCodec {
    tag: TypeTag::Binary,
    separate: true,
    encode: encode_binary,
    validate: validate_binary,
    fill_main: super::no_fill,
    decode: decode_binary,
    empty: empty_binary,
};

// ----------------------------------------------------------------------------
// json
// ----------------------------------------------------------------------------

fn encode_json(ctx: &mut ModifyCtx, desc: &FieldDescriptor, value: &Value) -> Result<(), FieldError> {
    let bytes = match value {
        Value::Null => return delete_field(ctx, desc),
        Value::Json(json) => serde_json::to_vec(json),
        other => serde_json::to_vec(&other.to_json()),
    }
    .map_err(|e| FieldError::Invalid(e.to_string()))?;
    write_payload(ctx, desc, &bytes)
}

fn validate_json(_: &FieldDescriptor, value: &Value) -> Result<(), String> {
    match value {
        Value::Binary(_) | Value::Vector(_) => Err(type_mismatch("json", value)),
        _ => Ok(()),
    }
}

fn decode_json(field: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    serde_json::from_slice(bytes)
        .map(Value::Json)
        .map_err(|_| invalid_payload(field, "invalid json"))
}

fn empty_null(_: &ReadField) -> Value {
    Value::Null
}

pub static JSON: FieldCodec = FieldCodec {
    tag: TypeTag::Json,
    separate: true,
    encode: encode_json,
    validate: validate_json,
    fill_main: super::no_fill,
    decode: decode_json,
    empty: empty_null,
};

// ----------------------------------------------------------------------------
// cardinality
// ----------------------------------------------------------------------------

fn member_hash(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => Some(hash64(s.as_bytes())),
        Value::Binary(b) => Some(hash64(b)),
        Value::Int(i) => Some(hash64(i.to_string().as_bytes())),
        _ => None,
    }
}

fn encode_cardinality(
    ctx: &mut ModifyCtx,
    desc: &FieldDescriptor,
    value: &Value,
) -> Result<(), FieldError> {
    let members: &[Value] = match value {
        Value::Null => return delete_field(ctx, desc),
        Value::List(items) => items,
        single => std::slice::from_ref(single),
    };
    if members.is_empty() {
        return Ok(());
    }
    let mut body = Vec::with_capacity(members.len() * 8);
    for member in members {
        let hash = member_hash(member)
            .ok_or_else(|| FieldError::Invalid(type_mismatch("a string", member)))?;
        body.put_u64(hash);
    }
    write_payload(ctx, desc, &body)
}

fn validate_cardinality(_: &FieldDescriptor, value: &Value) -> Result<(), String> {
    match value {
        Value::Null => Ok(()),
        Value::List(items) => items.iter().try_for_each(|v| {
            member_hash(v)
                .map(drop)
                .ok_or_else(|| type_mismatch("a string", v))
        }),
        other => member_hash(other)
            .map(drop)
            .ok_or_else(|| type_mismatch("a string", other)),
    }
}

fn decode_cardinality(_: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    let count = ByteReader::new(bytes).u32()?;
    Ok(Value::Int(count as i64))
}

fn empty_count(_: &ReadField) -> Value {
    Value::Int(0)
}

pub static CARDINALITY: FieldCodec = FieldCodec {
    tag: TypeTag::Cardinality,
    separate: true,
    encode: encode_cardinality,
    validate: validate_cardinality,
    fill_main: super::no_fill,
    decode: decode_cardinality,
    empty: empty_count,
};
