//! String, alias and text codecs.
//!
//! Short strings live in the main region as `len:u8 bytes` padded with zeros.
//! Everything else is a separate payload:
//!
//! ```text
//! len:u32 locale:u8 flag:u8 [orig_len:u32] data
//! ```
//!
//! `flag` is `STRING_RAW` or `STRING_DEFLATE`. A string is deflated only when
//! the field allows compression, it is longer than the context threshold and
//! the deflated form is actually smaller. Plain strings and aliases use locale
//! slot 0; text values carry the slot of their locale.

use bumpalo::Bump;
use smallvec::SmallVec;

use super::{delete_field, invalid_payload, type_mismatch, write_payload, FieldCodec};
use crate::decode::ReadField;
use crate::encoding::{compress, ByteReader, PutLe};
use crate::error::DecodeError;
use crate::modify::{ops, FieldError, ModifyCtx};
use crate::schema::{Compression, FieldDescriptor};
use crate::types::{TypeTag, Value};

fn string_body(ctx: &ModifyCtx, desc: &FieldDescriptor, locale: u8, s: &str) -> Vec<u8> {
    let raw = s.as_bytes();
    let mut body = Vec::with_capacity(raw.len() + 6);
    body.put_u8(locale);
    if desc.compression == Compression::Deflate && raw.len() > ctx.compress_threshold() {
        if let Ok(packed) = compress::deflate(raw) {
            if packed.len() < raw.len() {
                body.put_u8(ops::STRING_DEFLATE);
                body.put_u32(raw.len() as u32);
                body.put_bytes(&packed);
                return body;
            }
        }
    }
    body.put_u8(ops::STRING_RAW);
    body.put_bytes(raw);
    body
}

fn check_len(desc: &FieldDescriptor, s: &str) -> Result<(), String> {
    match desc.max_bytes {
        Some(max) if s.len() > max as usize => {
            Err(format!("{} bytes exceed the maximum of {max}", s.len()))
        }
        _ => Ok(()),
    }
}

/// Decodes `locale flag [orig_len] data` into the locale slot and the string.
fn decode_body(field: &ReadField, bytes: &[u8], bump: &Bump) -> Result<(u8, String), DecodeError> {
    let mut r = ByteReader::new(bytes);
    let locale = r.u8()?;
    let flag = r.u8()?;
    let data: &[u8] = match flag {
        ops::STRING_RAW => r.rest(),
        ops::STRING_DEFLATE => {
            let len = r.u32()? as usize;
            let packed = r.rest();
            if !compress::plausible_len(packed.len(), len) {
                return Err(invalid_payload(field, "implausible inflated length"));
            }
            let out = bump
                .try_alloc_slice_fill_copy(len, 0u8)
                .map_err(|_| invalid_payload(field, "inflated length does not fit in memory"))?;
            if !compress::inflate_into(packed, out) {
                return Err(invalid_payload(field, "corrupt deflate stream"));
            }
            out
        }
        _ => return Err(invalid_payload(field, "unknown string flag")),
    };
    let s = std::str::from_utf8(data).map_err(|_| invalid_payload(field, "invalid utf-8"))?;
    Ok((locale, s.to_owned()))
}

// ----------------------------------------------------------------------------
// main-region string
// ----------------------------------------------------------------------------

fn fill_main_string(_: &FieldDescriptor, value: &Value, slot: &mut [u8]) {
    slot.fill(0);
    if let Some(s) = value.as_str() {
        let n = s.len().min(slot.len() - 1);
        slot[0] = n as u8;
        slot[1..=n].copy_from_slice(&s.as_bytes()[..n]);
    }
}

fn validate_main_string(desc: &FieldDescriptor, value: &Value) -> Result<(), String> {
    match value {
        Value::Null => Ok(()),
        Value::String(s) if s.len() < desc.len as usize => Ok(()),
        Value::String(s) => Err(format!(
            "{} bytes exceed the maximum of {}",
            s.len(),
            desc.len - 1
        )),
        other => Err(type_mismatch("a string", other)),
    }
}

fn decode_main_string(field: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    let Some((&n, rest)) = bytes.split_first() else {
        return Err(invalid_payload(field, "empty string slot"));
    };
    let data = rest
        .get(..n as usize)
        .ok_or_else(|| invalid_payload(field, "string length exceeds its slot"))?;
    let s = std::str::from_utf8(data).map_err(|_| invalid_payload(field, "invalid utf-8"))?;
    Ok(Value::String(s.to_owned()))
}

fn empty_string(_: &ReadField) -> Value {
    Value::String(String::new())
}

pub static MAIN_STRING: FieldCodec = FieldCodec {
    tag: TypeTag::String,
    separate: false,
    encode: super::fixed::encode_in_place,
    validate: validate_main_string,
    fill_main: fill_main_string,
    decode: decode_main_string,
    empty: empty_string,
};

// ----------------------------------------------------------------------------
// separate string, alias
// ----------------------------------------------------------------------------

fn encode_string(ctx: &mut ModifyCtx, desc: &FieldDescriptor, value: &Value) -> Result<(), FieldError> {
    match value {
        Value::String(s) if !s.is_empty() => {
            let body = string_body(ctx, desc, 0, s);
            write_payload(ctx, desc, &body)?;
            ctx.mark_sort(desc.number, 0);
            Ok(())
        }
        _ => delete_field(ctx, desc),
    }
}

fn validate_string(desc: &FieldDescriptor, value: &Value) -> Result<(), String> {
    match value {
        Value::Null => Ok(()),
        Value::String(s) => check_len(desc, s),
        other => Err(type_mismatch("a string", other)),
    }
}

fn decode_string(field: &ReadField, bytes: &[u8], bump: &Bump) -> Result<Value, DecodeError> {
    decode_body(field, bytes, bump).map(|(_, s)| Value::String(s))
}

pub static STRING: FieldCodec = FieldCodec {
    tag: TypeTag::String,
    separate: true,
    encode: encode_string,
    validate: validate_string,
    fill_main: super::no_fill,
    decode: decode_string,
    empty: empty_string,
};

pub static ALIAS: FieldCodec = FieldCodec {
    tag: TypeTag::Alias,
    separate: true,
    encode: encode_string,
    validate: validate_string,
    fill_main: super::no_fill,
    decode: decode_string,
    empty: empty_string,
};

// ----------------------------------------------------------------------------
// text
// ----------------------------------------------------------------------------

fn write_locale(
    ctx: &mut ModifyCtx,
    desc: &FieldDescriptor,
    slot: u8,
    value: Option<&str>,
) -> Result<(), FieldError> {
    match value {
        Some(s) if !s.is_empty() => {
            let body = string_body(ctx, desc, slot, s);
            write_payload(ctx, desc, &body)?;
            ctx.mark_sort(desc.number, slot);
            ctx.mark_sort(desc.number, 0);
            Ok(())
        }
        _ if ctx.is_create() => Ok(()),
        _ => {
            ctx.begin_field(desc.number, desc.tag, ops::DELETE_TEXT_LOCALE, 1)?;
            ctx.put_u8(slot);
            Ok(())
        }
    }
}

fn encode_text(ctx: &mut ModifyCtx, desc: &FieldDescriptor, value: &Value) -> Result<(), FieldError> {
    match value {
        Value::Null => delete_field(ctx, desc),
        Value::String(s) => {
            let slot = ctx.default_locale();
            write_locale(ctx, desc, slot, Some(s))
        }
        Value::Text(map) => {
            let slots = locale_slots(ctx, map.keys())?;
            for (slot, s) in slots.into_iter().zip(map.values()) {
                write_locale(ctx, desc, slot, Some(s))?;
            }
            Ok(())
        }
        Value::Object(map) => {
            let slots = locale_slots(ctx, map.keys())?;
            for (slot, v) in slots.into_iter().zip(map.values()) {
                write_locale(ctx, desc, slot, v.as_str())?;
            }
            Ok(())
        }
        other => Err(FieldError::Invalid(type_mismatch("text", other))),
    }
}

/// Resolves every locale before anything is written.
fn locale_slots<'a>(
    ctx: &ModifyCtx,
    locales: impl Iterator<Item = &'a String>,
) -> Result<SmallVec<[u8; 4]>, FieldError> {
    locales
        .map(|locale| {
            ctx.locale_slot(locale)
                .ok_or_else(|| FieldError::Invalid(format!("invalid locale '{locale}'")))
        })
        .collect()
}

fn validate_text(desc: &FieldDescriptor, value: &Value) -> Result<(), String> {
    match value {
        Value::Null => Ok(()),
        Value::String(s) => check_len(desc, s),
        Value::Text(map) => map.values().try_for_each(|s| check_len(desc, s)),
        Value::Object(map) => map.values().try_for_each(|v| match v {
            Value::Null => Ok(()),
            Value::String(s) => check_len(desc, s),
            other => Err(type_mismatch("a string or null per locale", other)),
        }),
        other => Err(type_mismatch("text", other)),
    }
}

fn decode_text(field: &ReadField, bytes: &[u8], bump: &Bump) -> Result<Value, DecodeError> {
    let (slot, s) = decode_body(field, bytes, bump)?;
    let locale = match slot {
        0 => String::new(),
        n => field
            .locales
            .get(n as usize - 1)
            .cloned()
            .ok_or_else(|| invalid_payload(field, "unknown locale slot"))?,
    };
    Ok(Value::text([(locale, s)]))
}

fn empty_text(_: &ReadField) -> Value {
    Value::Text(Default::default())
}

pub static TEXT: FieldCodec = FieldCodec {
    tag: TypeTag::Text,
    separate: true,
    encode: encode_text,
    validate: validate_text,
    fill_main: super::no_fill,
    decode: decode_text,
    empty: empty_text,
};
