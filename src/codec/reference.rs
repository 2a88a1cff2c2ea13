//! Reference codecs and edge records.
//!
//! ```text
//! reference   op(CREATE|UPDATE) flags:u8 id:u32 [edge]
//! references  op(ARRAY_*) len:u32 flags:u8 count:u32 [index:i32] id:u32* [edge*]
//! edge        len:u32 [0 CREATE len:u32 main] (field:u8 op:u8 payload)*
//! ```
//!
//! `flags` carries `REF_HAS_INDEX` and `REF_HAS_EDGES`. When edges are present
//! every listed id is followed (after the id block) by one edge record, empty
//! for elements without properties.
//!
//! A references value is either a plain list or an object of operations:
//!
//! - list: `ARRAY_ADD` while creating, `ARRAY_OVERWRITE` while updating
//! - `{"delete": [...], "add": [...], "update": [...]}`: processed in that
//!   order; `update` re-adds elements, moving them or replacing their edges
//!
//! Elements are ids or `{"id": n, "$index": i, "$prop": v}` objects. Indexed
//! elements are written as their own `ARRAY_ADD` so the engine can place them.

use std::collections::BTreeMap;

use bumpalo::Bump;
use smallvec::SmallVec;

use super::{delete_field, invalid_payload, type_mismatch, FieldCodec};
use crate::decode::ReadField;
use crate::encoding::ByteReader;
use crate::error::{DecodeError, SchemaError};
use crate::modify::{ops, FieldError, ModifyCtx};
use crate::schema::{FieldDescriptor, FieldTable};
use crate::types::{TypeTag, Value};

const INDEX_KEY: &str = "$index";

#[derive(Debug, Clone, Copy)]
struct RefElement<'v> {
    id: u32,
    index: Option<i32>,
    props: Option<&'v BTreeMap<String, Value>>,
}

impl RefElement<'_> {
    fn has_props(&self) -> bool {
        self.props
            .is_some_and(|p| p.keys().any(|k| k.starts_with('$') && k != INDEX_KEY))
    }
}

fn parse_id(value: &Value) -> Result<u32, FieldError> {
    match value.as_i64() {
        Some(id) if id > 0 && id <= u32::MAX as i64 => Ok(id as u32),
        Some(id) => Err(FieldError::Invalid(format!("reference id {id} is not positive"))),
        None => Err(FieldError::Invalid(type_mismatch("a record id", value))),
    }
}

fn parse_element(value: &Value) -> Result<RefElement<'_>, FieldError> {
    let Value::Object(map) = value else {
        return Ok(RefElement {
            id: parse_id(value)?,
            index: None,
            props: None,
        });
    };
    let id = map
        .get("id")
        .ok_or_else(|| FieldError::Invalid("reference object without an id".into()))?;
    if let Some(key) = map.keys().find(|k| *k != "id" && !k.starts_with('$')) {
        return Err(FieldError::Invalid(format!(
            "unexpected key '{key}' in reference; edge properties start with '$'"
        )));
    }
    let index = match map.get(INDEX_KEY) {
        None => None,
        Some(v) => Some(
            v.as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .ok_or_else(|| FieldError::Invalid(type_mismatch("an integer index", v)))?,
        ),
    };
    Ok(RefElement {
        id: parse_id(id)?,
        index,
        props: Some(map),
    })
}

fn parse_list(value: &Value) -> Result<SmallVec<[RefElement<'_>; 8]>, FieldError> {
    match value {
        Value::List(items) => items.iter().map(parse_element).collect(),
        other => Err(FieldError::Invalid(type_mismatch("a list of references", other))),
    }
}

/// Writes one edge record for `props` into the current record.
pub(crate) fn write_edge_record(
    ctx: &mut ModifyCtx,
    owner: &FieldDescriptor,
    edges: &FieldTable,
    props: Option<&BTreeMap<String, Value>>,
) -> Result<(), FieldError> {
    let props = props.into_iter().flatten().filter(|(k, _)| k.starts_with('$') && *k != INDEX_KEY);
    let mut fields: SmallVec<[(&FieldDescriptor, &Value); 8]> = SmallVec::new();
    for (key, value) in props {
        let desc = edges.get(key).ok_or_else(|| SchemaError::UnknownField {
            type_name: owner.name.clone(),
            field: key.clone(),
        })?;
        (desc.codec.validate)(desc, value).map_err(FieldError::Invalid)?;
        if let Some(check) = &desc.validation {
            if !check.check(value) {
                return Err(FieldError::Invalid(format!("{key} failed validation")));
            }
        }
        fields.push((desc, value));
    }
    let with_main = fields.iter().any(|(d, _)| d.is_main());
    let len_at = ctx.begin_edge(edges, with_main)?;
    for (desc, value) in fields {
        (desc.codec.encode)(ctx, desc, value)?;
    }
    ctx.end_edge(len_at);
    Ok(())
}

fn edge_table<'d>(desc: &'d FieldDescriptor, elem: &RefElement<'_>) -> Result<Option<&'d FieldTable>, FieldError> {
    match desc.edges() {
        Some(table) => Ok(Some(table)),
        None if elem.has_props() => Err(FieldError::Invalid(format!(
            "{} does not declare edge properties",
            desc.name
        ))),
        None => Ok(None),
    }
}

// ----------------------------------------------------------------------------
// single reference
// ----------------------------------------------------------------------------

fn encode_reference(ctx: &mut ModifyCtx, desc: &FieldDescriptor, value: &Value) -> Result<(), FieldError> {
    if value.is_null() {
        return delete_field(ctx, desc);
    }
    let elem = parse_element(value)?;
    let edges = edge_table(desc, &elem)?.filter(|_| elem.has_props());
    let flags = if edges.is_some() { ops::REF_HAS_EDGES } else { 0 };
    let op = ctx.write_op();
    ctx.begin_field(desc.number, desc.tag, op, 5)?;
    ctx.put_u8(flags);
    ctx.put_u32(elem.id);
    if let Some(edges) = edges {
        write_edge_record(ctx, desc, edges, elem.props)?;
    }
    Ok(())
}

fn validate_reference(_: &FieldDescriptor, value: &Value) -> Result<(), String> {
    match value {
        Value::Null | Value::Int(_) | Value::Object(_) => Ok(()),
        Value::Float(f) if f.fract() == 0.0 => Ok(()),
        other => Err(type_mismatch("a record id", other)),
    }
}

fn decode_reference(_: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    match ByteReader::new(bytes).u32()? {
        0 => Ok(Value::Null),
        id => Ok(Value::reference(id)),
    }
}

fn empty_null(_: &ReadField) -> Value {
    Value::Null
}

pub static REFERENCE: FieldCodec = FieldCodec {
    tag: TypeTag::Reference,
    separate: true,
    encode: encode_reference,
    validate: validate_reference,
    fill_main: super::no_fill,
    decode: decode_reference,
    empty: empty_null,
};

// ----------------------------------------------------------------------------
// references
// ----------------------------------------------------------------------------

/// Writes one `ARRAY_*` payload for `elems`.
fn write_refs(
    ctx: &mut ModifyCtx,
    desc: &FieldDescriptor,
    op: u8,
    elems: &[RefElement<'_>],
    index: Option<i32>,
) -> Result<(), FieldError> {
    let mut edges = None;
    if op != ops::ARRAY_DELETE {
        for elem in elems {
            edges = edges.or(edge_table(desc, elem)?);
        }
    }
    let edges = edges.filter(|_| elems.iter().any(RefElement::has_props));

    let mut flags = 0;
    if index.is_some() {
        flags |= ops::REF_HAS_INDEX;
    }
    if edges.is_some() {
        flags |= ops::REF_HAS_EDGES;
    }
    let head = 4 + 1 + 4 + index.map_or(0, |_| 4) + 4 * elems.len();
    ctx.begin_field(desc.number, desc.tag, op, head)?;
    let len_at = ctx.len();
    ctx.put_u32(0);
    ctx.put_u8(flags);
    ctx.put_u32(elems.len() as u32);
    if let Some(index) = index {
        ctx.put_i32(index);
    }
    for elem in elems {
        ctx.put_u32(elem.id);
    }
    if let Some(edges) = edges {
        for elem in elems {
            write_edge_record(ctx, desc, edges, elem.props)?;
        }
    }
    let len = ctx.len() - len_at - 4;
    ctx.patch_u32(len_at, len as u32);
    Ok(())
}

/// Adds `elems`: un-indexed ones in one payload, indexed ones one by one.
fn add_refs(ctx: &mut ModifyCtx, desc: &FieldDescriptor, elems: &[RefElement<'_>]) -> Result<(), FieldError> {
    let plain: SmallVec<[RefElement<'_>; 8]> = elems.iter().filter(|e| e.index.is_none()).copied().collect();
    if !plain.is_empty() {
        write_refs(ctx, desc, ops::ARRAY_ADD, &plain, None)?;
    }
    for elem in elems.iter().filter(|e| e.index.is_some()) {
        write_refs(ctx, desc, ops::ARRAY_ADD, std::slice::from_ref(elem), elem.index)?;
    }
    Ok(())
}

fn overwrite_refs(
    ctx: &mut ModifyCtx,
    desc: &FieldDescriptor,
    elems: &[RefElement<'_>],
) -> Result<(), FieldError> {
    write_refs(ctx, desc, ops::ARRAY_OVERWRITE, elems, None)?;
    for elem in elems.iter().filter(|e| e.index.is_some()) {
        write_refs(ctx, desc, ops::ARRAY_ADD, std::slice::from_ref(elem), elem.index)?;
    }
    Ok(())
}

fn encode_references(
    ctx: &mut ModifyCtx,
    desc: &FieldDescriptor,
    value: &Value,
) -> Result<(), FieldError> {
    match value {
        Value::Null => delete_field(ctx, desc),
        Value::List(_) => {
            let elems = parse_list(value)?;
            if ctx.is_create() {
                if elems.is_empty() {
                    return Ok(());
                }
                add_refs(ctx, desc, &elems)
            } else {
                overwrite_refs(ctx, desc, &elems)
            }
        }
        Value::Object(map) => {
            if let Some(key) = map.keys().find(|k| !matches!(k.as_str(), "add" | "delete" | "update")) {
                return Err(FieldError::Invalid(format!(
                    "unknown references operation '{key}'"
                )));
            }
            if let Some(list) = map.get("delete") {
                let elems = parse_list(list)?;
                if !elems.is_empty() {
                    write_refs(ctx, desc, ops::ARRAY_DELETE, &elems, None)?;
                }
            }
            for key in ["add", "update"] {
                if let Some(list) = map.get(key) {
                    add_refs(ctx, desc, &parse_list(list)?)?;
                }
            }
            Ok(())
        }
        other => Err(FieldError::Invalid(type_mismatch("a list of references", other))),
    }
}

fn validate_references(_: &FieldDescriptor, value: &Value) -> Result<(), String> {
    match value {
        Value::Null | Value::List(_) | Value::Object(_) => Ok(()),
        other => Err(type_mismatch("a list of references", other)),
    }
}

fn decode_references(field: &ReadField, bytes: &[u8], _: &Bump) -> Result<Value, DecodeError> {
    let mut r = ByteReader::new(bytes);
    let count = r.u32()? as usize;
    if count * 4 > r.remaining() {
        return Err(invalid_payload(field, "id count exceeds the payload"));
    }
    let ids = (0..count)
        .map(|_| r.u32().map(Value::reference))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::List(ids))
}

fn empty_list(_: &ReadField) -> Value {
    Value::List(Vec::new())
}

pub static REFERENCES: FieldCodec = FieldCodec {
    tag: TypeTag::References,
    separate: true,
    encode: encode_references,
    validate: validate_references,
    fill_main: super::no_fill,
    decode: decode_references,
    empty: empty_list,
};
