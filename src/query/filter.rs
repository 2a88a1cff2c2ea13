//! # Filter Compilation
//!
//! A filter section is a sequence of items that must all match:
//!
//! ```text
//! COND      0x01 field:u8 start:u16 tag:u8 op:u8 mode:u8 value
//! OR_GROUP  0x02 len:u16 rpn-tokens
//! REF       0x03 field:u8 len:u16 nested-filter
//! TYPE      0x04 op:u8 type_id:u16
//! EDGE      0x05 len:u16 edge-filter
//! AND_OP    0x10 n:u8        (inside OR_GROUP only)
//! OR_OP     0x11 n:u8        (inside OR_GROUP only)
//! ```
//!
//! Every item, including a nested `OR_GROUP`, evaluates to one boolean, so an
//! `OR_GROUP` body is plain reverse Polish notation: `a b AND_OP 2 c OR_OP 2`
//! is `(a && b) || c`.
//!
//! ## Condition Values
//!
//! | mode | bytes | used for |
//! |------|-------|----------|
//! | fixed (0) | `len:u16 bytes` | main fields, ids, reference ids, counts |
//! | raw (1) | `len:u32 bytes` | short strings, any `has`/`like` operand |
//! | hash (2) | `len:u32 xxh64:u64` | strings longer than the inline limit |
//! | list (3) | `count:u16 width:u16 bytes` | `=` against a list of fixed values |
//! | none (4) | nothing | `exists` |
//!
//! Main fields are addressed as field 0 with `start` at their offset. Text
//! conditions put the locale slot in `start`.

use crate::codec::{value_kind, vector::coerce};
use crate::config::{FILTER_INLINE_MAX_BYTES, ID_FIELD, MAIN_FIELD};
use crate::encoding::{hash64, PutLe};
use crate::error::SchemaError;
use crate::schema::{FieldDescriptor, FieldTable, SchemaLayout, TypeLayout};
use crate::types::{TypeTag, Value};

use super::def::{Clause, Condition, Filter, Operator};

pub const COND: u8 = 0x01;
pub const OR_GROUP: u8 = 0x02;
pub const REF: u8 = 0x03;
pub const TYPE: u8 = 0x04;
pub const EDGE: u8 = 0x05;
pub const AND_OP: u8 = 0x10;
pub const OR_OP: u8 = 0x11;

pub const MODE_FIXED: u8 = 0;
pub const MODE_RAW: u8 = 1;
pub const MODE_HASH: u8 = 2;
pub const MODE_LIST: u8 = 3;
pub const MODE_NONE: u8 = 4;

/// What a filter is compiled against.
#[derive(Clone, Copy)]
pub(crate) struct FilterScope<'a> {
    pub schema: &'a SchemaLayout,
    pub layout: &'a TypeLayout,
    /// Edge table of the reference that led to `layout`, if any.
    pub edges: Option<&'a FieldTable>,
    /// Locale slot for text conditions.
    pub locale: u8,
}

fn invalid(field: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidFilter {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn small_count(field: &str, n: usize) -> Result<u8, SchemaError> {
    u8::try_from(n).map_err(|_| invalid(field, "too many conditions in one group"))
}

fn put_len16(out: &mut Vec<u8>, field: &str, body: &[u8]) -> Result<(), SchemaError> {
    let len = u16::try_from(body.len()).map_err(|_| invalid(field, "filter block exceeds 65535 bytes"))?;
    out.put_u16(len);
    out.put_bytes(body);
    Ok(())
}

pub(crate) fn compile_filter(scope: FilterScope<'_>, filter: &Filter, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    let branches = filter.branches();
    if let [only] = branches.as_slice() {
        for clause in only.iter() {
            compile_clause(scope, clause, out)?;
        }
        return Ok(());
    }
    or_group(scope, &branches, out)
}

/// Compiles OR-ed branches into one `OR_GROUP` item.
fn or_group(scope: FilterScope<'_>, branches: &[&[Clause]], out: &mut Vec<u8>) -> Result<(), SchemaError> {
    let mut rpn = Vec::new();
    for branch in branches {
        if branch.is_empty() {
            return Err(invalid("", "an OR branch has no conditions"));
        }
        for clause in branch.iter() {
            compile_clause(scope, clause, &mut rpn)?;
        }
        if branch.len() > 1 {
            rpn.put_u8(AND_OP);
            rpn.put_u8(small_count("", branch.len())?);
        }
    }
    if branches.len() > 1 {
        rpn.put_u8(OR_OP);
        rpn.put_u8(small_count("", branches.len())?);
    }
    out.put_u8(OR_GROUP);
    put_len16(out, "", &rpn)
}

/// Compiles one clause into exactly one filter item.
fn compile_clause(scope: FilterScope<'_>, clause: &Clause, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    match clause {
        Clause::Condition(cond) => compile_condition(scope, cond, out),
        Clause::Any(group) => or_group(scope, &group.branches(), out),
    }
}

/// Compiles one condition into exactly one filter item.
fn compile_condition(scope: FilterScope<'_>, cond: &Condition, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    let name = cond.field.as_str();
    match name {
        "type" => return type_item(scope, cond, out),
        "id" => return id_item(cond, out),
        _ => {}
    }

    if name.starts_with('$') {
        let edges = scope
            .edges
            .ok_or_else(|| invalid(name, "edge properties can only be filtered through a reference"))?;
        let desc = edges.get(name).ok_or_else(|| SchemaError::UnknownField {
            type_name: scope.layout.name.clone(),
            field: name.to_string(),
        })?;
        let mut inner = Vec::new();
        field_item(scope, desc, cond, &mut inner)?;
        out.put_u8(EDGE);
        return put_len16(out, name, &inner);
    }

    if let Some(desc) = scope.layout.fields.get(name) {
        return field_item(scope, desc, cond, out);
    }

    for (dot, _) in name.match_indices('.') {
        let Some(desc) = scope.layout.fields.get(&name[..dot]) else {
            continue;
        };
        let info = desc.reference.as_ref().ok_or_else(|| SchemaError::NotAReference {
            type_name: scope.layout.name.clone(),
            field: desc.name.clone(),
        })?;
        let target = scope
            .schema
            .by_id(info.target_id)
            .ok_or(SchemaError::UnknownTypeId(info.target_id))?;
        let nested_scope = FilterScope {
            schema: scope.schema,
            layout: target,
            edges: desc.edges(),
            locale: scope.locale,
        };
        let nested = Condition {
            field: name[dot + 1..].to_string(),
            op: cond.op,
            value: cond.value.clone(),
        };
        let mut inner = Vec::new();
        compile_condition(nested_scope, &nested, &mut inner)?;
        out.put_u8(REF);
        out.put_u8(desc.number);
        return put_len16(out, name, &inner);
    }

    Err(SchemaError::UnknownField {
        type_name: scope.layout.name.clone(),
        field: name.to_string(),
    })
}

fn type_item(scope: FilterScope<'_>, cond: &Condition, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    if !matches!(cond.op, Operator::Equal | Operator::NotEqual) {
        return Err(invalid("type", "only = and != apply to the record type"));
    }
    let name = cond
        .value
        .as_str()
        .ok_or_else(|| invalid("type", "expected a type name"))?;
    let target = scope.schema.type_layout(name)?;
    out.put_u8(TYPE);
    out.put_u8(cond.op.code());
    out.put_u16(target.id);
    Ok(())
}

fn cond_head(out: &mut Vec<u8>, field: u8, start: u16, tag: TypeTag, op: Operator) {
    out.put_u8(COND);
    out.put_u8(field);
    out.put_u16(start);
    out.put_u8(tag.code());
    out.put_u8(op.code());
}

fn parse_u32(field: &str, value: &Value) -> Result<u32, SchemaError> {
    value
        .as_i64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid(field, format!("expected an unsigned integer, got {}", value_kind(value))))
}

/// Writes a `u32` operand: fixed for one value, list for several.
fn put_u32_operand(out: &mut Vec<u8>, field: &str, value: &Value) -> Result<(), SchemaError> {
    match value {
        Value::List(items) => {
            let count = u16::try_from(items.len()).map_err(|_| invalid(field, "too many values"))?;
            out.put_u8(MODE_LIST);
            out.put_u16(count);
            out.put_u16(4);
            for item in items {
                out.put_u32(parse_u32(field, item)?);
            }
        }
        v => {
            out.put_u8(MODE_FIXED);
            out.put_u16(4);
            out.put_u32(parse_u32(field, v)?);
        }
    }
    Ok(())
}

fn id_item(cond: &Condition, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    if cond.op.is_partial() {
        return Err(invalid("id", "has and like do not apply to ids"));
    }
    cond_head(out, ID_FIELD, 0, TypeTag::Id, cond.op);
    if cond.op.is_exists() {
        out.put_u8(MODE_NONE);
        return Ok(());
    }
    if cond.value.as_list().is_some() && cond.op.is_range() {
        return Err(invalid("id", "range operators need a single id"));
    }
    put_u32_operand(out, "id", &cond.value)
}

fn field_item(
    scope: FilterScope<'_>,
    desc: &FieldDescriptor,
    cond: &Condition,
    out: &mut Vec<u8>,
) -> Result<(), SchemaError> {
    let op = cond.op;
    let (field, start) = match (desc.separate, desc.tag) {
        (false, _) => (MAIN_FIELD, desc.offset),
        (true, TypeTag::Text) => (desc.number, scope.locale as u16),
        (true, _) => (desc.number, 0),
    };
    if op.is_exists() {
        cond_head(out, field, start, desc.tag, op);
        out.put_u8(MODE_NONE);
        return Ok(());
    }

    match (desc.separate, desc.tag) {
        (false, _) => main_condition(desc, cond, out),
        (true, TypeTag::String | TypeTag::Alias | TypeTag::Text | TypeTag::Binary) => {
            bytes_condition(desc, start, cond, out)
        }
        (true, TypeTag::Reference | TypeTag::References) => {
            if op.is_range() || matches!(op, Operator::Like | Operator::NotLike) {
                return Err(invalid(&desc.name, "references only support =, != and has"));
            }
            cond_head(out, field, 0, desc.tag, op);
            put_u32_operand(out, &desc.name, &cond.value)
        }
        (true, TypeTag::Cardinality) => {
            if op.is_partial() || cond.value.as_list().is_some() {
                return Err(invalid(&desc.name, "cardinality compares a single count"));
            }
            cond_head(out, field, 0, desc.tag, op);
            put_u32_operand(out, &desc.name, &cond.value)
        }
        (true, tag) => Err(invalid(&desc.name, format!("cannot filter on {tag} fields"))),
    }
}

/// Encodes `value` the way the main region stores it.
fn main_bytes(desc: &FieldDescriptor, value: &Value) -> Result<Vec<u8>, SchemaError> {
    let len = desc.len as usize;
    let accepted = match desc.tag {
        tag if tag.is_numeric() => value.as_f64().is_some(),
        TypeTag::Boolean => value.as_bool().is_some(),
        TypeTag::Enum => value.as_str().and_then(|s| desc.enum_index(s)).is_some(),
        TypeTag::String => value.as_str().is_some_and(|s| s.len() < len),
        TypeTag::MicroBuffer => match value {
            Value::Binary(b) => b.len() <= len,
            Value::String(s) => s.len() <= len,
            _ => false,
        },
        TypeTag::Vector => desc.vector.and_then(|spec| coerce(spec, value)).is_some(),
        _ => false,
    };
    if !accepted {
        return Err(invalid(
            &desc.name,
            format!("{} is not a valid {} operand", value_kind(value), desc.tag),
        ));
    }
    let mut slot = vec![0u8; len];
    (desc.codec.fill_main)(desc, value, &mut slot);
    Ok(slot)
}

fn main_condition(desc: &FieldDescriptor, cond: &Condition, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    let op = cond.op;
    if op.is_range() && !desc.tag.is_numeric() {
        return Err(invalid(&desc.name, "range operators need a numeric field"));
    }
    cond_head(out, MAIN_FIELD, desc.offset, desc.tag, op);

    if op.is_partial() {
        let s = match (&cond.value, desc.tag) {
            (Value::String(s), TypeTag::String) => s,
            _ => return Err(invalid(&desc.name, "has and like need a string operand")),
        };
        out.put_u8(MODE_RAW);
        out.put_u32(s.len() as u32);
        out.put_bytes(s.as_bytes());
        return Ok(());
    }

    match &cond.value {
        Value::List(items) if desc.tag != TypeTag::Vector => {
            if op.is_range() {
                return Err(invalid(&desc.name, "range operators need a single value"));
            }
            let count = u16::try_from(items.len()).map_err(|_| invalid(&desc.name, "too many values"))?;
            out.put_u8(MODE_LIST);
            out.put_u16(count);
            out.put_u16(desc.len);
            for item in items {
                out.put_bytes(&main_bytes(desc, item)?);
            }
        }
        value => {
            out.put_u8(MODE_FIXED);
            out.put_u16(desc.len);
            out.put_bytes(&main_bytes(desc, value)?);
        }
    }
    Ok(())
}

fn put_bytes_operand(out: &mut Vec<u8>, bytes: &[u8], op: Operator) {
    if bytes.len() <= FILTER_INLINE_MAX_BYTES || op.is_partial() {
        out.put_u8(MODE_RAW);
        out.put_u32(bytes.len() as u32);
        out.put_bytes(bytes);
    } else {
        out.put_u8(MODE_HASH);
        out.put_u32(bytes.len() as u32);
        out.put_u64(hash64(bytes));
    }
}

fn operand_bytes<'v>(desc: &FieldDescriptor, value: &'v Value) -> Result<&'v [u8], SchemaError> {
    match (value, desc.tag) {
        (Value::String(s), _) => Ok(s.as_bytes()),
        (Value::Binary(b), TypeTag::Binary) => Ok(b),
        (other, tag) => Err(invalid(
            &desc.name,
            format!("{} is not a valid {tag} operand", value_kind(other)),
        )),
    }
}

fn bytes_condition(
    desc: &FieldDescriptor,
    start: u16,
    cond: &Condition,
    out: &mut Vec<u8>,
) -> Result<(), SchemaError> {
    let op = cond.op;
    if op.is_range() {
        return Err(invalid(&desc.name, "range operators need a numeric field"));
    }
    let Value::List(items) = &cond.value else {
        cond_head(out, desc.number, start, desc.tag, op);
        put_bytes_operand(out, operand_bytes(desc, &cond.value)?, op);
        return Ok(());
    };

    // One condition per member, folded in a group.
    if items.is_empty() {
        return Err(invalid(&desc.name, "empty value list"));
    }
    let mut rpn = Vec::new();
    for item in items {
        cond_head(&mut rpn, desc.number, start, desc.tag, op);
        put_bytes_operand(&mut rpn, operand_bytes(desc, item)?, op);
    }
    rpn.put_u8(if op.is_negated() { AND_OP } else { OR_OP });
    rpn.put_u8(small_count(&desc.name, items.len())?);
    out.put_u8(OR_GROUP);
    put_len16(out, &desc.name, &rpn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropDef, SchemaDef, TypeDef};
    use crate::types::VectorBase;

    fn schema() -> SchemaLayout {
        let def = SchemaDef::new()
            .locale("en")
            .locale("fr")
            .with_type(
                TypeDef::new("user")
                    .prop(PropDef::number("age"))
                    .prop(PropDef::string("name"))
                    .prop(PropDef::enumeration("role", ["admin", "member"]))
                    .prop(PropDef::text("bio"))
                    .prop(PropDef::vector("emb", 2, VectorBase::Float32))
                    .prop(
                        PropDef::reference("team", "team")
                            .edge(PropDef::new("$level", TypeTag::Uint8)),
                    ),
            )
            .with_type(TypeDef::new("team").prop(PropDef::string("title").max_bytes(20)));
        SchemaLayout::compile(&def, None).unwrap()
    }

    fn compile(filter: Filter) -> Result<Vec<u8>, SchemaError> {
        let schema = schema();
        let scope = FilterScope {
            schema: &schema,
            layout: schema.get("user").unwrap(),
            edges: None,
            locale: 0,
        };
        let mut out = Vec::new();
        compile_filter(scope, &filter, &mut out)?;
        Ok(out)
    }

    #[test]
    fn main_condition_addresses_offset() {
        let bytes = compile(Filter::new().filter("age", Operator::Gt, 18)).unwrap();
        let mut expected = vec![COND, 0, 0, 0, TypeTag::Number.code(), 3, MODE_FIXED, 8, 0];
        expected.extend_from_slice(&18f64.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn enum_condition_uses_member_index() {
        let bytes = compile(Filter::new().filter("role", Operator::Equal, "member")).unwrap();
        assert_eq!(bytes[6..], [MODE_FIXED, 1, 0, 2]);
        let err = compile(Filter::new().filter("role", Operator::Equal, "owner")).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidFilter { .. }));
    }

    #[test]
    fn long_strings_compile_to_hash() {
        let short = compile(Filter::new().filter("name", Operator::Equal, "bob")).unwrap();
        assert_eq!(short[6], MODE_RAW);
        assert_eq!(&short[7..11], &3u32.to_le_bytes());

        let long = "x".repeat(FILTER_INLINE_MAX_BYTES + 1);
        let hashed = compile(Filter::new().filter("name", Operator::Equal, long.as_str())).unwrap();
        assert_eq!(hashed[6], MODE_HASH);
        assert_eq!(hashed.len(), 7 + 4 + 8);
        assert_eq!(&hashed[11..], &hash64(long.as_bytes()).to_le_bytes());

        let partial = compile(Filter::new().filter("name", Operator::Has, long.as_str())).unwrap();
        assert_eq!(partial[6], MODE_RAW);
    }

    #[test]
    fn or_fork_compiles_to_rpn() {
        let f = Filter::new()
            .filter("age", Operator::Gt, 1)
            .filter("age", Operator::Lt, 9)
            .or(|f| f.filter("name", Operator::Equal, "x"));
        let bytes = compile(f).unwrap();
        assert_eq!(bytes[0], OR_GROUP);
        let len = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
        assert_eq!(bytes.len(), 3 + len);
        assert_eq!(&bytes[bytes.len() - 2..], &[OR_OP, 2]);
        // The first branch closes with AND_OP 2 before the string condition.
        let first = 7 + 2 + 8;
        assert_eq!(&bytes[3 + 2 * first..3 + 2 * first + 2], &[AND_OP, 2]);
    }

    #[test]
    fn any_group_sits_inside_the_conjunction() {
        let f = Filter::new()
            .filter("age", Operator::Gt, 1)
            .any(|f| f.filter("name", Operator::Equal, "a").or(|f| f.filter("name", Operator::Equal, "b")));
        let bytes = compile(f).unwrap();
        // A plain condition first, then one group holding the OR.
        let cond_len = 7 + 2 + 8;
        assert_eq!(bytes[0], COND);
        assert_eq!(bytes[cond_len], OR_GROUP);
        let len = u16::from_le_bytes([bytes[cond_len + 1], bytes[cond_len + 2]]) as usize;
        assert_eq!(bytes.len(), cond_len + 3 + len);
        let rpn = &bytes[cond_len + 3..];
        assert_eq!(rpn[0], COND);
        // Two raw string conditions of 12 bytes and the closing operator.
        assert_eq!(rpn.len(), 12 + 12 + 2);
        assert_eq!(&rpn[24..], &[OR_OP, 2]);
    }

    #[test]
    fn any_group_nests_inside_or_branches() {
        let f = Filter::new()
            .filter("age", Operator::Gt, 1)
            .any(|f| f.filter("name", Operator::Equal, "a").or(|f| f.filter("name", Operator::Equal, "b")))
            .or(|f| f.filter("role", Operator::Equal, "admin"));
        let bytes = compile(f).unwrap();
        assert_eq!(bytes[0], OR_GROUP);
        let cond_len = 7 + 2 + 8;
        assert_eq!(bytes[3 + cond_len], OR_GROUP);
        // age, the nested group, AND_OP 2, then the 10 byte enum condition.
        let group_len = 3 + 12 + 12 + 2;
        let and_at = 3 + cond_len + group_len;
        assert_eq!(&bytes[and_at..and_at + 2], &[AND_OP, 2]);
        assert_eq!(bytes.len(), and_at + 2 + 10 + 2);
        assert_eq!(&bytes[bytes.len() - 2..], &[OR_OP, 2]);
        assert!(compile(Filter::new().any(|f| f)).is_err());
    }

    #[test]
    fn reference_path_nests_against_target() {
        let bytes = compile(Filter::new().filter("team.title", Operator::Equal, "core")).unwrap();
        let team_field = schema().get("user").unwrap().field("team").unwrap().number;
        assert_eq!(bytes[0], REF);
        assert_eq!(bytes[1], team_field);
        assert_eq!(bytes[4], COND);
        // `title` is a main string in `team`.
        assert_eq!(bytes[5], MAIN_FIELD);
    }

    #[test]
    fn edge_fields_need_a_reference_scope() {
        let err = compile(Filter::new().filter("$level", Operator::Equal, 1)).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidFilter { .. }));
        let bytes = compile(Filter::new().filter("team.$level", Operator::Ge, 2)).unwrap();
        assert_eq!(bytes[0], REF);
        assert_eq!(bytes[4], EDGE);
    }

    #[test]
    fn type_and_id_items() {
        let bytes = compile(Filter::new().filter("type", Operator::NotEqual, "team")).unwrap();
        assert_eq!(bytes, vec![TYPE, 0x81, 2, 0]);
        let ids = compile(Filter::new().filter("id", Operator::Equal, Value::list([3u32, 4]))).unwrap();
        assert_eq!(ids[1], ID_FIELD);
        assert_eq!(ids[6..11], [MODE_LIST, 2, 0, 4, 0]);
        assert!(compile(Filter::new().filter("type", Operator::Gt, "team")).is_err());
    }

    #[test]
    fn unknown_and_unsupported_fields_fail() {
        assert!(matches!(
            compile(Filter::new().filter("nope", Operator::Equal, 1)),
            Err(SchemaError::UnknownField { .. })
        ));
        assert!(matches!(
            compile(Filter::new().filter("name.x", Operator::Equal, 1)),
            Err(SchemaError::NotAReference { .. })
        ));
        assert!(compile(Filter::new().filter("name", Operator::Gt, "a")).is_err());
        assert!(compile(Filter::new().filter("bio", Operator::Exists, Value::Null)).is_ok());
    }

    #[test]
    fn string_lists_become_groups() {
        let bytes = compile(Filter::new().filter("name", Operator::Equal, Value::list(["a", "b"]))).unwrap();
        assert_eq!(bytes[0], OR_GROUP);
        assert_eq!(&bytes[bytes.len() - 2..], &[OR_OP, 2]);
        let negated = compile(Filter::new().filter("name", Operator::NotEqual, Value::list(["a", "b"]))).unwrap();
        assert_eq!(&negated[negated.len() - 2..], &[AND_OP, 2]);
    }
}
