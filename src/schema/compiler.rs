//! # Layout Compiler
//!
//! Turns a [`SchemaDef`] into a [`SchemaLayout`]. Compilation is deterministic
//! and, given the previously installed layout, migration-aware:
//!
//! 1. **Flatten**: walk the properties depth-first; object properties become
//!    branches of the object tree, every other property is a leaf.
//! 2. **Place**: decide main vs separate and the main width of each leaf.
//! 3. **Number**: reuse the previous number (and main offset) of a leaf with
//!    the same path and shape, otherwise allocate from `next_field`. Numbers of
//!    leaves that disappeared are retired for good.
//! 4. **Resolve references**: bind target type ids and inverse field numbers;
//!    the inverse side shares the declaring side's edge table.
//! 5. **Pack**: serialize the descriptor the engine consumes and hash it.

use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::Result;
use hashbrown::{HashMap, HashSet};
use tracing::debug;

use super::definition::{PropDef, SchemaDef, TypeDef};
use super::layout::{FieldDescriptor, FieldTable, ObjectNode, RefInfo, SortSlot, TypeLayout, VectorSpec};
use super::packed;
use crate::codec::codec_for;
use crate::config::{
    MAIN_STRING_MAX_BYTES, MAIN_VECTOR_MAX_BYTES, MAX_ENUM_VALUES, MAX_FIELD_NUMBER, MAX_MAIN_LEN,
};
use crate::encoding::hash64;
use crate::error::SchemaError;
use crate::types::{TypeTag, Value};

/// Every type layout of one schema version.
#[derive(Debug, Clone)]
pub struct SchemaLayout {
    locales: Vec<String>,
    types: Vec<TypeLayout>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<u16, usize>,
    next_type_id: u16,
    descriptor: Vec<u8>,
    hash: u64,
}

impl SchemaLayout {
    pub fn compile(def: &SchemaDef, previous: Option<&SchemaLayout>) -> Result<Self> {
        validate_locales(&def.locales)?;

        let mut next_type_id = previous.map_or(1, |p| p.next_type_id);
        let mut seen = HashSet::new();
        let mut types = Vec::with_capacity(def.types.len());

        for type_def in &def.types {
            if !seen.insert(type_def.name.as_str()) {
                return Err(SchemaError::DuplicateType(type_def.name.clone()).into());
            }
            let prev = previous.and_then(|p| p.get(&type_def.name));
            let id = match prev {
                Some(p) => p.id,
                None => {
                    let id = next_type_id;
                    next_type_id = next_type_id.checked_add(1).ok_or_else(|| {
                        SchemaError::InvalidDefinition {
                            path: type_def.name.clone(),
                            reason: "type ids exhausted".into(),
                        }
                    })?;
                    id
                }
            };
            types.push(compile_type(type_def, id, &def.locales, prev)?);
        }

        let by_name: HashMap<String, usize> = types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        resolve_references(&mut types, &by_name)?;

        let by_id = types.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        let mut layout = Self {
            locales: def.locales.clone(),
            types,
            by_name,
            by_id,
            next_type_id,
            descriptor: Vec::new(),
            hash: 0,
        };
        layout.descriptor = packed::pack(&layout);
        layout.hash = hash64(&layout.descriptor);

        debug!(
            types = layout.types.len(),
            locales = layout.locales.len(),
            hash = layout.hash,
            "compiled schema layout"
        );
        Ok(layout)
    }

    pub fn get(&self, name: &str) -> Option<&TypeLayout> {
        self.by_name.get(name).map(|&i| &self.types[i])
    }

    pub fn type_layout(&self, name: &str) -> Result<&TypeLayout, SchemaError> {
        self.get(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))
    }

    pub fn by_id(&self, id: u16) -> Option<&TypeLayout> {
        self.by_id.get(&id).map(|&i| &self.types[i])
    }

    pub fn types(&self) -> &[TypeLayout] {
        &self.types
    }

    pub fn locales(&self) -> &[String] {
        &self.locales
    }

    /// Locale slot of a declared locale: declared index + 1.
    pub fn locale_slot(&self, locale: &str) -> Option<u8> {
        self.locales
            .iter()
            .position(|l| l == locale)
            .map(|i| i as u8 + 1)
    }

    pub fn locale_count(&self) -> u8 {
        self.locales.len() as u8 + 1
    }

    pub fn descriptor(&self) -> &[u8] {
        &self.descriptor
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

fn validate_locales(locales: &[String]) -> Result<(), SchemaError> {
    if locales.len() >= u8::MAX as usize {
        return Err(SchemaError::InvalidDefinition {
            path: "locales".into(),
            reason: "too many locales".into(),
        });
    }
    let mut seen = HashSet::new();
    for l in locales {
        if l.is_empty() || !seen.insert(l.as_str()) {
            return Err(SchemaError::InvalidDefinition {
                path: "locales".into(),
                reason: format!("locale '{l}' is empty or declared twice"),
            });
        }
    }
    Ok(())
}

pub fn compile_type(
    def: &TypeDef,
    id: u16,
    locales: &[String],
    previous: Option<&TypeLayout>,
) -> Result<TypeLayout, SchemaError> {
    let ctx = TableCtx {
        owner: &def.name,
        locales,
        edge: false,
    };
    let fields = build_table(&ctx, &def.props, previous.map(|p| &p.fields))?;
    let locale_count = locales.len() as u8 + 1;

    let mut sort_slots = Vec::new();
    for f in fields.by_number_order() {
        match f.tag {
            TypeTag::String | TypeTag::Alias if f.separate => sort_slots.push(SortSlot {
                field: f.number,
                locale: 0,
            }),
            TypeTag::Text => {
                sort_slots.extend((0..locale_count).map(|locale| SortSlot {
                    field: f.number,
                    locale,
                }));
            }
            _ => {}
        }
    }

    Ok(TypeLayout {
        name: def.name.clone(),
        id,
        fields,
        locale_count,
        sort_slots,
    })
}

struct TableCtx<'a> {
    owner: &'a str,
    locales: &'a [String],
    edge: bool,
}

struct Leaf<'a> {
    path: Vec<String>,
    prop: &'a PropDef,
}

fn invalid(path: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidDefinition {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn flatten<'a>(
    ctx: &TableCtx<'_>,
    props: &'a [PropDef],
    prefix: &[String],
    out: &mut Vec<Leaf<'a>>,
) -> Result<(), SchemaError> {
    let mut names = HashSet::new();
    for prop in props {
        let mut path = prefix.to_vec();
        path.push(prop.name.clone());
        let dotted = path.join(".");

        if prop.name.is_empty() || prop.name.contains('.') || prop.name.contains('*') {
            return Err(invalid(&dotted, "property names must be non-empty and plain"));
        }
        if !names.insert(prop.name.as_str()) {
            return Err(invalid(&dotted, "property declared twice"));
        }
        if ctx.edge != prop.name.starts_with('$') {
            let reason = if ctx.edge {
                "edge property names start with '$'"
            } else {
                "'$' names are reserved for edge properties"
            };
            return Err(invalid(&dotted, reason));
        }
        if prefix.is_empty() && (prop.name == "id" || prop.name == "type") {
            return Err(invalid(&dotted, "'id' and 'type' are reserved"));
        }

        if prop.kind == TypeTag::Object {
            if ctx.edge {
                return Err(SchemaError::UnsupportedKind {
                    field: dotted,
                    kind: prop.kind,
                });
            }
            flatten(ctx, &prop.props, &path, out)?;
            continue;
        }
        if !prop.kind.is_definable() || (ctx.edge && prop.kind.is_reference()) {
            return Err(SchemaError::UnsupportedKind {
                field: dotted,
                kind: prop.kind,
            });
        }
        out.push(Leaf { path, prop });
    }
    Ok(())
}

/// Main width of a leaf, or `None` when it is separate.
fn placement(ctx: &TableCtx<'_>, name: &str, prop: &PropDef) -> Result<Option<u16>, SchemaError> {
    if let Some(width) = prop.kind.fixed_size() {
        if prop.kind == TypeTag::Enum
            && (prop.values.is_empty() || prop.values.len() > MAX_ENUM_VALUES)
        {
            return Err(invalid(name, "enum needs between 1 and 254 values"));
        }
        return Ok(Some(width as u16));
    }
    match prop.kind {
        TypeTag::MicroBuffer => match prop.size {
            Some(size) if size > 0 => Ok(Some(size)),
            _ => Err(invalid(name, "micro-buffer needs a size")),
        },
        TypeTag::String => Ok(prop
            .max_bytes
            .filter(|&m| m > 0 && m <= MAIN_STRING_MAX_BYTES)
            .map(|m| m + 1)),
        TypeTag::Vector | TypeTag::Colvec => {
            let spec = vector_spec(name, prop)?;
            let fits = spec.byte_len() <= MAIN_VECTOR_MAX_BYTES;
            Ok((prop.kind == TypeTag::Vector && fits).then_some(spec.byte_len() as u16))
        }
        TypeTag::Text if ctx.locales.is_empty() => {
            Err(invalid(name, "text fields need at least one declared locale"))
        }
        TypeTag::Reference | TypeTag::References if prop.target.is_none() => {
            Err(invalid(name, "references need a target type"))
        }
        _ => Ok(None),
    }
}

fn vector_spec(name: &str, prop: &PropDef) -> Result<VectorSpec, SchemaError> {
    match (prop.base, prop.size) {
        (Some(base), Some(size)) if size > 0 => Ok(VectorSpec { base, size }),
        _ => Err(invalid(name, "vectors need a base type and a size")),
    }
}

fn build_table(
    ctx: &TableCtx<'_>,
    props: &[PropDef],
    previous: Option<&FieldTable>,
) -> Result<FieldTable, SchemaError> {
    let mut leaves = Vec::new();
    flatten(ctx, props, &[], &mut leaves)?;

    let mut next_field = previous.map_or(1, |p| p.next_field());
    let mut main_cursor = previous.map_or(0, |p| p.main_len() as usize);
    let mut used = HashSet::new();
    let mut fields = Vec::with_capacity(leaves.len());
    let mut root: BTreeMap<String, ObjectNode> = BTreeMap::new();

    for (index, leaf) in leaves.iter().enumerate() {
        let name = leaf.path.join(".");
        let prop = leaf.prop;
        let width = placement(ctx, &name, prop)?;
        let separate = width.is_none();

        let edges = if prop.edges.is_empty() {
            None
        } else {
            let edge_ctx = TableCtx {
                owner: ctx.owner,
                locales: ctx.locales,
                edge: true,
            };
            let prev_edges = previous.and_then(|p| p.get(&name)).and_then(|f| f.edges());
            Some(Arc::new(build_table(&edge_ctx, &prop.edges, prev_edges)?))
        };

        let mut desc = FieldDescriptor {
            path: leaf.path.clone(),
            name: name.clone(),
            number: 0,
            tag: prop.kind,
            separate,
            offset: 0,
            len: width.unwrap_or(0),
            compression: prop.compression,
            default: prop.default.as_ref().map(Value::from_json),
            min: prop.min,
            max: prop.max,
            max_bytes: prop.max_bytes,
            enum_values: prop.values.clone().into(),
            vector: match prop.kind {
                TypeTag::Vector | TypeTag::Colvec => Some(vector_spec(&name, prop)?),
                _ => None,
            },
            reference: prop
                .target
                .as_ref()
                .filter(|_| prop.kind.is_reference())
                .map(|target| RefInfo {
                    target: target.clone(),
                    target_id: 0,
                    inverse: prop.inverse.clone(),
                    inverse_field: 0,
                    edges,
                }),
            on: prop.on.filter(|_| prop.kind == TypeTag::Timestamp),
            validation: prop.validation.clone(),
            hook: prop.hook.clone(),
            codec: codec_for(prop.kind, separate),
        };

        let reused = previous
            .and_then(|p| p.get(&name))
            .filter(|old| old.same_shape(&desc) && !used.contains(&old.number));
        match reused {
            Some(old) => {
                desc.number = old.number;
                desc.offset = old.offset;
            }
            None => {
                if next_field > MAX_FIELD_NUMBER {
                    return Err(SchemaError::FieldSpaceExhausted(ctx.owner.to_string()));
                }
                desc.number = next_field as u8;
                next_field += 1;
                if !separate {
                    desc.offset = main_cursor as u16;
                    main_cursor += desc.len as usize;
                    if main_cursor > MAX_MAIN_LEN {
                        return Err(invalid(&name, "main region exceeds 65535 bytes"));
                    }
                }
            }
        }
        used.insert(desc.number);
        insert_node(&mut root, &leaf.path, index);
        fields.push(desc);
    }

    let mut retired: Vec<u8> = previous.map_or_else(Vec::new, |p| p.retired().to_vec());
    if let Some(prev) = previous {
        retired.extend(prev.iter().map(|f| f.number).filter(|n| !used.contains(n)));
        retired.sort_unstable();
        retired.dedup();
    }

    let main_len = main_cursor as u16;
    Ok(FieldTable::new(
        fields,
        ObjectNode::Object(root),
        main_len,
        next_field,
        retired,
    ))
}

fn insert_node(root: &mut BTreeMap<String, ObjectNode>, path: &[String], index: usize) {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut level = root;
    for key in parents {
        let node = level
            .entry(key.clone())
            .or_insert_with(ObjectNode::default);
        level = match node {
            ObjectNode::Object(children) => children,
            ObjectNode::Field(_) => return,
        };
    }
    level.insert(last.clone(), ObjectNode::Field(index));
}

struct RefFixup {
    type_index: usize,
    field_index: usize,
    target_id: u16,
    inverse_field: u8,
    shared_edges: Option<Arc<FieldTable>>,
}

fn resolve_references(
    types: &mut [TypeLayout],
    by_name: &HashMap<String, usize>,
) -> Result<(), SchemaError> {
    let mut fixups = Vec::new();

    for (type_index, layout) in types.iter().enumerate() {
        for (field_index, field) in layout.fields.iter().enumerate() {
            let Some(info) = &field.reference else {
                continue;
            };
            let target = by_name
                .get(&info.target)
                .map(|&i| &types[i])
                .ok_or_else(|| SchemaError::UnknownType(info.target.clone()))?;

            let mut inverse_field = 0;
            let mut shared_edges = None;
            if let Some(inverse) = &info.inverse {
                let inv = target.field(inverse)?;
                let points_back = inv
                    .reference
                    .as_ref()
                    .is_some_and(|r| r.target == layout.name);
                if !points_back {
                    return Err(invalid(
                        &format!("{}.{}", layout.name, field.name),
                        format!("inverse '{}.{}' does not reference back", target.name, inverse),
                    ));
                }
                inverse_field = inv.number;
                if info.edges.is_none() {
                    shared_edges = inv.reference.as_ref().and_then(|r| r.edges.clone());
                }
            }
            fixups.push(RefFixup {
                type_index,
                field_index,
                target_id: target.id,
                inverse_field,
                shared_edges,
            });
        }
    }

    for fix in fixups {
        let field = &mut types[fix.type_index].fields.fields_mut()[fix.field_index];
        if let Some(info) = field.reference.as_mut() {
            info.target_id = fix.target_id;
            info.inverse_field = fix.inverse_field;
            if fix.shared_edges.is_some() {
                info.edges = fix.shared_edges;
            }
        }
    }
    Ok(())
}
