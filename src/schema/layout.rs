//! # Compiled Layouts
//!
//! The output of the layout compiler. A [`TypeLayout`] answers every question
//! the encoders and the query compiler ask about a record type:
//!
//! - which number and tag a field has on the wire
//! - whether it lives in the main region (fixed offset) or is separate
//! - which codec encodes, validates and decodes it
//! - which (field, locale) pairs have a sort-presence slot
//!
//! ## Main Region
//!
//! ```text
//! offset 0                                             main_len
//! +----------+--------+-------------+------+---------------+
//! | age (8)  | ok (1) | name (41)   | hole | added later   |
//! +----------+--------+-------------+------+---------------+
//! ```
//!
//! Offsets never move once assigned. Fields added by a migration are appended
//! after the previous `main_len`; removed fields leave holes.
//!
//! ## Field Tables
//!
//! [`FieldTable`] holds the descriptors of one numbering space. Record types
//! have one, and so does every reference with edge properties: edge fields are
//! numbered independently and carry their own small main region.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;

use super::definition::{Compression, FieldHook, Predicate, TimestampHook};
use crate::codec::FieldCodec;
use crate::error::SchemaError;
use crate::types::{TypeTag, Value, VectorBase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorSpec {
    pub base: VectorBase,
    /// Declared element count.
    pub size: u16,
}

impl VectorSpec {
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.size as usize * self.base.width()
    }
}

#[derive(Debug, Clone)]
pub struct RefInfo {
    pub target: String,
    pub target_id: u16,
    pub inverse: Option<String>,
    /// Field number of the inverse on the target type, 0 when there is none.
    pub inverse_field: u8,
    pub edges: Option<Arc<FieldTable>>,
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Property names from the root, one per object level.
    pub path: Vec<String>,
    /// Dotted form of `path`.
    pub name: String,
    pub number: u8,
    pub tag: TypeTag,
    pub separate: bool,
    pub offset: u16,
    pub len: u16,
    pub compression: Compression,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub max_bytes: Option<u16>,
    pub enum_values: Arc<[String]>,
    pub vector: Option<VectorSpec>,
    pub reference: Option<RefInfo>,
    pub on: Option<TimestampHook>,
    pub validation: Option<Predicate>,
    pub hook: Option<FieldHook>,
    pub codec: &'static FieldCodec,
}

impl FieldDescriptor {
    #[inline]
    pub fn is_main(&self) -> bool {
        !self.separate
    }

    /// Separate fields the engine keeps a sort index for.
    pub fn sortable(&self) -> bool {
        self.separate && matches!(self.tag, TypeTag::String | TypeTag::Alias | TypeTag::Text)
    }

    pub fn edges(&self) -> Option<&FieldTable> {
        self.reference.as_ref().and_then(|r| r.edges.as_deref())
    }

    pub fn enum_index(&self, name: &str) -> Option<usize> {
        self.enum_values.iter().position(|v| v == name)
    }

    /// Two descriptors with the same shape can share a field number across
    /// schema versions.
    pub(crate) fn same_shape(&self, other: &FieldDescriptor) -> bool {
        self.tag == other.tag
            && self.separate == other.separate
            && self.len == other.len
            && self.vector == other.vector
            && self.reference.as_ref().map(|r| &r.target) == other.reference.as_ref().map(|r| &r.target)
    }
}

/// Mirror of the object nesting of a definition.
#[derive(Debug, Clone)]
pub enum ObjectNode {
    /// Index into the owning table's descriptors.
    Field(usize),
    Object(BTreeMap<String, ObjectNode>),
}

impl Default for ObjectNode {
    fn default() -> Self {
        ObjectNode::Object(BTreeMap::new())
    }
}

impl ObjectNode {
    pub fn child(&self, key: &str) -> Option<&ObjectNode> {
        match self {
            ObjectNode::Object(children) => children.get(key),
            ObjectNode::Field(_) => None,
        }
    }

    /// Descriptor indices of every leaf below this node, in name order.
    pub fn leaves(&self, out: &mut Vec<usize>) {
        match self {
            ObjectNode::Field(i) => out.push(*i),
            ObjectNode::Object(children) => children.values().for_each(|c| c.leaves(out)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, usize>,
    by_number: HashMap<u8, usize>,
    root: ObjectNode,
    main_len: u16,
    next_field: u16,
    retired: Vec<u8>,
}

impl FieldTable {
    pub(crate) fn new(
        fields: Vec<FieldDescriptor>,
        root: ObjectNode,
        main_len: u16,
        next_field: u16,
        retired: Vec<u8>,
    ) -> Self {
        let by_name = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let by_number = fields.iter().enumerate().map(|(i, f)| (f.number, i)).collect();
        Self {
            fields,
            by_name,
            by_number,
            root,
            main_len,
            next_field,
            retired,
        }
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    #[inline]
    pub fn by_number(&self, number: u8) -> Option<&FieldDescriptor> {
        self.by_number.get(&number).map(|&i| &self.fields[i])
    }

    #[inline]
    pub fn at(&self, index: usize) -> &FieldDescriptor {
        &self.fields[index]
    }

    /// Descriptors in definition traversal order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Descriptors in field-number order.
    pub fn by_number_order(&self) -> Vec<&FieldDescriptor> {
        let mut out: Vec<_> = self.fields.iter().collect();
        out.sort_by_key(|f| f.number);
        out
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[inline]
    pub fn main_len(&self) -> u16 {
        self.main_len
    }

    #[inline]
    pub fn next_field(&self) -> u16 {
        self.next_field
    }

    pub fn retired(&self) -> &[u8] {
        &self.retired
    }

    pub fn root(&self) -> &ObjectNode {
        &self.root
    }

    /// Resolves a dotted path to a node of the object tree.
    pub fn node(&self, path: &str) -> Option<&ObjectNode> {
        path.split('.').try_fold(&self.root, |node, key| node.child(key))
    }

    pub(crate) fn fields_mut(&mut self) -> &mut [FieldDescriptor] {
        &mut self.fields
    }

    /// Main region with every main field set to its default.
    pub fn default_main(&self) -> Vec<u8> {
        let mut main = vec![0u8; self.main_len as usize];
        for f in self.fields.iter().filter(|f| f.is_main()) {
            if let Some(default) = &f.default {
                let slot = &mut main[f.offset as usize..(f.offset + f.len) as usize];
                (f.codec.fill_main)(f, default, slot);
            }
        }
        main
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortSlot {
    pub field: u8,
    pub locale: u8,
}

#[derive(Debug, Clone)]
pub struct TypeLayout {
    pub name: String,
    pub id: u16,
    pub fields: FieldTable,
    /// Declared locales plus the "any locale" slot 0.
    pub locale_count: u8,
    pub sort_slots: Vec<SortSlot>,
}

impl TypeLayout {
    pub fn field(&self, name: &str) -> Result<&FieldDescriptor, SchemaError> {
        self.fields.get(name).ok_or_else(|| SchemaError::UnknownField {
            type_name: self.name.clone(),
            field: name.to_string(),
        })
    }

    #[inline]
    pub fn main_len(&self) -> u16 {
        self.fields.main_len()
    }

    pub fn sort_slot(&self, field: u8, locale: u8) -> Option<usize> {
        self.sort_slots
            .iter()
            .position(|s| s.field == field && s.locale == locale)
    }

    /// Whether any field stamps or rewrites values before encoding.
    pub fn has_hooks(&self) -> bool {
        self.fields.iter().any(|f| f.on.is_some() || f.hook.is_some())
    }
}
