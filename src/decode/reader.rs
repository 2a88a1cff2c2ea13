//! # Reader Schemas
//!
//! A `ReaderSchema` mirrors exactly what a compiled query asked the engine to
//! return, so the decoder never consults the full type layout. It is built by
//! the query compiler alongside the include section and shares its order:
//! main reads by offset, separate reads by field number, then references.
//!
//! Every node carries a process-unique `read_id`. The decode arena keys its
//! per-reader lookup tables on it, so two readers never share a table even
//! when they describe the same type.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::codec::FieldCodec;
use crate::query::{AggFn, QueryKind};
use crate::schema::{FieldDescriptor, VectorSpec};
use crate::types::TypeTag;

static NEXT_READ_ID: AtomicU32 = AtomicU32::new(1);

pub(crate) fn next_read_id() -> u32 {
    NEXT_READ_ID.fetch_add(1, Ordering::Relaxed)
}

/// One field the decoder may find in a result record.
#[derive(Debug, Clone)]
pub struct ReadField {
    /// Key in the decoded record, dotted for object members.
    pub name: String,
    pub path: Vec<String>,
    pub field: u8,
    pub tag: TypeTag,
    pub separate: bool,
    pub offset: u16,
    pub len: u16,
    pub enum_values: Arc<[String]>,
    pub vector: Option<VectorSpec>,
    /// Requested locale slot; 0 reads every locale.
    pub locale: u8,
    pub locales: Arc<[String]>,
    /// Char range `start..end` applied to decoded strings.
    pub slice: Option<(usize, Option<usize>)>,
    pub codec: &'static FieldCodec,
}

impl ReadField {
    pub fn from_descriptor(desc: &FieldDescriptor, locales: Arc<[String]>) -> Self {
        Self {
            name: desc.name.clone(),
            path: desc.path.clone(),
            field: desc.number,
            tag: desc.tag,
            separate: desc.separate,
            offset: desc.offset,
            len: desc.len,
            enum_values: desc.enum_values.clone(),
            vector: desc.vector,
            locale: 0,
            locales,
            slice: None,
            codec: desc.codec,
        }
    }

    /// The main-region bytes of this field, if the region is long enough.
    pub fn main_slice<'a>(&self, main: &'a [u8]) -> Option<&'a [u8]> {
        let start = self.offset as usize;
        main.get(start..start + self.len as usize)
    }
}

#[derive(Debug, Clone)]
pub struct ReadRef {
    pub name: String,
    pub path: Vec<String>,
    pub field: u8,
    /// `references` (a list) rather than `reference`.
    pub multi: bool,
    pub reader: Arc<ReaderSchema>,
}

#[derive(Debug, Clone)]
pub struct ReadAggFn {
    pub func: AggFn,
    /// Field the function runs over; empty for the root count.
    pub field: String,
    pub slot: u16,
    pub width: u8,
}

#[derive(Debug, Clone)]
pub struct ReadAggregate {
    pub group: Option<ReadField>,
    pub fns: Vec<ReadAggFn>,
    pub acc_size: u16,
}

#[derive(Debug, Clone)]
pub struct ReaderSchema {
    pub read_id: u32,
    pub type_name: String,
    pub type_id: u16,
    pub kind: QueryKind,
    pub main: Vec<ReadField>,
    pub separate: Vec<ReadField>,
    pub refs: Vec<ReadRef>,
    /// Edge properties of records reached through a reference.
    pub edges: Option<Arc<ReaderSchema>>,
    pub aggregate: Option<ReadAggregate>,
}

impl ReaderSchema {
    pub fn new(type_name: impl Into<String>, type_id: u16, kind: QueryKind) -> Self {
        Self {
            read_id: next_read_id(),
            type_name: type_name.into(),
            type_id,
            kind,
            main: Vec::new(),
            separate: Vec::new(),
            refs: Vec::new(),
            edges: None,
            aggregate: None,
        }
    }

    pub fn has_main(&self) -> bool {
        !self.main.is_empty()
    }

    pub fn separate_field(&self, number: u8) -> Option<&ReadField> {
        self.separate.iter().find(|f| f.field == number)
    }

    pub fn ref_field(&self, number: u8) -> Option<&ReadRef> {
        self.refs.iter().find(|r| r.field == number)
    }

    /// Reads of every kind, by name.
    pub fn field_named(&self, name: &str) -> Option<&ReadField> {
        self.main
            .iter()
            .chain(self.separate.iter())
            .find(|f| f.name == name)
    }

    pub fn ref_named(&self, name: &str) -> Option<&ReadRef> {
        self.refs.iter().find(|r| r.name == name)
    }

    /// Greatest reference nesting below this reader.
    pub fn depth(&self) -> usize {
        self.refs
            .iter()
            .map(|r| 1 + r.reader.depth())
            .max()
            .unwrap_or(0)
    }
}
