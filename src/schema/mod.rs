//! # Schema Module
//!
//! The schema layout compiler. It turns logical type definitions into the
//! numbered, placed field layouts that every other part of the codec reads.
//!
//! ## Components
//!
//! - [`definition`]: serde-loadable `SchemaDef` / `TypeDef` / `PropDef`
//! - [`layout`]: compiled `TypeLayout`, `FieldTable` and `FieldDescriptor`
//! - [`compiler`]: numbering, placement, migration and reference resolution
//! - [`packed`]: the descriptor sent to the engine and its parser
//!
//! ## Field Numbering Invariant
//!
//! A field number, once assigned within a type, only ever means that field.
//! Migrations append numbers and retire numbers; they never renumber, because
//! stored records and mutation streams address fields by number.

pub mod compiler;
pub mod definition;
pub mod layout;
pub mod packed;

pub use compiler::SchemaLayout;
pub use definition::{
    Compression, FieldHook, Predicate, PropDef, SchemaDef, TimestampHook, TypeDef,
};
pub use layout::{
    FieldDescriptor, FieldTable, ObjectNode, RefInfo, SortSlot, TypeLayout, VectorSpec,
};
pub use packed::{PackedField, PackedRef, PackedSchema, PackedType};

#[cfg(test)]
mod tests;
