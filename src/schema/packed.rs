//! # Packed Schema Descriptor
//!
//! The language-agnostic form of a [`SchemaLayout`] handed to the engine
//! through `set_schema`. Names are not included: the engine addresses types
//! and fields by number only.
//!
//! ```text
//! Descriptor := "QDB1" version:u8 locale_count:u8 type_count:u16 TypeBlock*
//! TypeBlock  := type_id:u16 main_len:u16 field_count:u8 FieldEntry*
//!               sort_count:u16 (field:u8 locale:u8)*
//! FieldEntry := field:u8 tag:u8 flags:u8 offset:u16 len:u16 extra
//!
//! flags: bit0 separate, bit1 compressed, bit2 sortable
//! extra:
//!   reference, references  target:u16 inverse:u8 edge_main_len:u16
//!                          edge_count:u8 FieldEntry*
//!   vector, colvec         base:u8 size:u16
//!   enum                   value_count:u8
//! ```

use eyre::{bail, ensure, Result};

use super::compiler::SchemaLayout;
use super::definition::Compression;
use super::layout::FieldTable;
use crate::encoding::{ByteReader, PutLe};
use crate::types::{TypeTag, VectorBase};

pub const DESCRIPTOR_MAGIC: &[u8; 4] = b"QDB1";
pub const DESCRIPTOR_VERSION: u8 = 1;

pub const FLAG_SEPARATE: u8 = 0x01;
pub const FLAG_COMPRESSED: u8 = 0x02;
pub const FLAG_SORTABLE: u8 = 0x04;

pub fn pack(layout: &SchemaLayout) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.put_bytes(DESCRIPTOR_MAGIC);
    out.put_u8(DESCRIPTOR_VERSION);
    out.put_u8(layout.locale_count());
    out.put_u16(layout.types().len() as u16);

    for t in layout.types() {
        out.put_u16(t.id);
        out.put_u16(t.main_len());
        pack_fields(&t.fields, &mut out);
        out.put_u16(t.sort_slots.len() as u16);
        for slot in &t.sort_slots {
            out.put_u8(slot.field);
            out.put_u8(slot.locale);
        }
    }
    out
}

fn pack_fields(table: &FieldTable, out: &mut Vec<u8>) {
    let fields = table.by_number_order();
    out.put_u8(fields.len() as u8);
    for f in fields {
        let mut flags = 0;
        if f.separate {
            flags |= FLAG_SEPARATE;
        }
        if f.compression == Compression::Deflate
            && matches!(f.tag, TypeTag::String | TypeTag::Text | TypeTag::Alias)
        {
            flags |= FLAG_COMPRESSED;
        }
        if f.sortable() {
            flags |= FLAG_SORTABLE;
        }
        out.put_u8(f.number);
        out.put_u8(f.tag.code());
        out.put_u8(flags);
        out.put_u16(f.offset);
        out.put_u16(f.len);

        match f.tag {
            TypeTag::Reference | TypeTag::References => {
                let (target, inverse) = f
                    .reference
                    .as_ref()
                    .map_or((0, 0), |r| (r.target_id, r.inverse_field));
                out.put_u16(target);
                out.put_u8(inverse);
                match f.edges() {
                    Some(edges) => {
                        out.put_u16(edges.main_len());
                        pack_fields(edges, out);
                    }
                    None => {
                        out.put_u16(0);
                        out.put_u8(0);
                    }
                }
            }
            TypeTag::Vector | TypeTag::Colvec => {
                let (base, size) = f.vector.map_or((0, 0), |v| (v.base as u8, v.size));
                out.put_u8(base);
                out.put_u16(size);
            }
            TypeTag::Enum => out.put_u8(f.enum_values.len() as u8),
            _ => {}
        }
    }
}

/// Engine-side view of a packed descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedSchema {
    pub locale_count: u8,
    pub types: Vec<PackedType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackedType {
    pub type_id: u16,
    pub main_len: u16,
    pub fields: Vec<PackedField>,
    pub sort_slots: Vec<(u8, u8)>,
}

impl PackedType {
    pub fn field(&self, number: u8) -> Option<&PackedField> {
        self.fields.iter().find(|f| f.field == number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackedField {
    pub field: u8,
    pub tag: TypeTag,
    pub flags: u8,
    pub offset: u16,
    pub len: u16,
    pub reference: Option<PackedRef>,
    pub vector: Option<(VectorBase, u16)>,
    pub enum_count: Option<u8>,
}

impl PackedField {
    pub fn separate(&self) -> bool {
        self.flags & FLAG_SEPARATE != 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackedRef {
    pub target: u16,
    pub inverse: u8,
    pub edge_main_len: u16,
    pub edges: Vec<PackedField>,
}

impl PackedRef {
    pub fn edge(&self, number: u8) -> Option<&PackedField> {
        self.edges.iter().find(|f| f.field == number)
    }
}

impl PackedSchema {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        ensure!(
            r.bytes(4)? == DESCRIPTOR_MAGIC,
            "schema descriptor has a bad magic"
        );
        let version = r.u8()?;
        ensure!(
            version == DESCRIPTOR_VERSION,
            "unsupported schema descriptor version {}",
            version
        );
        let locale_count = r.u8()?;
        let type_count = r.u16()?;
        let mut types = Vec::with_capacity(type_count as usize);
        for _ in 0..type_count {
            let type_id = r.u16()?;
            let main_len = r.u16()?;
            let fields = parse_fields(&mut r)?;
            let sort_count = r.u16()?;
            let mut sort_slots = Vec::with_capacity(sort_count as usize);
            for _ in 0..sort_count {
                sort_slots.push((r.u8()?, r.u8()?));
            }
            types.push(PackedType {
                type_id,
                main_len,
                fields,
                sort_slots,
            });
        }
        ensure!(r.is_empty(), "trailing bytes after schema descriptor");
        Ok(Self {
            locale_count,
            types,
        })
    }

    pub fn get(&self, type_id: u16) -> Option<&PackedType> {
        self.types.iter().find(|t| t.type_id == type_id)
    }
}

fn parse_fields(r: &mut ByteReader<'_>) -> Result<Vec<PackedField>> {
    let count = r.u8()?;
    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let field = r.u8()?;
        let code = r.u8()?;
        let Some(tag) = TypeTag::from_u8(code) else {
            bail!("unknown type tag {} in schema descriptor", code);
        };
        let flags = r.u8()?;
        let offset = r.u16()?;
        let len = r.u16()?;
        let mut entry = PackedField {
            field,
            tag,
            flags,
            offset,
            len,
            reference: None,
            vector: None,
            enum_count: None,
        };
        match tag {
            TypeTag::Reference | TypeTag::References => {
                let target = r.u16()?;
                let inverse = r.u8()?;
                let edge_main_len = r.u16()?;
                let edges = parse_fields(r)?;
                entry.reference = Some(PackedRef {
                    target,
                    inverse,
                    edge_main_len,
                    edges,
                });
            }
            TypeTag::Vector | TypeTag::Colvec => {
                let code = r.u8()?;
                let Some(base) = VectorBase::from_u8(code) else {
                    bail!("unknown vector base {} in schema descriptor", code);
                };
                entry.vector = Some((base, r.u16()?));
            }
            TypeTag::Enum => entry.enum_count = Some(r.u8()?),
            _ => {}
        }
        fields.push(entry);
    }
    Ok(fields)
}
