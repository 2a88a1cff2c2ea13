//! Caller-owned scratch space for materializing results.
//!
//! Decompression buffers live in a bump arena that is reset between
//! decodes, and the field-number lookup of every reader schema is built once
//! per `read_id` and reused by every record read with it.

use bumpalo::Bump;
use hashbrown::HashMap;

use super::reader::ReaderSchema;

/// Field number to `index + 1` into `ReaderSchema::separate`; 0 when absent.
type SlotTable = Box<[u8; 256]>;

#[derive(Default)]
pub struct DecodeArena {
    bump: Bump,
    tables: HashMap<u32, SlotTable>,
}

impl DecodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self) -> &Bump {
        &self.bump
    }

    /// Position of `field` in the reader's separate reads.
    pub fn separate_index(&mut self, reader: &ReaderSchema, field: u8) -> Option<usize> {
        let table = self.tables.entry(reader.read_id).or_insert_with(|| {
            let mut table = Box::new([0u8; 256]);
            for (i, read) in reader.separate.iter().enumerate() {
                table[read.field as usize] = (i + 1) as u8;
            }
            table
        });
        match table[field as usize] {
            0 => None,
            n => Some(n as usize - 1),
        }
    }

    pub fn cached_tables(&self) -> usize {
        self.tables.len()
    }

    /// Frees decompression scratch. Lookup tables survive.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    pub fn clear(&mut self) {
        self.bump.reset();
        self.tables.clear();
    }
}

impl std::fmt::Debug for DecodeArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeArena")
            .field("allocated", &self.bump.allocated_bytes())
            .field("tables", &self.tables.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::decode::ReadField;
    use crate::query::QueryKind;
    use crate::schema::{PropDef, SchemaDef, SchemaLayout, TypeDef};

    #[test]
    fn tables_are_cached_per_reader() {
        let def = SchemaDef::new().with_type(
            TypeDef::new("note")
                .prop(PropDef::string("a"))
                .prop(PropDef::string("b")),
        );
        let schema = SchemaLayout::compile(&def, None).unwrap();
        let note = schema.get("note").unwrap();
        let locales: Arc<[String]> = Arc::from(Vec::<String>::new());
        let b = note.field("b").unwrap();

        let mut reader = ReaderSchema::new("note", note.id, QueryKind::Default);
        reader.separate.push(ReadField::from_descriptor(b, locales));

        let mut arena = DecodeArena::new();
        assert_eq!(arena.separate_index(&reader, b.number), Some(0));
        assert_eq!(arena.separate_index(&reader, note.field("a").unwrap().number), None);
        assert_eq!(arena.cached_tables(), 1);

        let other = ReaderSchema::new("note", note.id, QueryKind::Default);
        assert_eq!(arena.separate_index(&other, b.number), None);
        assert_eq!(arena.cached_tables(), 2);

        arena.reset();
        assert_eq!(arena.cached_tables(), 2);
        arena.clear();
        assert_eq!(arena.cached_tables(), 0);
    }
}
