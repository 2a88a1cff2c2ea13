//! # Result Index
//!
//! First decode phase. One pass over the result bytes checks the framing
//! against the reader schema and records byte ranges; no payload is decoded.
//!
//! ```text
//! Result := count:u32 Record*
//! Record := id:u32 len:u32 Item*
//! Item   := 0x00 len:u32 main-bytes
//!         | field:u8 len:u32 payload                 field in 1..=250
//!         | 255 field:u8 len:u32 [Record]            empty body is a null reference
//!         | 254 field:u8 len:u32 count:u32 Record*
//!         | 253 len:u32 Item*                        edge properties
//! ```
//!
//! Nesting is bounded by the reader schema: every nested record is parsed
//! with the nested reader, so hostile input cannot recurse deeper than the
//! query that produced the reader.

use std::ops::Range;

use smallvec::SmallVec;

use crate::config::{EDGE_BLOCK_MARKER, MAIN_FIELD, MAX_FIELD_NUMBER, MULTI_REF_MARKER, SINGLE_REF_MARKER};
use crate::encoding::ByteReader;
use crate::error::DecodeError;

use super::reader::ReaderSchema;

/// Byte ranges of one record, absolute within the result buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordIndex {
    pub id: u32,
    pub main: Option<Range<usize>>,
    /// Separate payloads by field number; text fields repeat once per locale.
    pub items: SmallVec<[(u8, Range<usize>); 8]>,
    pub refs: SmallVec<[RefIndex; 2]>,
    pub edges: Option<Box<RecordIndex>>,
}

impl RecordIndex {
    pub fn items_of(&self, field: u8) -> impl Iterator<Item = &Range<usize>> {
        self.items
            .iter()
            .filter(move |(f, _)| *f == field)
            .map(|(_, r)| r)
    }

    pub fn ref_of(&self, field: u8) -> Option<&RefIndex> {
        self.refs.iter().find(|r| r.field == field)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefIndex {
    pub field: u8,
    /// At most one record for a single reference.
    pub records: Vec<RecordIndex>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultIndex {
    pub records: Vec<RecordIndex>,
}

fn unexpected(offset: usize, marker: u8) -> DecodeError {
    DecodeError::UnexpectedMarker { offset, marker }
}

/// A reader over `bytes[start..end]` reporting absolute offsets.
fn window(bytes: &[u8], range: Range<usize>) -> Result<ByteReader<'_>, DecodeError> {
    let slice = bytes.get(..range.end).ok_or(DecodeError::Truncated {
        offset: range.start,
        needed: range.end.saturating_sub(bytes.len()),
    })?;
    let mut r = ByteReader::new(slice);
    r.skip(range.start)?;
    Ok(r)
}

/// Reads `len:u32` and returns the range of the body that follows.
fn body(r: &mut ByteReader<'_>) -> Result<Range<usize>, DecodeError> {
    let len = r.u32()? as usize;
    let start = r.position();
    r.skip(len)?;
    Ok(start..start + len)
}

impl ResultIndex {
    pub fn build(reader: &ReaderSchema, bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(bytes);
        let count = r.u32()? as usize;
        // Every record carries at least its 8-byte head.
        if count.saturating_mul(8) > r.remaining() {
            return Err(DecodeError::Truncated {
                offset: r.position(),
                needed: count.saturating_mul(8) - r.remaining(),
            });
        }
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(record(reader, bytes, &mut r)?);
        }
        if !r.is_empty() {
            return Err(unexpected(r.position(), bytes[r.position()]));
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn record(reader: &ReaderSchema, bytes: &[u8], r: &mut ByteReader<'_>) -> Result<RecordIndex, DecodeError> {
    let id = r.u32()?;
    let range = body(r)?;
    let mut index = RecordIndex {
        id,
        ..RecordIndex::default()
    };
    items(reader, bytes, range, &mut index, true)?;
    Ok(index)
}

fn items(
    reader: &ReaderSchema,
    bytes: &[u8],
    range: Range<usize>,
    index: &mut RecordIndex,
    allow_edges: bool,
) -> Result<(), DecodeError> {
    let mut r = window(bytes, range)?;
    while !r.is_empty() {
        let at = r.position();
        let marker = r.u8()?;
        match marker {
            MAIN_FIELD => {
                if !reader.has_main() || index.main.is_some() {
                    return Err(unexpected(at, marker));
                }
                index.main = Some(body(&mut r)?);
            }
            SINGLE_REF_MARKER | MULTI_REF_MARKER => {
                let field = r.u8()?;
                let multi = marker == MULTI_REF_MARKER;
                let read = reader
                    .ref_field(field)
                    .filter(|read| read.multi == multi)
                    .ok_or(unexpected(at, marker))?;
                let block = body(&mut r)?;
                let mut inner = window(bytes, block.clone())?;
                let mut records = Vec::new();
                if multi {
                    let count = inner.u32()?;
                    for _ in 0..count {
                        records.push(record(&read.reader, bytes, &mut inner)?);
                    }
                } else if !block.is_empty() {
                    records.push(record(&read.reader, bytes, &mut inner)?);
                }
                if !inner.is_empty() {
                    return Err(unexpected(inner.position(), bytes[inner.position()]));
                }
                index.refs.push(RefIndex { field, records });
            }
            EDGE_BLOCK_MARKER => {
                let edge_reader = match (&reader.edges, allow_edges) {
                    (Some(edges), true) if index.edges.is_none() => edges,
                    _ => return Err(unexpected(at, marker)),
                };
                let block = body(&mut r)?;
                let mut edges = RecordIndex::default();
                items(edge_reader, bytes, block, &mut edges, false)?;
                index.edges = Some(Box::new(edges));
            }
            field if u16::from(field) <= MAX_FIELD_NUMBER => {
                if reader.separate_field(field).is_none() {
                    return Err(DecodeError::UnknownField {
                        field: field.to_string(),
                    });
                }
                let payload = body(&mut r)?;
                index.items.push((field, payload));
            }
            other => return Err(unexpected(at, other)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::decode::{ReadField, ReadRef};
    use crate::encoding::PutLe;
    use crate::query::QueryKind;
    use crate::schema::{PropDef, SchemaDef, SchemaLayout, TypeDef};

    fn reader() -> ReaderSchema {
        let def = SchemaDef::new().with_type(
            TypeDef::new("doc")
                .prop(PropDef::number("score"))
                .prop(PropDef::string("title")),
        );
        let schema = SchemaLayout::compile(&def, None).unwrap();
        let doc = schema.get("doc").unwrap();
        let locales: Arc<[String]> = Arc::from(Vec::<String>::new());
        let mut reader = ReaderSchema::new("doc", doc.id, QueryKind::Default);
        reader
            .main
            .push(ReadField::from_descriptor(doc.field("score").unwrap(), locales.clone()));
        reader
            .separate
            .push(ReadField::from_descriptor(doc.field("title").unwrap(), locales));
        let child = reader.clone();
        reader.refs.push(ReadRef {
            name: "parent".into(),
            path: vec!["parent".into()],
            field: 9,
            multi: false,
            reader: Arc::new(child),
        });
        reader
    }

    fn title_field(reader: &ReaderSchema) -> u8 {
        reader.separate[0].field
    }

    fn record_bytes(title: u8, id: u32, extra: &[u8]) -> Vec<u8> {
        let mut items = Vec::new();
        items.put_u8(0);
        items.put_u32(8);
        items.put_f64(1.5);
        items.put_u8(title);
        items.put_u32(3);
        items.put_bytes(&[0, 0, b'x']);
        items.put_bytes(extra);
        let mut out = Vec::new();
        out.put_u32(id);
        out.put_u32(items.len() as u32);
        out.put_bytes(&items);
        out
    }

    fn parent_item(nested: &[u8]) -> Vec<u8> {
        let mut item = vec![SINGLE_REF_MARKER, 9];
        item.put_u32(nested.len() as u32);
        item.put_bytes(nested);
        item
    }

    #[test]
    fn indexes_nested_records() {
        let reader = reader();
        let mut bytes = Vec::new();
        bytes.put_u32(2);
        let title = title_field(&reader);
        let parent = record_bytes(title, 1, &[]);
        bytes.put_bytes(&record_bytes(title, 5, &parent_item(&parent)));
        bytes.put_bytes(&record_bytes(title, 6, &parent_item(&[])));

        let index = ResultIndex::build(&reader, &bytes).unwrap();
        assert_eq!(index.len(), 2);
        let first = &index.records[0];
        assert_eq!(first.id, 5);
        assert_eq!(first.main.as_ref().unwrap().len(), 8);
        assert_eq!(first.items_of(title_field(&reader)).count(), 1);
        assert_eq!(first.ref_of(9).unwrap().records[0].id, 1);
        assert!(index.records[1].ref_of(9).unwrap().records.is_empty());
    }

    #[test]
    fn rejects_bad_framing() {
        let reader = reader();
        let mut bytes = Vec::new();
        bytes.put_u32(1);
        bytes.put_bytes(&record_bytes(title_field(&reader), 5, &parent_item(&[])));

        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            ResultIndex::build(&reader, truncated),
            Err(DecodeError::Truncated { .. })
        ));

        let mut trailing = bytes.clone();
        trailing.push(7);
        assert!(ResultIndex::build(&reader, &trailing).is_err());

        let mut unknown = bytes.clone();
        // First item after the main block carries the title field number.
        unknown[4 + 8 + 1 + 4 + 8] = 77;
        assert_eq!(
            ResultIndex::build(&reader, &unknown),
            Err(DecodeError::UnknownField { field: "77".into() })
        );

        let mut edge = bytes;
        edge[4 + 8] = EDGE_BLOCK_MARKER;
        assert!(matches!(
            ResultIndex::build(&reader, &edge),
            Err(DecodeError::UnexpectedMarker { marker: EDGE_BLOCK_MARKER, .. })
        ));
    }

    #[test]
    fn huge_counts_fail_without_allocating() {
        let reader = reader();
        let bytes = u32::MAX.to_le_bytes();
        assert!(matches!(
            ResultIndex::build(&reader, &bytes),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
