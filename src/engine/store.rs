//! Record storage of the loopback engine.
//!
//! Records keep their main region as raw bytes and every separate field as
//! the payload the mutation stream carried, minus its length prefix. Reading
//! a field back for a result is therefore a copy, never a re-encode.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::encoding::{compress, ByteReader};
use crate::modify::ops;
use crate::schema::{PackedField, PackedSchema, PackedType};
use crate::types::{TypeTag, TypedVector};

/// One stored separate field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stored {
    /// String, alias, binary, json and vector payloads.
    Bytes(Vec<u8>),
    /// Text payloads by locale slot.
    Text(BTreeMap<u8, Vec<u8>>),
    /// Member hashes of a cardinality field.
    Set(HashSet<u64>),
    Ref(RefSlot),
    Refs(Vec<RefSlot>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct EdgeRecord {
    pub main: Vec<u8>,
    pub fields: BTreeMap<u8, Stored>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RefSlot {
    pub id: u32,
    pub edge: Option<EdgeRecord>,
}

impl RefSlot {
    pub(crate) fn plain(id: u32) -> Self {
        Self { id, edge: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Record {
    pub main: Vec<u8>,
    pub fields: BTreeMap<u8, Stored>,
}

impl Record {
    /// Ids held by reference field `field`, in order.
    pub(crate) fn ref_ids(&self, field: u8) -> Vec<u32> {
        match self.fields.get(&field) {
            Some(Stored::Ref(slot)) => vec![slot.id],
            Some(Stored::Refs(slots)) => slots.iter().map(|s| s.id).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub records: BTreeMap<u32, Record>,
    /// Highest id ever stored; ids are never reused.
    pub max_id: u32,
    /// (alias field, alias value) to the record holding it.
    pub aliases: HashMap<(u8, Vec<u8>), u32>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Store {
    pub schema: Option<Arc<PackedSchema>>,
    pub hash: u64,
    pub tables: HashMap<u16, Table>,
}

impl Store {
    pub(crate) fn table(&self, type_id: u16) -> Option<&Table> {
        self.tables.get(&type_id)
    }

    pub(crate) fn record(&self, type_id: u16, id: u32) -> Option<&Record> {
        self.tables.get(&type_id)?.records.get(&id)
    }

    pub(crate) fn record_mut(&mut self, type_id: u16, id: u32) -> Option<&mut Record> {
        self.tables.get_mut(&type_id)?.records.get_mut(&id)
    }
}

/// Read-only view shared by records and edge records.
#[derive(Clone, Copy)]
pub(crate) struct Subject<'a> {
    pub id: u32,
    pub main: &'a [u8],
    pub fields: &'a BTreeMap<u8, Stored>,
    pub schema: &'a [PackedField],
}

impl<'a> Subject<'a> {
    pub(crate) fn record(ty: &'a PackedType, id: u32, rec: &'a Record) -> Self {
        Self {
            id,
            main: &rec.main,
            fields: &rec.fields,
            schema: &ty.fields,
        }
    }

    pub(crate) fn edge(schema: &'a [PackedField], edge: &'a EdgeRecord) -> Self {
        Self {
            id: 0,
            main: &edge.main,
            fields: &edge.fields,
            schema,
        }
    }

    pub(crate) fn field(&self, number: u8) -> Option<&'a PackedField> {
        self.schema.iter().find(|f| f.field == number)
    }

    /// Main field starting at `offset`.
    pub(crate) fn main_field(&self, offset: u16) -> Option<&'a PackedField> {
        self.schema.iter().find(|f| !f.separate() && f.offset == offset)
    }

    pub(crate) fn slot(&self, start: u16, len: u16) -> Cow<'a, [u8]> {
        main_slot(self.main, start, len)
    }
}

/// `main[start..start + len]`, zero-filled where the stored region is shorter.
pub(crate) fn main_slot(main: &[u8], start: u16, len: u16) -> Cow<'_, [u8]> {
    let (start, end) = (start as usize, start as usize + len as usize);
    match main.get(start..end) {
        Some(slot) => Cow::Borrowed(slot),
        None => {
            let mut slot = vec![0u8; len as usize];
            if let Some(head) = main.get(start..) {
                slot[..head.len()].copy_from_slice(head);
            }
            Cow::Owned(slot)
        }
    }
}

/// `main` resized to `len`, zero-padded for records written before the main
/// region grew.
pub(crate) fn padded(main: &[u8], len: usize) -> Cow<'_, [u8]> {
    if main.len() == len {
        return Cow::Borrowed(main);
    }
    let mut out = vec![0u8; len];
    let n = main.len().min(len);
    out[..n].copy_from_slice(&main[..n]);
    Cow::Owned(out)
}

/// The string bytes of a `locale flag [orig_len] data` payload.
pub(crate) fn string_data(payload: &[u8]) -> Option<Cow<'_, [u8]>> {
    let mut r = ByteReader::new(payload);
    let _locale = r.u8().ok()?;
    match r.u8().ok()? {
        ops::STRING_RAW => Some(Cow::Borrowed(r.rest())),
        ops::STRING_DEFLATE => {
            let len = r.u32().ok()? as usize;
            compress::inflate(r.rest(), len).map(Cow::Owned)
        }
        _ => None,
    }
}

/// Every string a separate field holds: one, or one per locale for text.
/// `locale` 0 selects all locales.
pub(crate) fn strings_of<'a>(stored: &'a Stored, tag: TypeTag, locale: u8) -> Vec<Cow<'a, [u8]>> {
    match (stored, tag) {
        (Stored::Bytes(payload), TypeTag::Binary) => {
            let data = payload.get(..payload.len().saturating_sub(4)).unwrap_or_default();
            vec![Cow::Borrowed(data)]
        }
        (Stored::Bytes(payload), TypeTag::Json) => vec![Cow::Borrowed(payload.as_slice())],
        (Stored::Bytes(payload), _) => string_data(payload).into_iter().collect(),
        (Stored::Text(map), _) => map
            .iter()
            .filter(|(slot, _)| locale == 0 || **slot == locale)
            .filter_map(|(_, payload)| string_data(payload))
            .collect(),
        _ => Vec::new(),
    }
}

/// Reads a main-region numeric (or boolean, enum) slot as `f64`.
pub(crate) fn read_number(tag: TypeTag, bytes: &[u8]) -> Option<f64> {
    let mut r = ByteReader::new(bytes);
    Some(match tag {
        TypeTag::Number => r.f64().ok()?,
        TypeTag::Timestamp => r.i64().ok()? as f64,
        TypeTag::Int8 => r.u8().ok()? as i8 as f64,
        TypeTag::Uint8 | TypeTag::Boolean | TypeTag::Enum => r.u8().ok()? as f64,
        TypeTag::Int16 => r.u16().ok()? as i16 as f64,
        TypeTag::Uint16 => r.u16().ok()? as f64,
        TypeTag::Int32 => r.i32().ok()? as f64,
        TypeTag::Uint32 => r.u32().ok()? as f64,
        _ => return None,
    })
}

/// Elements of a vector field as `f64`, from the main region or a payload.
pub(crate) fn vector_of(subject: &Subject<'_>, field: &PackedField) -> Option<Vec<f64>> {
    let (base, _) = field.vector?;
    let bytes: Cow<'_, [u8]> = if field.separate() {
        match subject.fields.get(&field.field)? {
            Stored::Bytes(payload) => Cow::Borrowed(payload.as_slice()),
            _ => return None,
        }
    } else {
        subject.slot(field.offset, field.len)
    };
    TypedVector::from_le_bytes(base, &bytes).map(|v| v.to_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::PutLe;

    #[test]
    fn main_slot_zero_fills_past_the_stored_region() {
        let main = [1u8, 2, 3];
        assert_eq!(&*main_slot(&main, 1, 2), &[2, 3]);
        assert_eq!(&*main_slot(&main, 2, 3), &[3, 0, 0]);
        assert_eq!(&*main_slot(&main, 8, 2), &[0, 0]);
        assert_eq!(&*padded(&main, 5), &[1, 2, 3, 0, 0]);
    }

    #[test]
    fn string_data_inflates_deflated_payloads() {
        let text = "repeat me ".repeat(30);
        let mut payload = vec![0u8, ops::STRING_DEFLATE];
        payload.put_u32(text.len() as u32);
        payload.extend_from_slice(&compress::deflate(text.as_bytes()).unwrap());
        assert_eq!(&*string_data(&payload).unwrap(), text.as_bytes());

        let raw = [0u8, ops::STRING_RAW, b'h', b'i'];
        assert_eq!(&*string_data(&raw).unwrap(), b"hi");
        assert!(string_data(&[0u8, 9]).is_none());
    }

    #[test]
    fn text_strings_filter_by_locale() {
        let mut map = BTreeMap::new();
        map.insert(1, vec![1u8, ops::STRING_RAW, b'a']);
        map.insert(2, vec![2u8, ops::STRING_RAW, b'b']);
        let stored = Stored::Text(map);
        assert_eq!(strings_of(&stored, TypeTag::Text, 0).len(), 2);
        let fr = strings_of(&stored, TypeTag::Text, 2);
        assert_eq!(fr.len(), 1);
        assert_eq!(&*fr[0], b"b");
    }

    #[test]
    fn numbers_read_by_tag() {
        assert_eq!(read_number(TypeTag::Int8, &[0xff]), Some(-1.0));
        assert_eq!(read_number(TypeTag::Uint16, &[1, 1]), Some(257.0));
        assert_eq!(read_number(TypeTag::Number, &2.5f64.to_le_bytes()), Some(2.5));
        assert_eq!(read_number(TypeTag::Timestamp, &(-3i64).to_le_bytes()), Some(-3.0));
        assert_eq!(read_number(TypeTag::String, &[0]), None);
    }
}
