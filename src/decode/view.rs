//! # Lazy Result Views
//!
//! Second decode phase. A [`QueryResult`] owns the result bytes and their
//! [`ResultIndex`]; records are materialized field by field on demand through
//! [`RecordView`]. Nothing is decoded until asked for, and a failed decode of
//! one field leaves every other field readable.
//!
//! Fields the record does not carry decode to their codec's empty value, so a
//! record written before a field existed reads the same as one that never set
//! it.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::DecodeError;
use crate::query::QueryKind;
use crate::types::{TypeTag, Value};

use super::aggregate::AggregateResult;
use super::arena::DecodeArena;
use super::index::{RecordIndex, ResultIndex};
use super::reader::{ReadField, ReadRef, ReaderSchema};

#[derive(Debug)]
enum Body {
    Records(ResultIndex),
    Count(u32),
    Aggregate(AggregateResult),
}

/// A query result whose records decode lazily.
#[derive(Debug)]
pub struct QueryResult {
    reader: Arc<ReaderSchema>,
    bytes: Vec<u8>,
    body: Body,
}

impl QueryResult {
    /// Validates the framing of `bytes` against `reader`.
    pub fn new(reader: Arc<ReaderSchema>, bytes: Vec<u8>) -> Result<Self, DecodeError> {
        let body = match (reader.kind, &reader.aggregate) {
            (QueryKind::AggregateCount, _) => {
                let mut r = crate::encoding::ByteReader::new(&bytes);
                let count = r.u32()?;
                if !r.is_empty() {
                    return Err(DecodeError::UnexpectedMarker {
                        offset: 4,
                        marker: bytes[4],
                    });
                }
                Body::Count(count)
            }
            (QueryKind::Aggregate, Some(agg)) => Body::Aggregate(AggregateResult::build(agg, &bytes)?),
            _ => Body::Records(ResultIndex::build(&reader, &bytes)?),
        };
        Ok(Self { reader, bytes, body })
    }

    pub fn reader(&self) -> &Arc<ReaderSchema> {
        &self.reader
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn index(&self) -> Option<&ResultIndex> {
        match &self.body {
            Body::Records(index) => Some(index),
            _ => None,
        }
    }

    /// Number of records; aggregates hold none.
    pub fn len(&self) -> usize {
        self.index().map_or(0, ResultIndex::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<u32> {
        self.index()
            .map(|index| index.records.iter().map(|r| r.id).collect())
            .unwrap_or_default()
    }

    pub fn record(&self, i: usize) -> Result<RecordView<'_>, DecodeError> {
        let len = self.len();
        let index = self
            .index()
            .and_then(|index| index.records.get(i))
            .ok_or(DecodeError::OutOfRange { index: i, len })?;
        Ok(RecordView {
            reader: &self.reader,
            bytes: &self.bytes,
            index,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = RecordView<'_>> {
        self.index()
            .into_iter()
            .flat_map(|index| index.records.iter())
            .map(move |index| RecordView {
                reader: &self.reader,
                bytes: &self.bytes,
                index,
            })
    }

    /// The record count of a count query, or the number of records returned.
    pub fn count(&self) -> u32 {
        match &self.body {
            Body::Count(n) => *n,
            _ => self.len() as u32,
        }
    }

    /// Aggregate values, `{field: {fn: value}}`, keyed by group when grouped.
    pub fn aggregate(&self, arena: &mut DecodeArena) -> Result<Value, DecodeError> {
        match (&self.body, &self.reader.aggregate) {
            (Body::Aggregate(result), Some(agg)) => result.to_value(agg, &self.bytes, arena),
            (Body::Count(n), _) => Ok(Value::object([("count", Value::Int(*n as i64))])),
            _ => Ok(Value::Null),
        }
    }

    /// Decodes everything: a list of records, a single record (or null) for
    /// id and alias lookups, or the aggregate.
    pub fn to_value(&self, arena: &mut DecodeArena) -> Result<Value, DecodeError> {
        if self.reader.kind.is_aggregate() {
            return self.aggregate(arena);
        }
        if self.reader.kind.is_single() {
            return match self.records().next() {
                Some(record) => record.to_value(arena),
                None => Ok(Value::Null),
            };
        }
        self.records()
            .map(|record| record.to_value(arena))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List)
    }
}

/// One record of a result, borrowed from its [`QueryResult`].
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    reader: &'a ReaderSchema,
    bytes: &'a [u8],
    index: &'a RecordIndex,
}

impl<'a> RecordView<'a> {
    pub fn id(&self) -> u32 {
        self.index.id
    }

    pub fn type_name(&self) -> &'a str {
        &self.reader.type_name
    }

    fn slice(&self, range: &Range<usize>) -> &'a [u8] {
        &self.bytes[range.clone()]
    }

    /// Records reached through reference `name`.
    pub fn references(&self, name: &str) -> Result<Vec<RecordView<'a>>, DecodeError> {
        let read = self.reader.ref_named(name).ok_or_else(|| DecodeError::UnknownField {
            field: name.to_string(),
        })?;
        Ok(self.ref_views(read))
    }

    fn ref_views<'r>(&self, read: &'r ReadRef) -> Vec<RecordView<'r>>
    where
        'a: 'r,
    {
        self.index
            .ref_of(read.field)
            .map(|r| {
                r.records
                    .iter()
                    .map(|index| RecordView {
                        reader: &read.reader,
                        bytes: self.bytes,
                        index,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Decodes one field, reference, `$edge` property or object by path.
    pub fn get(&self, path: &str, arena: &mut DecodeArena) -> Result<Value, DecodeError> {
        if path == "id" {
            return Ok(Value::reference(self.index.id));
        }
        if path.starts_with('$') {
            let edges = self.reader.edges.as_deref();
            let read = edges
                .and_then(|edges| edges.field_named(path))
                .ok_or_else(|| DecodeError::UnknownField {
                    field: path.to_string(),
                })?;
            return match (edges, self.index.edges.as_deref()) {
                (Some(reader), Some(index)) => RecordView {
                    reader,
                    bytes: self.bytes,
                    index,
                }
                .decode(read, arena),
                _ => Ok((read.codec.empty)(read)),
            };
        }
        if let Some(read) = self.reader.field_named(path) {
            return self.decode(read, arena);
        }
        if let Some(read) = self.reader.ref_named(path) {
            return self.decode_ref(read, arena);
        }
        for (dot, _) in path.match_indices('.') {
            let Some(read) = self.reader.ref_named(&path[..dot]) else {
                continue;
            };
            let rest = &path[dot + 1..];
            let views = self.ref_views(read);
            return if read.multi {
                views
                    .iter()
                    .map(|view| view.get(rest, arena))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            } else {
                match views.first() {
                    Some(view) => view.get(rest, arena),
                    None => Ok(Value::Null),
                }
            };
        }

        let prefix = format!("{path}.");
        let members: Vec<&ReadField> = self
            .reader
            .main
            .iter()
            .chain(self.reader.separate.iter())
            .filter(|f| f.name.starts_with(&prefix))
            .collect();
        if members.is_empty() {
            return Err(DecodeError::UnknownField {
                field: path.to_string(),
            });
        }
        let depth = path.split('.').count();
        let mut object = BTreeMap::new();
        for read in members {
            let value = self.decode(read, arena)?;
            insert_path(&mut object, &read.path[depth..], value);
        }
        Ok(Value::Object(object))
    }

    fn decode(&self, read: &ReadField, arena: &mut DecodeArena) -> Result<Value, DecodeError> {
        if read.separate {
            return self.decode_separate(read, self.index.items_of(read.field), arena);
        }
        let value = match self.index.main.as_ref().and_then(|m| read.main_slice(self.slice(m))) {
            Some(slot) => (read.codec.decode)(read, slot, arena.bump())?,
            None => (read.codec.empty)(read),
        };
        Ok(apply_slice(read, value))
    }

    fn decode_separate<'r>(
        &self,
        read: &ReadField,
        mut ranges: impl Iterator<Item = &'r Range<usize>>,
        arena: &mut DecodeArena,
    ) -> Result<Value, DecodeError> {
        if read.tag != TypeTag::Text {
            let value = match ranges.next() {
                Some(range) => (read.codec.decode)(read, self.slice(range), arena.bump())?,
                None => (read.codec.empty)(read),
            };
            return Ok(apply_slice(read, value));
        }

        let mut merged = BTreeMap::new();
        for range in ranges {
            if let Value::Text(map) = (read.codec.decode)(read, self.slice(range), arena.bump())? {
                merged.extend(map);
            }
        }
        if read.locale == 0 {
            return Ok(apply_slice(read, Value::Text(merged)));
        }
        let wanted = read
            .locales
            .get(read.locale as usize - 1)
            .ok_or_else(|| DecodeError::InvalidPayload {
                field: read.name.clone(),
                reason: "unknown locale slot",
            })?;
        Ok(apply_slice(read, Value::String(merged.remove(wanted).unwrap_or_default())))
    }

    fn decode_ref(&self, read: &ReadRef, arena: &mut DecodeArena) -> Result<Value, DecodeError> {
        let views = self.ref_views(read);
        if read.multi {
            return views
                .iter()
                .map(|view| view.to_value(arena))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List);
        }
        match views.first() {
            Some(view) => view.to_value(arena),
            None => Ok(Value::Null),
        }
    }

    /// Decodes the whole record into an object keyed by field path.
    pub fn to_value(&self, arena: &mut DecodeArena) -> Result<Value, DecodeError> {
        let mut object = BTreeMap::new();
        object.insert("id".to_string(), Value::reference(self.index.id));

        for read in &self.reader.main {
            let value = self.decode(read, arena)?;
            insert_path(&mut object, &read.path, value);
        }
        let mut ranges: Vec<SmallVec<[&Range<usize>; 1]>> = vec![SmallVec::new(); self.reader.separate.len()];
        for (field, range) in &self.index.items {
            let i = arena
                .separate_index(self.reader, *field)
                .ok_or_else(|| DecodeError::UnknownField {
                    field: field.to_string(),
                })?;
            ranges[i].push(range);
        }
        for (read, ranges) in self.reader.separate.iter().zip(ranges) {
            let value = self.decode_separate(read, ranges.into_iter(), arena)?;
            insert_path(&mut object, &read.path, value);
        }
        for read in &self.reader.refs {
            let value = self.decode_ref(read, arena)?;
            insert_path(&mut object, &read.path, value);
        }
        if let (Some(edges), Some(index)) = (self.reader.edges.as_deref(), self.index.edges.as_deref()) {
            let view = RecordView {
                reader: edges,
                bytes: self.bytes,
                index,
            };
            for read in edges.main.iter().chain(edges.separate.iter()) {
                object.insert(read.name.clone(), view.decode(read, arena)?);
            }
        }
        Ok(Value::Object(object))
    }
}

fn insert_path(object: &mut BTreeMap<String, Value>, path: &[String], value: Value) {
    match path {
        [] => {}
        [leaf] => {
            object.insert(leaf.clone(), value);
        }
        [head, rest @ ..] => {
            let entry = object
                .entry(head.clone())
                .or_insert_with(|| Value::Object(BTreeMap::new()));
            if !matches!(entry, Value::Object(_)) {
                *entry = Value::Object(BTreeMap::new());
            }
            if let Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// Applies a `start..end` char range to decoded strings.
fn apply_slice(read: &ReadField, value: Value) -> Value {
    let Some((start, end)) = read.slice else {
        return value;
    };
    let cut = |s: String| -> String {
        let chars = s.chars().skip(start);
        match end {
            Some(end) => chars.take(end.saturating_sub(start)).collect(),
            None => chars.collect(),
        }
    };
    match value {
        Value::String(s) => Value::String(cut(s)),
        Value::Text(map) => Value::Text(map.into_iter().map(|(k, v)| (k, cut(v))).collect()),
        other => other,
    }
}
