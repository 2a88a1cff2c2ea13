//! Applies one mutation batch to a [`Store`].
//!
//! The engine hands this module a copy of its store and swaps it in only
//! when the whole batch applied, so an error anywhere leaves the previous
//! state untouched.
//!
//! ## Provisional Ids
//!
//! The first record create of a type fixes that type's shift for the batch:
//! `offset = max_id + 1 - first_provisional` (0 when the client is already
//! ahead). From then on every id of the type at or above the first
//! provisional id, in creates, cursors, deletes and reference payloads, is
//! shifted by the offset.
//!
//! ## Inverse References
//!
//! A reference field with an inverse keeps the other side in step: linking
//! `a.f -> b` adds `a` to `b.inverse`, unlinking removes it. A single
//! reference inverse holds one id, so linking it evicts the previous holder.
//! Edge records are copied to the inverse side, which shares the edge table.

use std::borrow::Cow;

use eyre::{bail, ensure, eyre, Result};
use hashbrown::HashMap;
use tracing::trace;

use super::store::{string_data, EdgeRecord, Record, RefSlot, Store, Stored};
use crate::client::FlushOffsets;
use crate::config::MAIN_FIELD;
use crate::encoding::ByteReader;
use crate::modify::ops;
use crate::schema::{PackedField, PackedRef, PackedSchema, PackedType};
use crate::types::TypeTag;

/// Summary of an applied batch.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub offsets: Option<FlushOffsets>,
    pub created: usize,
    pub deleted: usize,
}

/// A decoded field write, independent of the record it lands in.
enum Write {
    Bytes(Vec<u8>),
    Text(u8, Vec<u8>),
    Members(Vec<u64>),
    Ref(RefSlot),
    Refs {
        op: u8,
        index: Option<i32>,
        slots: Vec<RefSlot>,
    },
    Delete,
    DeleteLocale(u8),
}

#[derive(Default)]
struct Cursor {
    type_id: Option<u16>,
    field: u8,
    raw_id: u32,
}

struct Batch<'s> {
    store: &'s mut Store,
    schema: &'s PackedSchema,
    /// Per type: (first provisional id, offset).
    shifts: HashMap<u16, (u32, u32)>,
    applied: Applied,
}

pub(crate) fn apply(store: &mut Store, schema: &PackedSchema, batch: &[u8]) -> Result<Applied> {
    let mut b = Batch {
        store,
        schema,
        shifts: HashMap::new(),
        applied: Applied::default(),
    };
    let mut r = ByteReader::new(batch);
    let mut cursor = Cursor::default();
    while !r.is_empty() {
        let at = r.position();
        let op = r.u8()?;
        b.step(&mut r, &mut cursor, op)
            .map_err(|err| err.wrap_err(format!("bad mutation op {op:#04x} at offset {at}")))?;
    }
    if !b.shifts.is_empty() {
        let mut offsets = FlushOffsets::new();
        for (type_id, (_, offset)) in &b.shifts {
            offsets.insert(*type_id, *offset);
        }
        b.applied.offsets = Some(offsets);
    }
    Ok(b.applied)
}

fn inverse_of<'a>(schema: &'a PackedSchema, field: &PackedField) -> Option<(u16, &'a PackedField)> {
    let info = field.reference.as_ref()?;
    if info.inverse == 0 {
        return None;
    }
    let target = schema.get(info.target)?;
    target.field(info.inverse).map(|f| (info.target, f))
}

fn current_type<'a>(schema: &'a PackedSchema, cursor: &Cursor) -> Result<&'a PackedType> {
    let type_id = cursor.type_id.ok_or_else(|| eyre!("record op before any type switch"))?;
    schema
        .get(type_id)
        .ok_or_else(|| eyre!("type {type_id} is not in the installed schema"))
}

fn ref_info(field: &PackedField) -> Result<&PackedRef> {
    field
        .reference
        .as_ref()
        .ok_or_else(|| eyre!("field {} carries no reference target", field.field))
}

/// Places `slot` in a references list: moves it when indexed, otherwise
/// appends it or refreshes its edge.
fn place(list: &mut Vec<RefSlot>, mut slot: RefSlot, index: Option<i32>) {
    let existing = list.iter().position(|s| s.id == slot.id);
    match (existing, index) {
        (Some(at), None) => {
            if slot.edge.is_some() {
                list[at].edge = slot.edge;
            }
        }
        (None, None) => list.push(slot),
        (existing, Some(index)) => {
            if let Some(at) = existing {
                let old = list.remove(at);
                if slot.edge.is_none() {
                    slot.edge = old.edge;
                }
            }
            let len = list.len() as i64;
            let at = if index >= 0 {
                (index as i64).min(len)
            } else {
                (len + 1 + index as i64).max(0)
            };
            list.insert(at as usize, slot);
        }
    }
}

/// Adds or subtracts `delta` to a main-region counter, wrapping integers.
fn bump(tag: TypeTag, slot: &mut [u8], delta: &[u8], negate: bool) -> Result<()> {
    let mut cur = ByteReader::new(slot);
    let mut d = ByteReader::new(delta);
    let width = slot.len();
    if tag == TypeTag::Number {
        let (a, b) = (cur.f64()?, d.f64()?);
        let v = if negate { a - b } else { a + b };
        slot.copy_from_slice(&v.to_le_bytes());
        return Ok(());
    }
    let (a, b) = (read_int(tag, &mut cur)?, read_int(tag, &mut d)?);
    let v = if negate { a.wrapping_sub(b) } else { a.wrapping_add(b) };
    slot.copy_from_slice(&v.to_le_bytes()[..width]);
    Ok(())
}

fn read_int(tag: TypeTag, r: &mut ByteReader<'_>) -> Result<i64> {
    Ok(match tag {
        TypeTag::Timestamp => r.i64()?,
        TypeTag::Int8 => r.u8()? as i8 as i64,
        TypeTag::Uint8 => r.u8()? as i64,
        TypeTag::Int16 => r.u16()? as i16 as i64,
        TypeTag::Uint16 => r.u16()? as i64,
        TypeTag::Int32 => r.i32()? as i64,
        TypeTag::Uint32 => r.u32()? as i64,
        other => bail!("{other} fields cannot be incremented"),
    })
}

impl Batch<'_> {
    fn resolve(&self, type_id: u16, raw: u32) -> u32 {
        match self.shifts.get(&type_id) {
            Some(&(first, offset)) if raw >= first => raw.wrapping_add(offset),
            _ => raw,
        }
    }

    fn step(&mut self, r: &mut ByteReader<'_>, cursor: &mut Cursor, op: u8) -> Result<()> {
        let schema = self.schema;
        match op {
            ops::SWITCH_TYPE => {
                let type_id = r.u16()?;
                ensure!(schema.get(type_id).is_some(), "unknown type id {type_id}");
                cursor.type_id = Some(type_id);
            }
            ops::SWITCH_CURSOR => {
                cursor.field = r.u8()?;
                let _tag = r.u8()?;
                cursor.raw_id = r.u32()?;
            }
            ops::SWITCH_FIELD => cursor.field = r.u8()?,
            ops::DELETE_RECORD => {
                let ty = current_type(schema, cursor)?;
                let raw = r.u32()?;
                let id = self.resolve(ty.type_id, raw);
                self.delete_record(ty, id);
            }
            ops::ADD_EMPTY_SORT => {
                let count = r.u16()? as usize;
                r.skip(count)?;
            }
            ops::ADD_EMPTY_SORT_TEXT => {
                let count = r.u16()? as usize;
                r.skip(count * 2)?;
            }
            ops::UPDATE_PARTIAL => {
                let ty = current_type(schema, cursor)?;
                let body = r.len_prefixed()?;
                let id = self.resolve(ty.type_id, cursor.raw_id);
                self.patch_main(ty, id, body)?;
            }
            ops::INCREMENT | ops::DECREMENT => {
                let ty = current_type(schema, cursor)?;
                let code = r.u8()?;
                let tag = TypeTag::from_u8(code).ok_or_else(|| eyre!("unknown counter tag {code}"))?;
                let offset = r.u16()? as usize;
                let width = tag
                    .fixed_size()
                    .ok_or_else(|| eyre!("{tag} fields cannot be incremented"))?;
                let delta = r.bytes(width)?;
                let id = self.resolve(ty.type_id, cursor.raw_id);
                let main_len = ty.main_len as usize;
                if let Some(rec) = self.store.record_mut(ty.type_id, id) {
                    let needed = main_len.max(offset + width);
                    if rec.main.len() < needed {
                        rec.main.resize(needed, 0);
                    }
                    bump(tag, &mut rec.main[offset..offset + width], delta, op == ops::DECREMENT)?;
                }
            }
            ops::CREATE | ops::UPDATE if cursor.field == MAIN_FIELD => {
                let ty = current_type(schema, cursor)?;
                let main = r.len_prefixed()?;
                if op == ops::CREATE {
                    self.create_record(ty, cursor.raw_id, main);
                } else {
                    let id = self.resolve(ty.type_id, cursor.raw_id);
                    if let Some(rec) = self.store.record_mut(ty.type_id, id) {
                        rec.main = main.to_vec();
                    }
                }
            }
            ops::CREATE
            | ops::UPDATE
            | ops::DELETE
            | ops::DELETE_TEXT_LOCALE
            | ops::ARRAY_OVERWRITE
            | ops::ARRAY_ADD
            | ops::ARRAY_DELETE => {
                let ty = current_type(schema, cursor)?;
                let field = ty
                    .field(cursor.field)
                    .ok_or_else(|| eyre!("type {} has no field {}", ty.type_id, cursor.field))?;
                let write = self.parse_write(r, op, field)?;
                let id = self.resolve(ty.type_id, cursor.raw_id);
                self.write_field(ty, id, field, write);
            }
            other => bail!("unknown mutation op {other:#04x}"),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    fn parse_write(&self, r: &mut ByteReader<'_>, op: u8, field: &PackedField) -> Result<Write> {
        Ok(match op {
            ops::DELETE => Write::Delete,
            ops::DELETE_TEXT_LOCALE => Write::DeleteLocale(r.u8()?),
            ops::ARRAY_OVERWRITE | ops::ARRAY_ADD | ops::ARRAY_DELETE => {
                ensure!(
                    field.tag == TypeTag::References,
                    "list op on {} field {}",
                    field.tag,
                    field.field
                );
                let info = ref_info(field)?;
                let body = r.len_prefixed()?;
                let mut b = ByteReader::new(body);
                let flags = b.u8()?;
                let count = b.u32()? as usize;
                ensure!(count.saturating_mul(4) <= b.remaining(), "reference count exceeds payload");
                let index = if flags & ops::REF_HAS_INDEX != 0 {
                    Some(b.i32()?)
                } else {
                    None
                };
                let mut slots = Vec::with_capacity(count);
                for _ in 0..count {
                    slots.push(RefSlot::plain(self.resolve(info.target, b.u32()?)));
                }
                if flags & ops::REF_HAS_EDGES != 0 {
                    for slot in &mut slots {
                        slot.edge = parse_edge(&mut b, info)?;
                    }
                }
                ensure!(b.is_empty(), "trailing bytes in references payload");
                Write::Refs { op, index, slots }
            }
            _ => match field.tag {
                TypeTag::Reference => {
                    let info = ref_info(field)?;
                    let flags = r.u8()?;
                    let id = self.resolve(info.target, r.u32()?);
                    let edge = if flags & ops::REF_HAS_EDGES != 0 {
                        parse_edge(r, info)?
                    } else {
                        None
                    };
                    Write::Ref(RefSlot { id, edge })
                }
                _ => parse_value(r, field)?,
            },
        })
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    fn create_record(&mut self, ty: &PackedType, raw: u32, main: &[u8]) {
        let type_id = ty.type_id;
        let next = self.store.tables.get(&type_id).map_or(1, |t| t.max_id + 1);
        let (first, offset) = *self
            .shifts
            .entry(type_id)
            .or_insert_with(|| (raw, next.saturating_sub(raw)));
        let id = if raw >= first { raw.wrapping_add(offset) } else { raw };
        if self.store.record(type_id, id).is_some() {
            self.delete_record(ty, id);
        }
        let table = self.store.tables.entry(type_id).or_default();
        table.max_id = table.max_id.max(id);
        table.records.insert(
            id,
            Record {
                main: main.to_vec(),
                fields: Default::default(),
            },
        );
        self.applied.created += 1;
        trace!(type_id, raw, id, "created record");
    }

    fn delete_record(&mut self, ty: &PackedType, id: u32) {
        let Some(rec) = self
            .store
            .tables
            .get_mut(&ty.type_id)
            .and_then(|t| t.records.remove(&id))
        else {
            return;
        };
        for field in &ty.fields {
            match field.tag {
                TypeTag::Alias => self.release_alias(ty.type_id, id, field.field, rec.fields.get(&field.field)),
                TypeTag::Reference | TypeTag::References => {
                    if let Some((target, inverse)) = inverse_of(self.schema, field) {
                        for other in rec.ref_ids(field.field) {
                            self.drop_ref(target, other, inverse.field, id);
                        }
                    }
                }
                _ => {}
            }
        }
        self.applied.deleted += 1;
        trace!(type_id = ty.type_id, id, "deleted record");
    }

    fn patch_main(&mut self, ty: &PackedType, id: u32, body: &[u8]) -> Result<()> {
        let mut b = ByteReader::new(body);
        let mut patches = Vec::new();
        while !b.is_empty() {
            let offset = b.u16()? as usize;
            let len = b.u16()? as usize;
            patches.push((offset, b.bytes(len)?));
        }
        let main_len = ty.main_len as usize;
        if let Some(rec) = self.store.record_mut(ty.type_id, id) {
            for (offset, bytes) in patches {
                let needed = main_len.max(offset + bytes.len());
                if rec.main.len() < needed {
                    rec.main.resize(needed, 0);
                }
                rec.main[offset..offset + bytes.len()].copy_from_slice(bytes);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    fn write_field(&mut self, ty: &PackedType, id: u32, field: &PackedField, write: Write) {
        let type_id = ty.type_id;
        if self.store.record(type_id, id).is_none() {
            trace!(type_id, id, field = field.field, "write to a missing record skipped");
            return;
        }
        match write {
            Write::Bytes(payload) => {
                if field.tag == TypeTag::Alias {
                    self.claim_alias(type_id, id, field.field, &payload);
                }
                if let Some(rec) = self.store.record_mut(type_id, id) {
                    rec.fields.insert(field.field, Stored::Bytes(payload));
                }
            }
            Write::Text(slot, payload) => {
                if let Some(rec) = self.store.record_mut(type_id, id) {
                    match rec.fields.get_mut(&field.field) {
                        Some(Stored::Text(map)) => {
                            map.insert(slot, payload);
                        }
                        _ => {
                            rec.fields.insert(field.field, Stored::Text([(slot, payload)].into_iter().collect()));
                        }
                    }
                }
            }
            Write::Members(hashes) => {
                if let Some(rec) = self.store.record_mut(type_id, id) {
                    match rec.fields.get_mut(&field.field) {
                        Some(Stored::Set(set)) => set.extend(hashes),
                        _ => {
                            rec.fields.insert(field.field, Stored::Set(hashes.into_iter().collect()));
                        }
                    }
                }
            }
            Write::Ref(slot) => self.set_ref(ty, id, field, slot),
            Write::Refs { op, index, slots } => self.update_refs(ty, id, field, op, index, slots),
            Write::Delete => self.delete_field(ty, id, field),
            Write::DeleteLocale(slot) => {
                if let Some(rec) = self.store.record_mut(type_id, id) {
                    if let Some(Stored::Text(map)) = rec.fields.get_mut(&field.field) {
                        map.remove(&slot);
                        if map.is_empty() {
                            rec.fields.remove(&field.field);
                        }
                    }
                }
            }
        }
    }

    fn delete_field(&mut self, ty: &PackedType, id: u32, field: &PackedField) {
        let Some(rec) = self.store.record_mut(ty.type_id, id) else {
            return;
        };
        let old_ids = rec.ref_ids(field.field);
        let Some(old) = rec.fields.remove(&field.field) else {
            return;
        };
        match field.tag {
            TypeTag::Alias => self.release_alias(ty.type_id, id, field.field, Some(&old)),
            TypeTag::Reference | TypeTag::References => {
                if let Some((target, inverse)) = inverse_of(self.schema, field) {
                    for other in old_ids {
                        self.drop_ref(target, other, inverse.field, id);
                    }
                }
            }
            _ => {}
        }
    }

    /// Points alias `field` of record `id` at the value in `payload`; a
    /// record already holding that value loses its alias.
    fn claim_alias(&mut self, type_id: u16, id: u32, field: u8, payload: &[u8]) {
        let Some(value) = string_data(payload).map(Cow::into_owned) else {
            return;
        };
        let previous = self.store.record(type_id, id).and_then(|r| r.fields.get(&field)).cloned();
        self.release_alias(type_id, id, field, previous.as_ref());
        let Some(table) = self.store.tables.get_mut(&type_id) else {
            return;
        };
        if let Some(holder) = table.aliases.insert((field, value), id) {
            if holder != id {
                if let Some(rec) = table.records.get_mut(&holder) {
                    rec.fields.remove(&field);
                }
                trace!(type_id, from = holder, to = id, "alias moved");
            }
        }
    }

    fn release_alias(&mut self, type_id: u16, id: u32, field: u8, stored: Option<&Stored>) {
        let Some(Stored::Bytes(payload)) = stored else {
            return;
        };
        let Some(value) = string_data(payload).map(Cow::into_owned) else {
            return;
        };
        if let Some(table) = self.store.tables.get_mut(&type_id) {
            let key = (field, value);
            if table.aliases.get(&key) == Some(&id) {
                table.aliases.remove(&key);
            }
        }
    }

    fn set_ref(&mut self, ty: &PackedType, id: u32, field: &PackedField, slot: RefSlot) {
        let Some(rec) = self.store.record_mut(ty.type_id, id) else {
            return;
        };
        let old_ids = rec.ref_ids(field.field);
        let (new_id, edge) = (slot.id, slot.edge.clone());
        rec.fields.insert(field.field, Stored::Ref(slot));
        if let Some((target, inverse)) = inverse_of(self.schema, field) {
            for other in old_ids.into_iter().filter(|o| *o != new_id) {
                self.drop_ref(target, other, inverse.field, id);
            }
            self.link(target, new_id, inverse, (ty.type_id, field.field, id), edge);
        }
    }

    fn update_refs(
        &mut self,
        ty: &PackedType,
        id: u32,
        field: &PackedField,
        op: u8,
        index: Option<i32>,
        slots: Vec<RefSlot>,
    ) {
        let Some(rec) = self.store.record_mut(ty.type_id, id) else {
            return;
        };
        let old_ids = rec.ref_ids(field.field);
        let mut list = match rec.fields.remove(&field.field) {
            Some(Stored::Refs(list)) => list,
            _ => Vec::new(),
        };
        let with_edges: Vec<u32> = slots.iter().filter(|s| s.edge.is_some()).map(|s| s.id).collect();
        match op {
            ops::ARRAY_OVERWRITE => {
                list.clear();
                for slot in slots {
                    place(&mut list, slot, None);
                }
            }
            ops::ARRAY_ADD => {
                for slot in slots {
                    place(&mut list, slot, index);
                }
            }
            _ => list.retain(|s| !slots.iter().any(|d| d.id == s.id)),
        }

        let links: Vec<(u32, Option<EdgeRecord>)> = list
            .iter()
            .filter(|s| !old_ids.contains(&s.id) || with_edges.contains(&s.id))
            .map(|s| (s.id, s.edge.clone()))
            .collect();
        let removed: Vec<u32> = old_ids
            .iter()
            .copied()
            .filter(|o| !list.iter().any(|s| s.id == *o))
            .collect();
        if !list.is_empty() {
            rec.fields.insert(field.field, Stored::Refs(list));
        }

        if let Some((target, inverse)) = inverse_of(self.schema, field) {
            for other in removed {
                self.drop_ref(target, other, inverse.field, id);
            }
            for (other, edge) in links {
                self.link(target, other, inverse, (ty.type_id, field.field, id), edge);
            }
        }
    }

    /// Adds `back` (type, field, id) to the inverse field of record
    /// `target_id`.
    fn link(
        &mut self,
        target_type: u16,
        target_id: u32,
        inverse: &PackedField,
        back: (u16, u8, u32),
        edge: Option<EdgeRecord>,
    ) {
        let (back_type, back_field, back_id) = back;
        let Some(rec) = self.store.record_mut(target_type, target_id) else {
            return;
        };
        let mut evicted = None;
        match inverse.tag {
            TypeTag::References => {
                if let Some(Stored::Refs(list)) = rec.fields.get_mut(&inverse.field) {
                    match list.iter_mut().find(|s| s.id == back_id) {
                        Some(slot) => {
                            if edge.is_some() {
                                slot.edge = edge;
                            }
                        }
                        None => list.push(RefSlot { id: back_id, edge }),
                    }
                } else {
                    rec.fields
                        .insert(inverse.field, Stored::Refs(vec![RefSlot { id: back_id, edge }]));
                }
            }
            TypeTag::Reference => {
                let current = rec.ref_ids(inverse.field).first().copied();
                if current == Some(back_id) && edge.is_none() {
                    return;
                }
                evicted = current.filter(|holder| *holder != back_id);
                rec.fields.insert(inverse.field, Stored::Ref(RefSlot { id: back_id, edge }));
            }
            _ => {}
        }
        if let Some(evicted) = evicted {
            self.drop_ref(back_type, evicted, back_field, target_id);
        }
    }

    /// Removes `target` from reference field `field` of record `id`.
    fn drop_ref(&mut self, type_id: u16, id: u32, field: u8, target: u32) {
        let Some(rec) = self.store.record_mut(type_id, id) else {
            return;
        };
        let emptied = match rec.fields.get_mut(&field) {
            Some(Stored::Ref(slot)) => slot.id == target,
            Some(Stored::Refs(list)) => {
                list.retain(|s| s.id != target);
                list.is_empty()
            }
            _ => false,
        };
        if emptied {
            rec.fields.remove(&field);
        }
    }
}

/// Parses a value payload of a non-reference field.
fn parse_value(r: &mut ByteReader<'_>, field: &PackedField) -> Result<Write> {
    let body = r.len_prefixed()?;
    Ok(match field.tag {
        TypeTag::String
        | TypeTag::Alias
        | TypeTag::Binary
        | TypeTag::Json
        | TypeTag::Vector
        | TypeTag::Colvec => Write::Bytes(body.to_vec()),
        TypeTag::Text => {
            let slot = *body.first().ok_or_else(|| eyre!("empty text payload"))?;
            Write::Text(slot, body.to_vec())
        }
        TypeTag::Cardinality => {
            ensure!(body.len() % 8 == 0, "cardinality payload is not a list of hashes");
            let mut b = ByteReader::new(body);
            let mut hashes = Vec::with_capacity(body.len() / 8);
            while !b.is_empty() {
                hashes.push(b.u64()?);
            }
            Write::Members(hashes)
        }
        other => bail!("{other} field {} has no separate payload", field.field),
    })
}

/// Parses `len:u32 [0 CREATE len:u32 main] (field:u8 op:u8 payload)*`.
/// An edge record without content reads as `None`.
fn parse_edge(r: &mut ByteReader<'_>, info: &PackedRef) -> Result<Option<EdgeRecord>> {
    let body = r.len_prefixed()?;
    let mut b = ByteReader::new(body);
    let mut edge = EdgeRecord::default();
    while !b.is_empty() {
        let field = b.u8()?;
        let op = b.u8()?;
        if field == MAIN_FIELD {
            ensure!(op == ops::CREATE, "edge main written with op {op:#04x}");
            edge.main = b.len_prefixed()?.to_vec();
            continue;
        }
        let desc = info
            .edge(field)
            .ok_or_else(|| eyre!("edge field {field} is not declared"))?;
        ensure!(op == ops::CREATE, "edge field {field} written with op {op:#04x}");
        match parse_value(&mut b, desc)? {
            Write::Bytes(payload) => {
                edge.fields.insert(field, Stored::Bytes(payload));
            }
            Write::Text(slot, payload) => match edge.fields.get_mut(&field) {
                Some(Stored::Text(map)) => {
                    map.insert(slot, payload);
                }
                _ => {
                    edge.fields.insert(field, Stored::Text([(slot, payload)].into_iter().collect()));
                }
            },
            Write::Members(hashes) => {
                edge.fields.insert(field, Stored::Set(hashes.into_iter().collect()));
            }
            _ => bail!("unsupported edge field {field}"),
        }
    }
    if edge.main.is_empty() && edge.fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(edge))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(ids: &[u32]) -> Vec<RefSlot> {
        ids.iter().copied().map(RefSlot::plain).collect()
    }

    fn ids(list: &[RefSlot]) -> Vec<u32> {
        list.iter().map(|s| s.id).collect()
    }

    #[test]
    fn indexed_place_moves_existing_elements() {
        let mut list = slots(&[1, 2, 3, 4]);
        place(&mut list, RefSlot::plain(4), Some(0));
        assert_eq!(ids(&list), [4, 1, 2, 3]);
        place(&mut list, RefSlot::plain(4), Some(0));
        assert_eq!(ids(&list), [4, 1, 2, 3]);
        place(&mut list, RefSlot::plain(9), Some(-1));
        assert_eq!(ids(&list), [4, 1, 2, 3, 9]);
        place(&mut list, RefSlot::plain(1), Some(100));
        assert_eq!(ids(&list), [4, 2, 3, 9, 1]);
        place(&mut list, RefSlot::plain(2), None);
        assert_eq!(ids(&list), [4, 2, 3, 9, 1]);
    }

    #[test]
    fn counters_wrap_at_their_width() {
        let mut slot = [250u8];
        bump(TypeTag::Uint8, &mut slot, &[10], false).unwrap();
        assert_eq!(slot, [4]);

        let mut slot = 1.5f64.to_le_bytes();
        bump(TypeTag::Number, &mut slot, &0.5f64.to_le_bytes(), true).unwrap();
        assert_eq!(f64::from_le_bytes(slot), 1.0);

        let mut slot = (-2i32).to_le_bytes();
        bump(TypeTag::Int32, &mut slot, &5i32.to_le_bytes(), false).unwrap();
        assert_eq!(i32::from_le_bytes(slot), 3);

        assert!(bump(TypeTag::Boolean, &mut [0u8], &[1], false).is_err());
    }
}
