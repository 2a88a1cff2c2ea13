//! # Mutation Context
//!
//! `ModifyCtx` is the copy-on-grow arena every mutation is encoded into. It
//! owns the output bytes, a logical capacity, the cursor state of the stream
//! and the per-record staging area.
//!
//! ## Overflow Contract
//!
//! Every write reserves its exact size with [`ModifyCtx::ensure`] first. When
//! `len + size > capacity` nothing is written and `FieldError::Overflow` is
//! returned. The record driver then rolls back to the record's checkpoint,
//! calls [`ModifyCtx::grow`] and re-encodes the record from its first field.
//! Because a checkpoint captures both the length and the cursor state, the
//! retried bytes are identical to what a large enough buffer would have held.
//!
//! ## Record Staging
//!
//! ```text
//! create:  [SWITCH_TYPE] SWITCH_CURSOR(0,null,id) CREATE len main... fields... [empty sort]
//! update:  fields... SWITCH_FIELD 0 UPDATE_PARTIAL len (off len bytes)* [INCREMENT ...]
//! ```
//!
//! On create the main region is written in place inside the buffer. On update
//! main writes go to a staged patch that is emitted once when the record ends.

use std::time::{SystemTime, UNIX_EPOCH};

use smallvec::SmallVec;

use super::ops;
use crate::config::{DEFAULT_MODIFY_SIZE, MAX_MODIFY_SIZE, STRING_COMPRESS_THRESHOLD};
use crate::encoding::{patch_u32, PutLe};
use crate::error::SchemaError;
use crate::schema::{FieldTable, SortSlot, TypeLayout};
use crate::types::TypeTag;

/// Why a single field could not be written.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    /// The buffer is too small; nothing was written.
    Overflow,
    /// The value was rejected by validation.
    Invalid(String),
    /// The payload names something the schema does not define.
    Schema(SchemaError),
}

impl From<SchemaError> for FieldError {
    fn from(err: SchemaError) -> Self {
        FieldError::Schema(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CursorState {
    valid: bool,
    type_id: u16,
    id: u32,
    field: u8,
}

/// Restore point covering the buffer length and the cursor state.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    len: usize,
    cursor: CursorState,
    records: usize,
}

#[derive(Debug, Clone, Copy)]
struct EdgeFrame {
    main_start: usize,
    main_len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Increment {
    op: u8,
    tag: TypeTag,
    offset: u16,
    bytes: [u8; 8],
    width: u8,
}

#[derive(Debug)]
pub struct ModifyCtx {
    buf: Vec<u8>,
    capacity: usize,
    max_capacity: usize,
    compress_threshold: usize,
    cursor: CursorState,
    records: usize,
    needed: usize,
    overflowed: bool,
    locales: Vec<String>,
    default_locale: u8,
    clock: Option<i64>,

    op: OpKind,
    type_id: u16,
    id: u32,
    main_start: usize,
    main_len: usize,
    patch: Vec<u8>,
    patch_ranges: SmallVec<[(u16, u16); 8]>,
    increments: SmallVec<[Increment; 4]>,
    sort_slots: Vec<SortSlot>,
    sort_present: Vec<bool>,
    edge: Option<EdgeFrame>,
}

impl Default for ModifyCtx {
    fn default() -> Self {
        Self::new(DEFAULT_MODIFY_SIZE, MAX_MODIFY_SIZE)
    }
}

impl ModifyCtx {
    pub fn new(capacity: usize, max_capacity: usize) -> Self {
        let capacity = capacity.clamp(1, max_capacity.max(1));
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            max_capacity: max_capacity.max(capacity),
            compress_threshold: STRING_COMPRESS_THRESHOLD,
            cursor: CursorState::default(),
            records: 0,
            needed: 0,
            overflowed: false,
            locales: Vec::new(),
            default_locale: 1,
            clock: None,
            op: OpKind::Create,
            type_id: 0,
            id: 0,
            main_start: 0,
            main_len: 0,
            patch: Vec::new(),
            patch_ranges: SmallVec::new(),
            increments: SmallVec::new(),
            sort_slots: Vec::new(),
            sort_present: Vec::new(),
            edge: None,
        }
    }

    // ------------------------------------------------------------------
    // Buffer state
    // ------------------------------------------------------------------

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Records completely encoded since the last reset.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Whether any write hit the capacity since the last reset.
    pub fn has_overflowed(&self) -> bool {
        self.overflowed
    }

    /// Largest length a failed reservation asked for.
    pub fn needed(&self) -> usize {
        self.needed
    }

    /// Hands the encoded batch out and starts a fresh one with the same capacity.
    pub fn take(&mut self) -> Vec<u8> {
        let out = std::mem::replace(&mut self.buf, Vec::with_capacity(self.capacity));
        self.reset_state();
        out
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.reset_state();
    }

    fn reset_state(&mut self) {
        self.cursor = CursorState::default();
        self.records = 0;
        self.needed = 0;
        self.overflowed = false;
        self.edge = None;
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            len: self.buf.len(),
            cursor: self.cursor,
            records: self.records,
        }
    }

    pub fn rollback(&mut self, cp: Checkpoint) {
        self.buf.truncate(cp.len);
        self.cursor = cp.cursor;
        self.records = cp.records;
        self.edge = None;
    }

    /// Doubles the logical capacity, copying the bytes written so far into a
    /// new allocation. Returns `false` when already at the maximum.
    pub fn grow(&mut self) -> bool {
        if self.capacity >= self.max_capacity {
            return false;
        }
        let next_capacity = (self.capacity * 2).min(self.max_capacity);
        let mut next = Vec::with_capacity(next_capacity);
        next.extend_from_slice(&self.buf);
        self.buf = next;
        self.capacity = next_capacity;
        tracing::trace!(capacity = next_capacity, "grew mutation buffer");
        true
    }

    /// Reserves `size` bytes or reports overflow without writing anything.
    #[inline]
    pub fn ensure(&mut self, size: usize) -> Result<(), FieldError> {
        let wanted = self.buf.len() + size;
        if wanted > self.capacity {
            self.overflowed = true;
            self.needed = self.needed.max(wanted);
            return Err(FieldError::Overflow);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn compress_threshold(&self) -> usize {
        self.compress_threshold
    }

    pub fn set_compress_threshold(&mut self, bytes: usize) {
        self.compress_threshold = bytes;
    }

    pub fn set_locales(&mut self, locales: &[String]) {
        if self.locales != locales {
            self.locales = locales.to_vec();
        }
    }

    /// Locale slot used when a text field receives a bare string.
    pub fn set_default_locale(&mut self, slot: u8) {
        self.default_locale = slot;
    }

    pub fn default_locale(&self) -> u8 {
        self.default_locale
    }

    pub fn locale_slot(&self, locale: &str) -> Option<u8> {
        self.locales
            .iter()
            .position(|l| l == locale)
            .map(|i| i as u8 + 1)
    }

    /// Pins the clock used for `on` timestamp fields.
    pub fn set_clock(&mut self, millis: Option<i64>) {
        self.clock = millis;
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_millis() as i64)
        })
    }

    // ------------------------------------------------------------------
    // Raw writes (callers ensure first)
    // ------------------------------------------------------------------

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    #[inline]
    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    #[inline]
    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    #[inline]
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buf.put_bytes(v);
    }

    pub fn patch_u32(&mut self, at: usize, v: u32) {
        patch_u32(&mut self.buf, at, v);
    }

    // ------------------------------------------------------------------
    // Record state
    // ------------------------------------------------------------------

    #[inline]
    pub fn op(&self) -> OpKind {
        self.op
    }

    /// Whether writes create values (records or edge records) rather than update them.
    #[inline]
    pub fn is_create(&self) -> bool {
        self.op == OpKind::Create || self.edge.is_some()
    }

    #[inline]
    pub fn in_edge(&self) -> bool {
        self.edge.is_some()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Operation byte for a value write in the current state.
    #[inline]
    pub fn write_op(&self) -> u8 {
        if self.is_create() {
            ops::CREATE
        } else {
            ops::UPDATE
        }
    }

    fn cursor_cost(&self, field: u8) -> usize {
        let mut cost = 0;
        let type_changed = !self.cursor.valid || self.cursor.type_id != self.type_id;
        if type_changed {
            cost += ops::SWITCH_TYPE_LEN;
        }
        if type_changed || self.cursor.id != self.id {
            cost += ops::FULL_CURSOR_LEN;
        } else if self.cursor.field != field {
            cost += ops::SHORT_CURSOR_LEN;
        }
        cost
    }

    fn write_cursor(&mut self, field: u8, tag: TypeTag) {
        let type_changed = !self.cursor.valid || self.cursor.type_id != self.type_id;
        if type_changed {
            self.buf.put_u8(ops::SWITCH_TYPE);
            self.buf.put_u16(self.type_id);
        }
        if type_changed || self.cursor.id != self.id {
            self.buf.put_u8(ops::SWITCH_CURSOR);
            self.buf.put_u8(field);
            self.buf.put_u8(tag.code());
            self.buf.put_u32(self.id);
        } else if self.cursor.field != field {
            self.buf.put_u8(ops::SWITCH_FIELD);
            self.buf.put_u8(field);
        }
        self.cursor = CursorState {
            valid: true,
            type_id: self.type_id,
            id: self.id,
            field,
        };
    }

    /// Reserves and writes the address and operation byte of a field write,
    /// leaving room for `payload_len` bytes that the caller writes next.
    ///
    /// Inside an edge record the address is a bare field number.
    pub fn begin_field(
        &mut self,
        field: u8,
        tag: TypeTag,
        op: u8,
        payload_len: usize,
    ) -> Result<(), FieldError> {
        if self.edge.is_some() {
            self.ensure(2 + payload_len)?;
            self.buf.put_u8(field);
            self.buf.put_u8(op);
            return Ok(());
        }
        self.ensure(self.cursor_cost(field) + 1 + payload_len)?;
        self.write_cursor(field, tag);
        self.buf.put_u8(op);
        Ok(())
    }

    /// Starts a created record: forces a full cursor and writes the main block
    /// pre-filled with `main`.
    pub fn begin_create(
        &mut self,
        layout: &TypeLayout,
        id: u32,
        main: &[u8],
    ) -> Result<(), FieldError> {
        self.start_record(OpKind::Create, layout, id);
        let type_cost = if self.cursor.valid && self.cursor.type_id == self.type_id {
            0
        } else {
            ops::SWITCH_TYPE_LEN
        };
        self.ensure(type_cost + ops::FULL_CURSOR_LEN + 1 + 4 + main.len())?;
        if type_cost > 0 {
            self.buf.put_u8(ops::SWITCH_TYPE);
            self.buf.put_u16(self.type_id);
        }
        self.buf.put_u8(ops::SWITCH_CURSOR);
        self.buf.put_u8(0);
        self.buf.put_u8(TypeTag::Null.code());
        self.buf.put_u32(id);
        self.cursor = CursorState {
            valid: true,
            type_id: self.type_id,
            id,
            field: 0,
        };
        self.buf.put_u8(ops::CREATE);
        self.buf.put_u32(main.len() as u32);
        self.main_start = self.buf.len();
        self.main_len = main.len();
        self.buf.put_bytes(main);
        Ok(())
    }

    pub fn begin_update(&mut self, layout: &TypeLayout, id: u32) {
        self.start_record(OpKind::Update, layout, id);
        self.patch.clear();
        self.patch.resize(self.main_len, 0);
    }

    fn start_record(&mut self, op: OpKind, layout: &TypeLayout, id: u32) {
        self.op = op;
        self.type_id = layout.id;
        self.id = id;
        self.main_len = layout.main_len() as usize;
        self.patch_ranges.clear();
        self.increments.clear();
        self.edge = None;
        self.sort_slots.clear();
        self.sort_slots.extend_from_slice(&layout.sort_slots);
        self.sort_present.clear();
        self.sort_present.resize(layout.sort_slots.len(), false);
    }

    pub fn delete_record(&mut self, layout: &TypeLayout, id: u32) -> Result<(), FieldError> {
        self.op = OpKind::Delete;
        self.type_id = layout.id;
        self.id = id;
        let type_cost = if self.cursor.valid && self.cursor.type_id == self.type_id {
            0
        } else {
            ops::SWITCH_TYPE_LEN
        };
        self.ensure(type_cost + 5)?;
        if type_cost > 0 {
            self.buf.put_u8(ops::SWITCH_TYPE);
            self.buf.put_u16(self.type_id);
            self.cursor = CursorState {
                valid: true,
                type_id: self.type_id,
                id: 0,
                field: 0,
            };
        }
        self.buf.put_u8(ops::DELETE_RECORD);
        self.buf.put_u32(id);
        Ok(())
    }

    /// Main-region bytes of the current record or edge record.
    pub fn main_slot(&mut self, offset: u16, len: u16) -> &mut [u8] {
        let (start, end) = (offset as usize, offset as usize + len as usize);
        if let Some(frame) = self.edge {
            let base = frame.main_start;
            debug_assert!(end <= frame.main_len);
            return &mut self.buf[base + start..base + end];
        }
        match self.op {
            OpKind::Create => {
                let base = self.main_start;
                &mut self.buf[base + start..base + end]
            }
            _ => {
                self.patch_ranges.push((offset, len));
                &mut self.patch[start..end]
            }
        }
    }

    pub fn stage_increment(
        &mut self,
        op: u8,
        tag: TypeTag,
        offset: u16,
        value: &[u8],
    ) -> Result<(), FieldError> {
        if self.edge.is_some() {
            return Err(FieldError::Invalid(
                "counters are not supported on edge properties".into(),
            ));
        }
        let mut bytes = [0u8; 8];
        let width = value.len().min(8);
        bytes[..width].copy_from_slice(&value[..width]);
        self.increments.push(Increment {
            op,
            tag,
            offset,
            bytes,
            width: width as u8,
        });
        Ok(())
    }

    pub fn mark_sort(&mut self, field: u8, locale: u8) {
        if self.edge.is_some() {
            return;
        }
        if let Some(i) = self
            .sort_slots
            .iter()
            .position(|s| s.field == field && s.locale == locale)
        {
            self.sort_present[i] = true;
        }
    }

    /// Emits the staged main patch and counter operations of an update.
    pub fn finish_update(&mut self) -> Result<(), FieldError> {
        if self.patch_ranges.is_empty() && self.increments.is_empty() {
            return Ok(());
        }
        let mut ranges = self.patch_ranges.clone();
        ranges.sort_unstable();
        ranges.dedup();

        let patch_len: usize = ranges.iter().map(|&(_, len)| 4 + len as usize).sum();
        let patch_cost = if ranges.is_empty() { 0 } else { 1 + 4 + patch_len };
        let inc_cost: usize = self
            .increments
            .iter()
            .map(|inc| 1 + 1 + 2 + inc.width as usize)
            .sum();
        self.ensure(self.cursor_cost(0) + patch_cost + inc_cost)?;
        self.write_cursor(0, TypeTag::Null);

        if !ranges.is_empty() {
            self.buf.put_u8(ops::UPDATE_PARTIAL);
            self.buf.put_u32(patch_len as u32);
            for (offset, len) in ranges {
                let (start, end) = (offset as usize, offset as usize + len as usize);
                self.buf.put_u16(offset);
                self.buf.put_u16(len);
                self.buf.put_bytes(&self.patch[start..end]);
            }
        }
        for inc in &self.increments {
            self.buf.put_u8(inc.op);
            self.buf.put_u8(inc.tag.code());
            self.buf.put_u16(inc.offset);
            self.buf.put_bytes(&inc.bytes[..inc.width as usize]);
        }
        Ok(())
    }

    /// Emits `ADD_EMPTY_SORT` / `ADD_EMPTY_SORT_TEXT` for every sort slot the
    /// created record left empty.
    pub fn finish_create(&mut self, layout: &TypeLayout) -> Result<(), FieldError> {
        let mut plain: SmallVec<[u8; 8]> = SmallVec::new();
        let mut text: SmallVec<[(u8, u8); 8]> = SmallVec::new();
        for (slot, present) in self.sort_slots.iter().zip(&self.sort_present) {
            if *present {
                continue;
            }
            let is_text = layout
                .fields
                .by_number(slot.field)
                .is_some_and(|f| f.tag == TypeTag::Text);
            if is_text {
                text.push((slot.field, slot.locale));
            } else {
                plain.push(slot.field);
            }
        }
        if plain.is_empty() && text.is_empty() {
            return Ok(());
        }
        let plain_cost = if plain.is_empty() { 0 } else { 3 + plain.len() };
        let text_cost = if text.is_empty() { 0 } else { 3 + 2 * text.len() };
        self.ensure(self.cursor_cost(0) + plain_cost + text_cost)?;
        self.write_cursor(0, TypeTag::Null);
        if !plain.is_empty() {
            self.buf.put_u8(ops::ADD_EMPTY_SORT);
            self.buf.put_u16(plain.len() as u16);
            self.buf.put_bytes(&plain);
        }
        if !text.is_empty() {
            self.buf.put_u8(ops::ADD_EMPTY_SORT_TEXT);
            self.buf.put_u16(text.len() as u16);
            for (field, locale) in text {
                self.buf.put_u8(field);
                self.buf.put_u8(locale);
            }
        }
        Ok(())
    }

    pub(crate) fn record_done(&mut self) {
        self.records += 1;
    }

    // ------------------------------------------------------------------
    // Edge records
    // ------------------------------------------------------------------

    /// Opens an edge record: reserves its `u32` length and, when main edge
    /// fields are written, a leading `0 CREATE len main` block. Returns the
    /// position of the length slot for [`ModifyCtx::end_edge`].
    pub fn begin_edge(&mut self, edges: &FieldTable, with_main: bool) -> Result<usize, FieldError> {
        let main = if with_main { edges.default_main() } else { Vec::new() };
        let main_cost = if with_main { 2 + 4 + main.len() } else { 0 };
        self.ensure(4 + main_cost)?;
        let len_at = self.buf.len();
        self.buf.put_u32(0);
        if with_main {
            self.buf.put_u8(0);
            self.buf.put_u8(ops::CREATE);
            self.buf.put_u32(main.len() as u32);
            let main_start = self.buf.len();
            self.buf.put_bytes(&main);
            self.edge = Some(EdgeFrame {
                main_start,
                main_len: main.len(),
            });
        } else {
            self.edge = Some(EdgeFrame {
                main_start: self.buf.len(),
                main_len: 0,
            });
        }
        Ok(len_at)
    }

    pub fn end_edge(&mut self, len_at: usize) {
        self.edge = None;
        let len = self.buf.len() - len_at - 4;
        self.patch_u32(len_at, len as u32);
    }
}
