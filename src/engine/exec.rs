//! Query execution against a [`Store`].
//!
//! Runs the compiled byte-code directly: sections are sliced out of the
//! buffer and interpreted on the fly, nothing is decoded into a plan first.
//! Candidates flow through filter, search, sort and range in that order.
//! Aggregates stop after search and ignore the range.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use eyre::{bail, ensure, eyre, Result, WrapErr};
use tracing::trace;

use super::store::{
    main_slot, padded, read_number, strings_of, vector_of, EdgeRecord, Record, RefSlot, Store, Stored, Subject,
};
use crate::config::{EDGE_BLOCK_MARKER, ID_FIELD, MAIN_FIELD, MAX_INCLUDE_DEPTH, MULTI_REF_MARKER, SINGLE_REF_MARKER};
use crate::encoding::{hash64, patch_u32, ByteReader, PutLe};
use crate::query::compiler::{SEARCH_TEXT, SEARCH_VECTOR};
use crate::query::filter::{
    AND_OP, COND, EDGE, MODE_FIXED, MODE_HASH, MODE_LIST, MODE_NONE, MODE_RAW, OR_GROUP, OR_OP, REF, TYPE,
};
use crate::query::{AggFn, Operator, QueryHeader, QueryKind, VectorFn, QUERY_HEADER_SIZE};
use crate::schema::{PackedField, PackedRef, PackedSchema, PackedType};
use crate::types::TypeTag;

static EMPTY_EDGE: EdgeRecord = EdgeRecord {
    main: Vec::new(),
    fields: BTreeMap::new(),
};

#[derive(Clone, Copy)]
struct Cand<'s> {
    id: u32,
    rec: &'s Record,
    edge: Option<&'s EdgeRecord>,
}

/// What a filter item is evaluated against.
#[derive(Clone, Copy)]
struct Scope<'s> {
    type_id: u16,
    subject: Subject<'s>,
    edge: Option<&'s EdgeRecord>,
    edges: &'s [PackedField],
}

struct SortSpec {
    field: u8,
    tag: TypeTag,
    start: u16,
    len: u16,
    desc: bool,
    locale: u8,
}

enum Search {
    Text {
        fields: Vec<(u8, u8)>,
        words: Vec<String>,
    },
    Vector {
        field: u8,
        func: VectorFn,
        threshold: f64,
        query: Vec<f64>,
    },
}

#[derive(Default)]
struct Include<'q> {
    main: bool,
    separate: Vec<(u8, u8)>,
    refs: Vec<RefBlock<'q>>,
    edge: Option<Box<Include<'q>>>,
}

struct RefBlock<'q> {
    field: u8,
    multi: bool,
    type_id: u16,
    offset: u32,
    limit: u32,
    filter: &'q [u8],
    sort: Vec<SortSpec>,
    include: Include<'q>,
}

struct AggSpec {
    func: AggFn,
    tag: TypeTag,
    start: u16,
    len: u16,
    slot: usize,
}

pub(crate) fn execute(store: &Store, schema: &PackedSchema, query: &[u8]) -> Result<Vec<u8>> {
    let header = QueryHeader::from_bytes(query)?;
    let body = &query[QUERY_HEADER_SIZE..];
    ensure!(
        body.len() == header.body_len(),
        "query body is {} bytes, header declares {}",
        body.len(),
        header.body_len()
    );
    let mut r = ByteReader::new(body);
    let target = r.bytes(header.target_len() as usize)?;
    let filter = r.bytes(header.filter_len() as usize)?;
    let sort = r.bytes(header.sort_len() as usize)?;
    let search = r.bytes(header.search_len() as usize)?;
    let include = r.bytes(header.include_len() as usize)?;
    let aggregate = r.bytes(header.aggregate_len() as usize)?;

    let ty = schema
        .get(header.type_id())
        .ok_or_else(|| eyre!("query for unknown type {}", header.type_id()))?;
    let exec = Exec { store, schema };
    let kind = header.query_kind();
    let cands = exec.candidates(ty, kind, target)?;
    let search = parse_search(search).wrap_err("bad search section")?;
    let sort = parse_sort(sort).wrap_err("bad sort section")?;

    let mut out = Vec::new();
    match kind {
        QueryKind::AggregateCount => {
            let picked = exec.select(ty, &[], cands, filter, search.as_ref(), &[], None)?;
            out.put_u32(picked.len() as u32);
        }
        QueryKind::Aggregate => {
            let picked = exec.select(ty, &[], cands, filter, search.as_ref(), &[], None)?;
            aggregate_into(&picked, aggregate, &mut out).wrap_err("bad aggregate section")?;
        }
        _ => {
            let include = parse_include(include, 0).wrap_err("bad include section")?;
            let range = Some((header.offset(), header.limit()));
            let picked = exec.select(ty, &[], cands, filter, search.as_ref(), &sort, range)?;
            out.put_u32(picked.len() as u32);
            for cand in picked {
                exec.write_record(&mut out, ty, cand, &include, None)?;
            }
        }
    }
    trace!(type_id = ty.type_id, ?kind, result_len = out.len(), "executed query");
    Ok(out)
}

struct Exec<'s> {
    store: &'s Store,
    schema: &'s PackedSchema,
}

impl<'s> Exec<'s> {
    fn candidates(&self, ty: &PackedType, kind: QueryKind, target: &[u8]) -> Result<Vec<Cand<'s>>> {
        let Some(table) = self.store.table(ty.type_id) else {
            return Ok(Vec::new());
        };
        let all = || {
            table
                .records
                .iter()
                .map(|(id, rec)| Cand {
                    id: *id,
                    rec,
                    edge: None,
                })
                .collect::<Vec<_>>()
        };
        let mut r = ByteReader::new(target);
        let ids = match kind {
            QueryKind::Default | QueryKind::AggregateCount => return Ok(all()),
            QueryKind::Ids => read_ids(&mut r)?,
            QueryKind::Id => vec![r.u32()?],
            QueryKind::Alias => lookup_alias(table, &mut r)?,
            QueryKind::Aggregate => match target.len() {
                0 => return Ok(all()),
                4 => vec![r.u32()?],
                n if n % 4 == 0 && u32::from_le_bytes([target[0], target[1], target[2], target[3]]) as usize * 4 + 4 == n => {
                    read_ids(&mut r)?
                }
                _ => lookup_alias(table, &mut r)?,
            },
        };
        Ok(ids
            .into_iter()
            .filter_map(|id| table.records.get(&id).map(|rec| Cand { id, rec, edge: None }))
            .collect())
    }

    fn scope(&self, ty: &'s PackedType, cand: Cand<'s>, edges: &'s [PackedField]) -> Scope<'s> {
        Scope {
            type_id: ty.type_id,
            subject: Subject::record(ty, cand.id, cand.rec),
            edge: cand.edge,
            edges,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn select(
        &self,
        ty: &'s PackedType,
        edges: &'s [PackedField],
        mut cands: Vec<Cand<'s>>,
        filter: &[u8],
        search: Option<&Search>,
        sort: &[SortSpec],
        range: Option<(u32, u32)>,
    ) -> Result<Vec<Cand<'s>>> {
        if !filter.is_empty() {
            let mut kept = Vec::with_capacity(cands.len());
            for cand in cands {
                if self.matches(self.scope(ty, cand, edges), filter)? {
                    kept.push(cand);
                }
            }
            cands = kept;
        }

        if let Some(search) = search {
            let mut ranked: Vec<(f64, Cand<'s>)> = cands
                .into_iter()
                .filter_map(|c| rank(ty, &c, search).map(|score| (score, c)))
                .collect();
            if sort.is_empty() {
                ranked.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then(a.id.cmp(&b.id)));
            }
            cands = ranked.into_iter().map(|(_, c)| c).collect();
        }

        if !sort.is_empty() {
            let mut keyed: Vec<(Vec<Key>, Cand<'s>)> = cands
                .into_iter()
                .map(|c| (sort.iter().map(|spec| sort_key(&c, spec)).collect(), c))
                .collect();
            keyed.sort_by(|(ka, a), (kb, b)| {
                for ((x, y), spec) in ka.iter().zip(kb).zip(sort) {
                    let ord = x.cmp_key(y);
                    let ord = if spec.desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.id.cmp(&b.id)
            });
            cands = keyed.into_iter().map(|(_, c)| c).collect();
        }

        Ok(match range {
            Some((offset, limit)) => cands
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect(),
            None => cands,
        })
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    /// Every item of `filter` must match.
    fn matches(&self, scope: Scope<'s>, filter: &[u8]) -> Result<bool> {
        let mut r = ByteReader::new(filter);
        let mut all = true;
        while !r.is_empty() {
            all &= self.item(scope, &mut r)?;
        }
        Ok(all)
    }

    fn item(&self, scope: Scope<'s>, r: &mut ByteReader<'_>) -> Result<bool> {
        let at = r.position();
        Ok(match r.u8()? {
            COND => cond(&scope.subject, r)?,
            OR_GROUP => {
                let len = r.u16()? as usize;
                self.rpn(scope, r.bytes(len)?)?
            }
            REF => {
                let field = r.u8()?;
                let len = r.u16()? as usize;
                self.through_ref(scope, field, r.bytes(len)?)?
            }
            TYPE => {
                let op = operator(r.u8()?)?;
                let type_id = r.u16()?;
                (type_id == scope.type_id) != op.is_negated()
            }
            EDGE => {
                let len = r.u16()? as usize;
                let body = r.bytes(len)?;
                let edge = scope.edge.unwrap_or(&EMPTY_EDGE);
                let inner = Scope {
                    type_id: scope.type_id,
                    subject: Subject::edge(scope.edges, edge),
                    edge: None,
                    edges: &[],
                };
                self.matches(inner, body)?
            }
            other => bail!("unexpected filter token {other:#04x} at {at}"),
        })
    }

    /// Evaluates an `OR_GROUP` body in reverse Polish notation.
    fn rpn(&self, scope: Scope<'s>, body: &[u8]) -> Result<bool> {
        let mut r = ByteReader::new(body);
        let mut stack: Vec<bool> = Vec::new();
        while !r.is_empty() {
            match body[r.position()] {
                token @ (AND_OP | OR_OP) => {
                    r.skip(1)?;
                    let n = r.u8()? as usize;
                    ensure!(
                        n > 0 && n <= stack.len(),
                        "group operator wants {n} operands, {} available",
                        stack.len()
                    );
                    let args = stack.split_off(stack.len() - n);
                    stack.push(if token == AND_OP {
                        args.iter().all(|b| *b)
                    } else {
                        args.iter().any(|b| *b)
                    });
                }
                _ => {
                    let hit = self.item(scope, &mut r)?;
                    stack.push(hit);
                }
            }
        }
        Ok(stack.iter().all(|b| *b))
    }

    /// True when any record behind reference `field` matches `body`.
    fn through_ref(&self, scope: Scope<'s>, field: u8, body: &[u8]) -> Result<bool> {
        let Some(desc) = scope.subject.field(field) else {
            return Ok(false);
        };
        let info = desc
            .reference
            .as_ref()
            .ok_or_else(|| eyre!("field {field} is not a reference"))?;
        let Some(target) = self.schema.get(info.target) else {
            return Ok(false);
        };
        for slot in ref_slots(scope.subject.fields.get(&field)) {
            let Some(rec) = self.store.record(info.target, slot.id) else {
                continue;
            };
            let inner = Scope {
                type_id: info.target,
                subject: Subject::record(target, slot.id, rec),
                edge: slot.edge.as_ref(),
                edges: &info.edges,
            };
            if self.matches(inner, body)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    fn write_record(
        &self,
        out: &mut Vec<u8>,
        ty: &'s PackedType,
        cand: Cand<'s>,
        include: &Include<'_>,
        link: Option<&'s PackedRef>,
    ) -> Result<()> {
        out.put_u32(cand.id);
        let len_at = out.len();
        out.put_u32(0);
        write_items(out, &cand.rec.main, &cand.rec.fields, ty.main_len, include);
        for block in &include.refs {
            self.write_block(out, ty, cand, block)?;
        }
        if let (Some(edge_include), Some(edge), Some(link)) = (&include.edge, cand.edge, link) {
            out.put_u8(EDGE_BLOCK_MARKER);
            let at = out.len();
            out.put_u32(0);
            write_items(out, &edge.main, &edge.fields, link.edge_main_len, edge_include);
            let len = out.len() - at - 4;
            patch_u32(out, at, len as u32);
        }
        let len = out.len() - len_at - 4;
        patch_u32(out, len_at, len as u32);
        Ok(())
    }

    fn write_block(&self, out: &mut Vec<u8>, ty: &'s PackedType, cand: Cand<'s>, block: &RefBlock<'_>) -> Result<()> {
        let desc = ty
            .field(block.field)
            .ok_or_else(|| eyre!("type {} has no field {}", ty.type_id, block.field))?;
        let info = desc
            .reference
            .as_ref()
            .ok_or_else(|| eyre!("field {} is not a reference", block.field))?;
        let target = self
            .schema
            .get(block.type_id)
            .ok_or_else(|| eyre!("include of unknown type {}", block.type_id))?;
        let slots = ref_slots(cand.rec.fields.get(&block.field));

        out.put_u8(if block.multi { MULTI_REF_MARKER } else { SINGLE_REF_MARKER });
        out.put_u8(block.field);
        let at = out.len();
        out.put_u32(0);
        if block.multi {
            let cands: Vec<Cand<'s>> = slots
                .iter()
                .filter_map(|slot| {
                    self.store.record(block.type_id, slot.id).map(|rec| Cand {
                        id: slot.id,
                        rec,
                        edge: slot.edge.as_ref(),
                    })
                })
                .collect();
            let range = Some((block.offset, block.limit));
            let picked = self.select(target, &info.edges, cands, block.filter, None, &block.sort, range)?;
            out.put_u32(picked.len() as u32);
            for c in picked {
                self.write_record(out, target, c, &block.include, Some(info))?;
            }
        } else if let Some(slot) = slots.first() {
            if let Some(rec) = self.store.record(block.type_id, slot.id) {
                let c = Cand {
                    id: slot.id,
                    rec,
                    edge: slot.edge.as_ref(),
                };
                self.write_record(out, target, c, &block.include, Some(info))?;
            }
        }
        let len = out.len() - at - 4;
        patch_u32(out, at, len as u32);
        Ok(())
    }
}

fn ref_slots(stored: Option<&Stored>) -> &[RefSlot] {
    match stored {
        Some(Stored::Ref(slot)) => std::slice::from_ref(slot),
        Some(Stored::Refs(list)) => list,
        _ => &[],
    }
}

fn write_item(out: &mut Vec<u8>, field: u8, payload: &[u8]) {
    out.put_u8(field);
    out.put_u32(payload.len() as u32);
    out.put_bytes(payload);
}

fn write_items(
    out: &mut Vec<u8>,
    main: &[u8],
    fields: &BTreeMap<u8, Stored>,
    main_len: u16,
    include: &Include<'_>,
) {
    if include.main {
        let body = padded(main, main_len as usize);
        write_item(out, MAIN_FIELD, &body);
    }
    for &(field, locale) in &include.separate {
        match fields.get(&field) {
            Some(Stored::Bytes(payload)) => write_item(out, field, payload),
            Some(Stored::Text(map)) => {
                for (slot, payload) in map {
                    if locale == 0 || *slot == locale {
                        write_item(out, field, payload);
                    }
                }
            }
            Some(Stored::Set(set)) => write_item(out, field, &(set.len() as u32).to_le_bytes()),
            Some(Stored::Ref(slot)) => write_item(out, field, &slot.id.to_le_bytes()),
            Some(Stored::Refs(list)) => {
                let mut payload = Vec::with_capacity(4 + list.len() * 4);
                payload.put_u32(list.len() as u32);
                for slot in list {
                    payload.put_u32(slot.id);
                }
                write_item(out, field, &payload);
            }
            None => {}
        }
    }
}

// ----------------------------------------------------------------------
// Section parsing
// ----------------------------------------------------------------------

fn read_ids(r: &mut ByteReader<'_>) -> Result<Vec<u32>> {
    let count = r.u32()? as usize;
    ensure!(count.saturating_mul(4) <= r.remaining(), "id list exceeds the target section");
    (0..count).map(|_| -> Result<u32> { Ok(r.u32()?) }).collect()
}

fn lookup_alias(table: &super::store::Table, r: &mut ByteReader<'_>) -> Result<Vec<u32>> {
    let field = r.u8()?;
    let value = r.len_prefixed()?;
    Ok(table.aliases.get(&(field, value.to_vec())).copied().into_iter().collect())
}

fn parse_sort(bytes: &[u8]) -> Result<Vec<SortSpec>> {
    let mut r = ByteReader::new(bytes);
    let mut specs = Vec::new();
    while !r.is_empty() {
        let field = r.u8()?;
        let code = r.u8()?;
        let tag = TypeTag::from_u8(code).ok_or_else(|| eyre!("unknown sort tag {code}"))?;
        specs.push(SortSpec {
            field,
            tag,
            start: r.u16()?,
            len: r.u16()?,
            desc: r.u8()? != 0,
            locale: r.u8()?,
        });
    }
    Ok(specs)
}

fn parse_search(bytes: &[u8]) -> Result<Option<Search>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let mut r = ByteReader::new(bytes);
    let search = match r.u8()? {
        SEARCH_TEXT => {
            let count = r.u8()? as usize;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                fields.push((r.u8()?, r.u8()?));
            }
            let query = String::from_utf8_lossy(r.len_prefixed()?).to_lowercase();
            Search::Text {
                fields,
                words: query.split_whitespace().map(str::to_string).collect(),
            }
        }
        SEARCH_VECTOR => {
            let field = r.u8()?;
            let code = r.u8()?;
            let func = VectorFn::from_u8(code).ok_or_else(|| eyre!("unknown vector function {code}"))?;
            let threshold = r.f64()?;
            let count = r.u32()? as usize;
            ensure!(count.saturating_mul(4) <= r.remaining(), "search vector exceeds the section");
            let query = (0..count)
                .map(|_| -> Result<f64> { Ok(r.f32()? as f64) })
                .collect::<Result<Vec<_>>>()?;
            Search::Vector {
                field,
                func,
                threshold,
                query,
            }
        }
        other => bail!("unknown search kind {other:#04x}"),
    };
    ensure!(r.is_empty(), "trailing bytes after the search");
    Ok(Some(search))
}

fn parse_include(bytes: &[u8], depth: usize) -> Result<Include<'_>> {
    ensure!(depth <= MAX_INCLUDE_DEPTH + 1, "include nesting exceeds {MAX_INCLUDE_DEPTH}");
    let mut include = Include::default();
    if bytes.is_empty() {
        return Ok(include);
    }
    let mut r = ByteReader::new(bytes);
    let main_count = r.u16()? as usize;
    r.skip(main_count * 4)?;
    include.main = main_count > 0;
    let sep_count = r.u16()? as usize;
    for _ in 0..sep_count {
        let field = r.u8()?;
        let _tag = r.u8()?;
        include.separate.push((field, r.u8()?));
    }
    while !r.is_empty() {
        match r.u8()? {
            marker @ (SINGLE_REF_MARKER | MULTI_REF_MARKER) => {
                let field = r.u8()?;
                let mut b = ByteReader::new(r.len_prefixed()?);
                let type_id = b.u16()?;
                let multi = marker == MULTI_REF_MARKER;
                let mut block = RefBlock {
                    field,
                    multi,
                    type_id,
                    offset: 0,
                    limit: u32::MAX,
                    filter: &[],
                    sort: Vec::new(),
                    include: Include::default(),
                };
                if multi {
                    block.offset = b.u32()?;
                    block.limit = b.u32()?;
                    let filter_len = b.u16()? as usize;
                    let sort_len = b.u16()? as usize;
                    block.filter = b.bytes(filter_len)?;
                    block.sort = parse_sort(b.bytes(sort_len)?)?;
                }
                block.include = parse_include(b.rest(), depth + 1)?;
                include.refs.push(block);
            }
            EDGE_BLOCK_MARKER => {
                let body = r.len_prefixed()?;
                include.edge = Some(Box::new(parse_include(body, depth + 1)?));
            }
            other => bail!("unexpected include marker {other}"),
        }
    }
    Ok(include)
}

// ----------------------------------------------------------------------
// Conditions
// ----------------------------------------------------------------------

enum Operand<'q> {
    Fixed(&'q [u8]),
    Raw(&'q [u8]),
    Hash(u32, u64),
    List(usize, &'q [u8]),
    Absent,
}

impl<'q> Operand<'q> {
    fn read(r: &mut ByteReader<'q>) -> Result<Self> {
        Ok(match r.u8()? {
            MODE_FIXED => {
                let len = r.u16()? as usize;
                Operand::Fixed(r.bytes(len)?)
            }
            MODE_RAW => Operand::Raw(r.len_prefixed()?),
            MODE_HASH => {
                let len = r.u32()?;
                Operand::Hash(len, r.u64()?)
            }
            MODE_LIST => {
                let count = r.u16()? as usize;
                let width = r.u16()? as usize;
                ensure!(width > 0, "list operand of zero width");
                Operand::List(width, r.bytes(count * width)?)
            }
            MODE_NONE => Operand::Absent,
            other => bail!("unknown operand mode {other}"),
        })
    }

    fn values(&self) -> Vec<&'q [u8]> {
        match *self {
            Operand::Fixed(b) | Operand::Raw(b) => vec![b],
            Operand::List(width, b) => b.chunks(width).collect(),
            _ => Vec::new(),
        }
    }

    fn u32s(&self) -> Result<Vec<u32>> {
        self.values()
            .into_iter()
            .map(|v| -> Result<u32> { Ok(ByteReader::new(v).u32()?) })
            .collect()
    }
}

fn operator(code: u8) -> Result<Operator> {
    Operator::from_code(code).ok_or_else(|| eyre!("unknown operator {code:#04x}"))
}

/// The operator with its negation stripped.
fn positive(op: Operator) -> Operator {
    match op {
        Operator::NotEqual => Operator::Equal,
        Operator::NotHas => Operator::Has,
        Operator::NotExists => Operator::Exists,
        Operator::NotLike => Operator::Like,
        other => other,
    }
}

fn compare(op: Operator, a: f64, b: f64) -> bool {
    match op {
        Operator::Gt => a > b,
        Operator::Lt => a < b,
        Operator::Ge => a >= b,
        Operator::Le => a <= b,
        _ => a == b,
    }
}

fn contains(hay: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || hay.windows(needle.len()).any(|w| w == needle)
}

fn partial(op: Operator, hay: &[u8], needle: &[u8]) -> bool {
    match op {
        Operator::Like => String::from_utf8_lossy(hay)
            .to_lowercase()
            .contains(&String::from_utf8_lossy(needle).to_lowercase()),
        _ => contains(hay, needle),
    }
}

/// The string of a `len:u8 bytes` main slot.
fn main_string(slot: &[u8]) -> &[u8] {
    let n = slot.first().copied().unwrap_or(0) as usize;
    slot.get(1..1 + n).unwrap_or_default()
}

fn cond(subject: &Subject<'_>, r: &mut ByteReader<'_>) -> Result<bool> {
    let field = r.u8()?;
    let start = r.u16()?;
    let code = r.u8()?;
    let tag = TypeTag::from_u8(code).ok_or_else(|| eyre!("unknown condition tag {code}"))?;
    let op = operator(r.u8()?)?;
    let value = Operand::read(r)?;
    let base = positive(op);
    let hit = match field {
        ID_FIELD => base == Operator::Exists || value.u32s()?.iter().any(|v| compare(base, subject.id as f64, *v as f64)),
        MAIN_FIELD => main_cond(subject, start, tag, base, &value)?,
        _ => separate_cond(subject, field, start, tag, base, &value)?,
    };
    Ok(hit != op.is_negated())
}

fn main_cond(subject: &Subject<'_>, start: u16, tag: TypeTag, op: Operator, value: &Operand<'_>) -> Result<bool> {
    let declared = subject.main_field(start).map_or(0, |f| f.len);
    Ok(match (op, value) {
        (Operator::Exists, _) => subject.slot(start, declared).iter().any(|b| *b != 0),
        (Operator::Has | Operator::Like, Operand::Raw(needle)) => {
            let slot = subject.slot(start, declared);
            partial(op, main_string(&slot), needle)
        }
        (_, Operand::Fixed(_) | Operand::List(..)) => value.values().iter().any(|v| {
            let slot = subject.slot(start, v.len() as u16);
            if op.is_range() {
                match (read_number(tag, &slot), read_number(tag, v)) {
                    (Some(a), Some(b)) => compare(op, a, b),
                    _ => false,
                }
            } else {
                *slot == **v
            }
        }),
        _ => bail!("operand does not fit a main-region condition"),
    })
}

fn separate_cond(
    subject: &Subject<'_>,
    field: u8,
    start: u16,
    tag: TypeTag,
    op: Operator,
    value: &Operand<'_>,
) -> Result<bool> {
    let stored = subject.fields.get(&field);
    if op == Operator::Exists {
        return Ok(match stored {
            Some(Stored::Text(map)) if start != 0 => map.contains_key(&(start as u8)),
            other => other.is_some(),
        });
    }
    Ok(match tag {
        TypeTag::String | TypeTag::Alias | TypeTag::Text | TypeTag::Binary | TypeTag::Json => {
            let mut strings = stored.map(|s| strings_of(s, tag, start as u8)).unwrap_or_default();
            if strings.is_empty() {
                strings.push(Cow::Borrowed(&[][..]));
            }
            strings.iter().any(|s| match *value {
                Operand::Raw(v) if op.is_partial() => partial(op, s, v),
                Operand::Raw(v) => **s == *v,
                Operand::Hash(len, hash) => s.len() == len as usize && hash64(s) == hash,
                _ => false,
            })
        }
        TypeTag::Reference | TypeTag::References => {
            let held = ref_slots(stored);
            value.u32s()?.iter().any(|id| held.iter().any(|s| s.id == *id))
        }
        TypeTag::Cardinality => {
            let count = match stored {
                Some(Stored::Set(set)) => set.len(),
                _ => 0,
            };
            value.u32s()?.iter().any(|v| compare(op, count as f64, *v as f64))
        }
        other => bail!("cannot evaluate a condition on {other} field {field}"),
    })
}

// ----------------------------------------------------------------------
// Search and sort
// ----------------------------------------------------------------------

/// Ranking score, higher first; `None` drops the candidate.
fn rank(ty: &PackedType, cand: &Cand<'_>, search: &Search) -> Option<f64> {
    match search {
        Search::Text { fields, words } => {
            if words.is_empty() {
                return Some(0.0);
            }
            let mut score = 0.0;
            for &(field, weight) in fields {
                let text = field_text(ty, cand, field);
                let hits = words.iter().filter(|w| text.contains(w.as_str())).count();
                score += f64::from(weight) * hits as f64;
            }
            (score > 0.0).then_some(score)
        }
        Search::Vector {
            field,
            func,
            threshold,
            query,
        } => {
            let desc = ty.field(*field)?;
            let subject = Subject::record(ty, cand.id, cand.rec);
            let stored = vector_of(&subject, desc)?;
            let d = distance(*func, &stored, query);
            match func {
                VectorFn::Cosine | VectorFn::DotProduct => (d >= *threshold).then_some(d),
                VectorFn::Euclidean | VectorFn::Manhattan => (d <= *threshold).then_some(-d),
            }
        }
    }
}

fn field_text(ty: &PackedType, cand: &Cand<'_>, field: u8) -> String {
    let Some(desc) = ty.field(field) else {
        return String::new();
    };
    let mut text = String::new();
    if desc.separate() {
        if let Some(stored) = cand.rec.fields.get(&field) {
            for s in strings_of(stored, desc.tag, 0) {
                text.push_str(&String::from_utf8_lossy(&s));
                text.push(' ');
            }
        }
    } else if desc.tag == TypeTag::String {
        let slot = main_slot(&cand.rec.main, desc.offset, desc.len);
        text.push_str(&String::from_utf8_lossy(main_string(&slot)));
    }
    text.to_lowercase()
}

fn distance(func: VectorFn, a: &[f64], b: &[f64]) -> f64 {
    let pairs = a.iter().zip(b);
    match func {
        VectorFn::Cosine => {
            let (mut dot, mut na, mut nb) = (0.0, 0.0, 0.0);
            for (x, y) in pairs {
                dot += x * y;
                na += x * x;
                nb += y * y;
            }
            if na == 0.0 || nb == 0.0 {
                0.0
            } else {
                dot / (na.sqrt() * nb.sqrt())
            }
        }
        VectorFn::DotProduct => pairs.map(|(x, y)| x * y).sum(),
        VectorFn::Euclidean => pairs.map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt(),
        VectorFn::Manhattan => pairs.map(|(x, y)| (x - y).abs()).sum(),
    }
}

/// Sort key; missing values order first.
#[derive(Debug, PartialEq)]
enum Key {
    Missing,
    Num(f64),
    Bytes(Vec<u8>),
}

impl Key {
    fn cmp_key(&self, other: &Key) -> Ordering {
        match (self, other) {
            (Key::Missing, Key::Missing) => Ordering::Equal,
            (Key::Missing, _) => Ordering::Less,
            (_, Key::Missing) => Ordering::Greater,
            (Key::Num(a), Key::Num(b)) => a.total_cmp(b),
            (Key::Num(_), Key::Bytes(_)) => Ordering::Less,
            (Key::Bytes(_), Key::Num(_)) => Ordering::Greater,
            (Key::Bytes(a), Key::Bytes(b)) => a.cmp(b),
        }
    }
}

fn main_key(tag: TypeTag, slot: &[u8]) -> Key {
    match read_number(tag, slot) {
        Some(n) => Key::Num(n),
        None if tag == TypeTag::String => Key::Bytes(main_string(slot).to_vec()),
        None => Key::Bytes(slot.to_vec()),
    }
}

fn sort_key(cand: &Cand<'_>, spec: &SortSpec) -> Key {
    match spec.field {
        ID_FIELD => Key::Num(cand.id as f64),
        MAIN_FIELD => main_key(spec.tag, &main_slot(&cand.rec.main, spec.start, spec.len)),
        EDGE_BLOCK_MARKER => cand
            .edge
            .map_or(Key::Missing, |e| main_key(spec.tag, &main_slot(&e.main, spec.start, spec.len))),
        field => match cand.rec.fields.get(&field) {
            None => Key::Missing,
            Some(Stored::Set(set)) => Key::Num(set.len() as f64),
            Some(stored) => strings_of(stored, spec.tag, spec.locale)
                .into_iter()
                .next()
                .map_or(Key::Missing, |s| Key::Bytes(s.into_owned())),
        },
    }
}

// ----------------------------------------------------------------------
// Aggregates
// ----------------------------------------------------------------------

fn get8(acc: &[u8], at: usize) -> [u8; 8] {
    let mut b = [0u8; 8];
    b.copy_from_slice(&acc[at..at + 8]);
    b
}

fn get_f64(acc: &[u8], at: usize) -> f64 {
    f64::from_le_bytes(get8(acc, at))
}

fn get_u64(acc: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(get8(acc, at))
}

fn set_f64(acc: &mut [u8], at: usize, v: f64) {
    acc[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

fn set_u64(acc: &mut [u8], at: usize, v: u64) {
    acc[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

fn accumulate(f: &AggSpec, acc: &mut [u8], main: &[u8]) {
    let s = f.slot;
    if f.func == AggFn::Count {
        let mut n = [0u8; 4];
        n.copy_from_slice(&acc[s..s + 4]);
        let n = u32::from_le_bytes(n).wrapping_add(1);
        acc[s..s + 4].copy_from_slice(&n.to_le_bytes());
        return;
    }
    let Some(v) = read_number(f.tag, &main_slot(main, f.start, f.len)) else {
        return;
    };
    match f.func {
        AggFn::Sum => set_f64(acc, s, get_f64(acc, s) + v),
        AggFn::Min => set_f64(acc, s, get_f64(acc, s).min(v)),
        AggFn::Max => set_f64(acc, s, get_f64(acc, s).max(v)),
        AggFn::Avg => {
            set_f64(acc, s, get_f64(acc, s) + v);
            set_u64(acc, s + 8, get_u64(acc, s + 8) + 1);
        }
        AggFn::Stddev | AggFn::Var => {
            let n = get_u64(acc, s) + 1;
            let mean = get_f64(acc, s + 8);
            let delta = v - mean;
            let mean = mean + delta / n as f64;
            let m2 = get_f64(acc, s + 16) + delta * (v - mean);
            set_u64(acc, s, n);
            set_f64(acc, s + 8, mean);
            set_f64(acc, s + 16, m2);
        }
        AggFn::Count => {}
    }
}

fn group_key(rec: &Record, field: u8, start: u16, len: u16) -> Vec<u8> {
    if field == MAIN_FIELD {
        return main_slot(&rec.main, start, len).into_owned();
    }
    match rec.fields.get(&field) {
        Some(Stored::Bytes(payload)) => payload.clone(),
        Some(Stored::Text(map)) => map.values().next().cloned().unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn aggregate_into(picked: &[Cand<'_>], section: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let mut r = ByteReader::new(section);
    let group = match r.u8()? {
        0 => None,
        _ => {
            let field = r.u8()?;
            let _tag = r.u8()?;
            Some((field, r.u16()?, r.u16()?))
        }
    };
    let count = r.u16()? as usize;
    let mut fns = Vec::with_capacity(count);
    for _ in 0..count {
        let code = r.u8()?;
        let func = AggFn::from_u8(code).ok_or_else(|| eyre!("unknown aggregate function {code}"))?;
        let _field = r.u8()?;
        let code = r.u8()?;
        let tag = TypeTag::from_u8(code).ok_or_else(|| eyre!("unknown aggregate tag {code}"))?;
        let start = r.u16()?;
        let len = r.u16()?;
        let slot = r.u16()? as usize;
        let width = r.u8()?;
        ensure!(width == func.width(), "{} slot is {width} bytes wide", func.name());
        fns.push(AggSpec {
            func,
            tag,
            start,
            len,
            slot,
        });
    }
    let acc_size = r.u16()? as usize;
    ensure!(r.is_empty(), "trailing bytes after the aggregate section");
    ensure!(
        fns.iter().all(|f| f.slot + f.func.width() as usize <= acc_size),
        "aggregate slot outside the accumulator"
    );

    let mut fresh = vec![0u8; acc_size];
    for f in &fns {
        match f.func {
            AggFn::Min => set_f64(&mut fresh, f.slot, f64::INFINITY),
            AggFn::Max => set_f64(&mut fresh, f.slot, f64::NEG_INFINITY),
            _ => {}
        }
    }
    let mut groups: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    for cand in picked {
        let key = match group {
            Some((field, start, len)) => group_key(cand.rec, field, start, len),
            None => Vec::new(),
        };
        let acc = groups.entry(key).or_insert_with(|| fresh.clone());
        for f in &fns {
            accumulate(f, acc, &cand.rec.main);
        }
    }

    match group {
        None => {
            out.put_u32(0);
            out.put_bytes(groups.values().next().unwrap_or(&fresh));
        }
        Some(_) => {
            out.put_u32(groups.len() as u32);
            for (key, acc) in &groups {
                let key_len = u16::try_from(key.len()).map_err(|_| eyre!("group key of {} bytes", key.len()))?;
                out.put_u16(key_len);
                out.put_bytes(key);
                out.put_bytes(acc);
            }
        }
    }
    Ok(())
}
