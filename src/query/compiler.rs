//! # Query Compiler
//!
//! Turns a [`QueryDef`] into the byte-code the engine executes and the
//! [`ReaderSchema`] the decoder reads its result with. Compilation is pure:
//! the same definition against the same schema always yields the same bytes.
//!
//! Section layouts not covered by the filter, include and aggregate modules:
//!
//! ```text
//! target  ids:   count:u32 id:u32*
//!         id:    id:u32
//!         alias: field:u8 len:u32 bytes
//! sort    field:u8 tag:u8 start:u16 len:u16 order:u8 locale:u8
//! search  0x01 count:u8 (field:u8 weight:u8)* len:u32 query
//!         0x02 field:u8 fn:u8 threshold:f64 count:u32 f32*
//! ```
//!
//! Sorts on edge properties address the edge main region with field 253.

use std::sync::Arc;

use eyre::{Result, WrapErr};
use tracing::debug;
use zerocopy::IntoBytes;

use crate::config::{DEFAULT_LIMIT, EDGE_BLOCK_MARKER, ID_FIELD, MAIN_FIELD};
use crate::decode::ReaderSchema;
use crate::encoding::PutLe;
use crate::error::SchemaError;
use crate::schema::{FieldTable, SchemaLayout, TypeLayout};
use crate::types::TypeTag;

use super::aggregate::compile_aggregate;
use super::def::{QueryDef, SearchDef, SortDef, Target};
use super::filter::{compile_filter, FilterScope};
use super::header::{QueryHeader, QueryKind, QUERY_HEADER_SIZE};
use super::include::{compile_include, IncludeCx};

pub const SEARCH_TEXT: u8 = 0x01;
pub const SEARCH_VECTOR: u8 = 0x02;

/// A query ready to hand to the engine.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub bytes: Vec<u8>,
    pub reader: Arc<ReaderSchema>,
    /// Hash of the schema the query was compiled against.
    pub schema_hash: u64,
}

impl CompiledQuery {
    pub fn header(&self) -> Result<&QueryHeader> {
        QueryHeader::from_bytes(&self.bytes)
    }

    pub fn kind(&self) -> QueryKind {
        self.reader.kind
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidFilter {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn query_kind(def: &QueryDef) -> QueryKind {
    if let Some(agg) = &def.aggregate {
        let bare = agg.is_bare_count()
            && def.filter.is_empty()
            && def.search.is_none()
            && def.target == Target::All;
        return if bare {
            QueryKind::AggregateCount
        } else {
            QueryKind::Aggregate
        };
    }
    match def.target {
        Target::All => QueryKind::Default,
        Target::Ids(_) => QueryKind::Ids,
        Target::Id(_) => QueryKind::Id,
        Target::Alias { .. } => QueryKind::Alias,
    }
}

fn compile_target(layout: &TypeLayout, target: &Target, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    match target {
        Target::All => {}
        Target::Ids(ids) => {
            if ids.contains(&0) {
                return Err(invalid("id", "record ids start at 1"));
            }
            out.put_u32(ids.len() as u32);
            for id in ids {
                out.put_u32(*id);
            }
        }
        Target::Id(id) => {
            if *id == 0 {
                return Err(invalid("id", "record ids start at 1"));
            }
            out.put_u32(*id);
        }
        Target::Alias { field, value } => {
            let desc = layout.field(field)?;
            if desc.tag != TypeTag::Alias {
                return Err(invalid(field, "lookups by value need an alias field"));
            }
            out.put_u8(desc.number);
            out.put_u32(value.len() as u32);
            out.put_bytes(value.as_bytes());
        }
    }
    Ok(())
}

/// Compiles a sort entry for `layout`, or for the edge properties in `edges`
/// when the field starts with `$`.
pub(crate) fn compile_sort(
    schema: &SchemaLayout,
    layout: &TypeLayout,
    edges: Option<&FieldTable>,
    sort: &SortDef,
) -> Result<Vec<u8>, SchemaError> {
    let name = sort.field.as_str();
    let mut out = Vec::with_capacity(8);

    if name == "id" {
        out.put_u8(ID_FIELD);
        out.put_u8(TypeTag::Id.code());
        out.put_u16(0);
        out.put_u16(4);
        out.put_u8(sort.order as u8);
        out.put_u8(0);
        return Ok(out);
    }

    if name.starts_with('$') {
        let desc = edges
            .and_then(|e| e.get(name))
            .ok_or_else(|| SchemaError::UnknownField {
                type_name: layout.name.clone(),
                field: name.to_string(),
            })?;
        if desc.separate {
            return Err(SchemaError::NotSortable(name.to_string()));
        }
        out.put_u8(EDGE_BLOCK_MARKER);
        out.put_u8(desc.tag.code());
        out.put_u16(desc.offset);
        out.put_u16(desc.len);
        out.put_u8(sort.order as u8);
        out.put_u8(0);
        return Ok(out);
    }

    let desc = layout.field(name)?;
    if desc.is_main() {
        if matches!(desc.tag, TypeTag::Vector | TypeTag::MicroBuffer) {
            return Err(SchemaError::NotSortable(name.to_string()));
        }
        out.put_u8(MAIN_FIELD);
        out.put_u8(desc.tag.code());
        out.put_u16(desc.offset);
        out.put_u16(desc.len);
        out.put_u8(sort.order as u8);
        out.put_u8(0);
        return Ok(out);
    }

    if !desc.sortable() {
        return Err(SchemaError::NotSortable(name.to_string()));
    }
    let locale = match (&sort.locale, desc.tag) {
        (Some(locale), TypeTag::Text) => schema
            .locale_slot(locale)
            .ok_or_else(|| SchemaError::UnknownLocale(locale.clone()))?,
        (Some(_), _) => return Err(invalid(name, "only text sorts take a locale")),
        (None, _) => 0,
    };
    if layout.sort_slot(desc.number, locale).is_none() {
        return Err(SchemaError::NotSortable(name.to_string()));
    }
    out.put_u8(desc.number);
    out.put_u8(desc.tag.code());
    out.put_u16(0);
    out.put_u16(0);
    out.put_u8(sort.order as u8);
    out.put_u8(locale);
    Ok(out)
}

fn compile_search(layout: &TypeLayout, search: &SearchDef, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    match search {
        SearchDef::Text { query, fields } => {
            let mut picked = Vec::new();
            if fields.is_empty() {
                for desc in layout.fields.by_number_order() {
                    if desc.separate && matches!(desc.tag, TypeTag::String | TypeTag::Text | TypeTag::Alias) {
                        picked.push((desc.number, 1u8));
                    }
                }
            } else {
                for (name, weight) in fields {
                    let desc = layout.field(name)?;
                    if !desc.separate || !matches!(desc.tag, TypeTag::String | TypeTag::Text | TypeTag::Alias) {
                        return Err(invalid(name, "text search reads separate string fields"));
                    }
                    picked.push((desc.number, *weight));
                }
            }
            if picked.is_empty() {
                return Err(invalid("", "no fields to search"));
            }
            let count = u8::try_from(picked.len()).map_err(|_| invalid("", "too many search fields"))?;
            out.put_u8(SEARCH_TEXT);
            out.put_u8(count);
            for (field, weight) in picked {
                out.put_u8(field);
                out.put_u8(weight);
            }
            out.put_u32(query.len() as u32);
            out.put_bytes(query.as_bytes());
        }
        SearchDef::Vector {
            field,
            vector,
            func,
            threshold,
        } => {
            let desc = layout.field(field)?;
            let spec = match (desc.tag, desc.vector) {
                (TypeTag::Vector | TypeTag::Colvec, Some(spec)) => spec,
                _ => return Err(invalid(field, "vector search needs a vector field")),
            };
            if vector.len() != spec.size as usize {
                return Err(invalid(
                    field,
                    format!("expected {} dimensions, got {}", spec.size, vector.len()),
                ));
            }
            out.put_u8(SEARCH_VECTOR);
            out.put_u8(desc.number);
            out.put_u8(*func as u8);
            out.put_f64(*threshold);
            out.put_u32(vector.len() as u32);
            for v in vector {
                out.put_bytes(&v.to_le_bytes());
            }
        }
    }
    Ok(())
}

fn section_u16(name: &str, bytes: &[u8]) -> Result<u16, SchemaError> {
    u16::try_from(bytes.len()).map_err(|_| invalid("", format!("{name} section exceeds 65535 bytes")))
}

fn section_u32(name: &str, bytes: &[u8]) -> Result<u32, SchemaError> {
    u32::try_from(bytes.len()).map_err(|_| invalid("", format!("{name} section exceeds 4 GiB")))
}

fn compile_sections(def: &QueryDef, schema: &SchemaLayout) -> Result<CompiledQuery, SchemaError> {
    let layout = schema.type_layout(&def.type_name)?;
    let kind = query_kind(def);
    let locale = match &def.locale {
        Some(l) => schema
            .locale_slot(l)
            .ok_or_else(|| SchemaError::UnknownLocale(l.clone()))?,
        None => 0,
    };

    let mut reader = ReaderSchema::new(layout.name.clone(), layout.id, kind);
    let mut target = Vec::new();
    let mut filter = Vec::new();
    let mut sort = Vec::new();
    let mut search = Vec::new();
    let mut include = Vec::new();
    let mut aggregate = Vec::new();

    if kind != QueryKind::AggregateCount {
        compile_target(layout, &def.target, &mut target)?;
        let scope = FilterScope {
            schema,
            layout,
            edges: None,
            locale,
        };
        compile_filter(scope, &def.filter, &mut filter)?;
        if let Some(s) = &def.sort {
            sort = compile_sort(schema, layout, None, s)?;
        }
        if let Some(s) = &def.search {
            compile_search(layout, s, &mut search)?;
        }
    }

    let locales: Arc<[String]> = Arc::from(schema.locales());
    match &def.aggregate {
        Some(agg) if kind == QueryKind::Aggregate => {
            reader.aggregate = Some(compile_aggregate(layout, agg, locales, &mut aggregate)?);
        }
        Some(_) => {}
        None => {
            let cx = IncludeCx {
                schema,
                locales,
                locale,
            };
            compile_include(&cx, layout, None, def, &mut Vec::new(), &mut reader, &mut include)?;
        }
    }

    let mut header = QueryHeader::new(kind, layout.id);
    header.set_offset(def.offset);
    header.set_limit(match kind {
        QueryKind::Id | QueryKind::Alias => 1,
        _ => def.limit.unwrap_or(DEFAULT_LIMIT),
    });
    header.set_target_len(section_u32("target", &target)?);
    header.set_filter_len(section_u32("filter", &filter)?);
    header.set_sort_len(section_u16("sort", &sort)?);
    header.set_search_len(section_u16("search", &search)?);
    header.set_include_len(section_u32("include", &include)?);
    header.set_aggregate_len(section_u32("aggregate", &aggregate)?);

    let mut bytes = Vec::with_capacity(QUERY_HEADER_SIZE + header.body_len());
    bytes.extend_from_slice(header.as_bytes());
    for section in [&target, &filter, &sort, &search, &include, &aggregate] {
        bytes.extend_from_slice(section);
    }

    Ok(CompiledQuery {
        bytes,
        reader: Arc::new(reader),
        schema_hash: schema.hash(),
    })
}

/// Compiles `def` against `schema`.
pub fn compile(def: &QueryDef, schema: &SchemaLayout) -> Result<CompiledQuery> {
    let compiled = compile_sections(def, schema)
        .wrap_err_with(|| format!("failed to compile query on '{}'", def.type_name))?;
    debug!(
        type_name = %def.type_name,
        kind = ?compiled.reader.kind,
        len = compiled.bytes.len(),
        "compiled query"
    );
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::ByteReader;
    use crate::query::{AggFn, Operator, Order, VectorFn};
    use crate::schema::{PropDef, SchemaDef, TypeDef};
    use crate::types::VectorBase;

    fn schema() -> SchemaLayout {
        let def = SchemaDef::new().locale("en").locale("nl").with_type(
            TypeDef::new("item")
                .prop(PropDef::number("price"))
                .prop(PropDef::string("name"))
                .prop(PropDef::text("body"))
                .prop(PropDef::alias("slug"))
                .prop(PropDef::json("meta"))
                .prop(PropDef::vector("emb", 3, VectorBase::Float32)),
        );
        SchemaLayout::compile(&def, None).unwrap()
    }

    fn sections(q: &CompiledQuery) -> (QueryHeader, Vec<u8>) {
        let header = *q.header().unwrap();
        (header, q.bytes[QUERY_HEADER_SIZE..].to_vec())
    }

    #[test]
    fn default_query_uses_default_limit() {
        let schema = schema();
        let q = compile(&QueryDef::new("item"), &schema).unwrap();
        let (h, body) = sections(&q);
        assert_eq!(h.query_kind(), QueryKind::Default);
        assert_eq!(h.limit(), DEFAULT_LIMIT);
        assert_eq!(h.body_len(), body.len());
        assert!(h.include_len() > 0);
        assert_eq!(q.schema_hash, schema.hash());
    }

    #[test]
    fn compilation_is_deterministic() {
        let schema = schema();
        let def = QueryDef::new("item")
            .filter("price", Operator::Gt, 10)
            .sort("name", Order::Desc)
            .include(["name", "price"]);
        let a = compile(&def, &schema).unwrap();
        let b = compile(&def, &schema).unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_ne!(a.reader.read_id, b.reader.read_id);
    }

    #[test]
    fn targets_write_their_sections() {
        let schema = schema();
        let q = compile(&QueryDef::new("item").ids([3, 5]), &schema).unwrap();
        let (h, body) = sections(&q);
        assert_eq!(h.query_kind(), QueryKind::Ids);
        assert_eq!(h.target_len(), 12);
        assert_eq!(&body[..12], &[2, 0, 0, 0, 3, 0, 0, 0, 5, 0, 0, 0]);

        let q = compile(&QueryDef::new("item").id(7), &schema).unwrap();
        let (h, _) = sections(&q);
        assert_eq!(h.query_kind(), QueryKind::Id);
        assert_eq!(h.limit(), 1);

        let q = compile(&QueryDef::new("item").alias("slug", "abc"), &schema).unwrap();
        let (h, body) = sections(&q);
        assert_eq!(h.query_kind(), QueryKind::Alias);
        let slug = schema.get("item").unwrap().field("slug").unwrap().number;
        assert_eq!(&body[..8], &[slug, 3, 0, 0, 0, b'a', b'b', b'c']);

        assert!(compile(&QueryDef::new("item").alias("name", "x"), &schema).is_err());
        assert!(compile(&QueryDef::new("item").id(0), &schema).is_err());
    }

    #[test]
    fn sort_entries() {
        let schema = schema();
        let item = schema.get("item").unwrap();
        let sort = |field: &str, locale: Option<&str>| {
            compile_sort(
                &schema,
                item,
                None,
                &SortDef {
                    field: field.into(),
                    order: Order::Desc,
                    locale: locale.map(String::from),
                },
            )
        };

        let price = item.field("price").unwrap();
        let mut expected = vec![MAIN_FIELD, TypeTag::Number.code()];
        expected.extend_from_slice(&price.offset.to_le_bytes());
        expected.extend_from_slice(&8u16.to_le_bytes());
        expected.extend_from_slice(&[1, 0]);
        assert_eq!(sort("price", None).unwrap(), expected);

        assert_eq!(sort("id", None).unwrap()[0], ID_FIELD);
        let body = sort("body", Some("nl")).unwrap();
        assert_eq!(body[7], schema.locale_slot("nl").unwrap());

        assert_eq!(sort("meta", None), Err(SchemaError::NotSortable("meta".into())));
        assert!(matches!(sort("nope", None), Err(SchemaError::UnknownField { .. })));
        assert!(matches!(sort("body", Some("xx")), Err(SchemaError::UnknownLocale(_))));
    }

    #[test]
    fn bare_count_has_empty_sections() {
        let schema = schema();
        let q = compile(&QueryDef::new("item").count(), &schema).unwrap();
        let (h, body) = sections(&q);
        assert_eq!(h.query_kind(), QueryKind::AggregateCount);
        assert_eq!(h.body_len(), 0);
        assert!(body.is_empty());

        let filtered = QueryDef::new("item").count().filter("price", Operator::Lt, 5);
        let q = compile(&filtered, &schema).unwrap();
        let (h, _) = sections(&q);
        assert_eq!(h.query_kind(), QueryKind::Aggregate);
        assert_eq!(h.include_len(), 0);
        assert!(h.aggregate_len() > 0);
        let agg = q.reader.aggregate.as_ref().unwrap();
        assert_eq!(agg.fns[0].func, AggFn::Count);
    }

    #[test]
    fn search_sections() {
        let schema = schema();
        let item = schema.get("item").unwrap();
        let q = compile(&QueryDef::new("item").search_text("red shoe", [("name", 2u8)]), &schema).unwrap();
        let (h, body) = sections(&q);
        let start = (h.target_len() + h.filter_len() + h.sort_len() as u32) as usize;
        let mut r = ByteReader::new(&body[start..start + h.search_len() as usize]);
        assert_eq!(r.u8().unwrap(), SEARCH_TEXT);
        assert_eq!(r.u8().unwrap(), 1);
        assert_eq!(r.u8().unwrap(), item.field("name").unwrap().number);
        assert_eq!(r.u8().unwrap(), 2);
        assert_eq!(r.len_prefixed().unwrap(), b"red shoe");

        let q = compile(
            &QueryDef::new("item").search_vector("emb", vec![1.0, 0.0, 0.0], VectorFn::Cosine, 0.5),
            &schema,
        )
        .unwrap();
        let (h, _) = sections(&q);
        assert_eq!(h.search_len() as usize, 1 + 1 + 1 + 8 + 4 + 12);

        let wrong = QueryDef::new("item").search_vector("emb", vec![1.0], VectorFn::Cosine, 0.5);
        assert!(compile(&wrong, &schema).is_err());
        assert!(compile(&QueryDef::new("item").search_text("x", [("price", 1u8)]), &schema).is_err());
    }

    #[test]
    fn unknown_type_and_locale_fail() {
        let schema = schema();
        assert!(compile(&QueryDef::new("ghost"), &schema).is_err());
        assert!(compile(&QueryDef::new("item").locale("fr"), &schema).is_err());
    }
}
