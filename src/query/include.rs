//! # Include Compilation
//!
//! Resolves the include list of a query into the include section and, in the
//! same pass, the [`ReaderSchema`] the decoder will use:
//!
//! ```text
//! main_count:u16 (start:u16 len:u16)*
//! sep_count:u16 (field:u8 tag:u8 locale:u8)*
//! blocks:
//!   255 field:u8 len:u32 type_id:u16 nested-include
//!   254 field:u8 len:u32 type_id:u16 offset:u32 limit:u32
//!       filter_len:u16 sort_len:u16 filter sort nested-include
//!   253 len:u32 edge-include
//! ```
//!
//! Include paths:
//!
//! | Path | Expands to |
//! |------|------------|
//! | `*` | every non-reference field of the type |
//! | `**` | `*` plus every reference, recursively, skipping types already on the path |
//! | `name` | that field; an object name means all of its leaves; a reference means `ref.*` |
//! | `ref.path` | `path` inside the referenced type |
//! | `$prop` | an edge property of the reference being read |
//!
//! Globs expand in field-number order, so the section does not depend on the
//! order in which a caller listed paths.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{EDGE_BLOCK_MARKER, MAX_INCLUDE_DEPTH, MULTI_REF_MARKER, SINGLE_REF_MARKER};
use crate::decode::{ReadField, ReadRef, ReaderSchema};
use crate::encoding::{patch_u32, PutLe};
use crate::error::SchemaError;
use crate::schema::{FieldDescriptor, FieldTable, ObjectNode, SchemaLayout, TypeLayout};
use crate::types::TypeTag;

use super::compiler::compile_sort;
use super::def::{IncludeItem, IncludeOpts, QueryDef};
use super::filter::{compile_filter, FilterScope};
use super::header::QueryKind;

/// Settings shared by every level of one include tree.
pub(crate) struct IncludeCx<'a> {
    pub schema: &'a SchemaLayout,
    pub locales: Arc<[String]>,
    /// Locale slot read from text fields without their own option.
    pub locale: u8,
}

type Picked<'l> = BTreeMap<u8, (&'l FieldDescriptor, Option<IncludeOpts>)>;

struct RefPlan<'l> {
    desc: &'l FieldDescriptor,
    query: QueryDef,
}

#[derive(Default)]
struct Plan<'l> {
    fields: Picked<'l>,
    refs: BTreeMap<u8, RefPlan<'l>>,
    edges: Picked<'l>,
}

impl<'l> Plan<'l> {
    fn pick(map: &mut Picked<'l>, desc: &'l FieldDescriptor, opts: Option<IncludeOpts>) {
        let entry = map.entry(desc.number).or_insert((desc, None));
        if opts.is_some() {
            entry.1 = opts;
        }
    }

    fn reference(&mut self, desc: &'l FieldDescriptor) -> &mut RefPlan<'l> {
        self.refs.entry(desc.number).or_insert_with(|| RefPlan {
            desc,
            query: QueryDef::nested(),
        })
    }

    fn leaf(&mut self, desc: &'l FieldDescriptor, opts: Option<IncludeOpts>) {
        if desc.tag.is_reference() {
            self.reference(desc).query.include.push(IncludeItem::Path("*".into()));
        } else {
            Self::pick(&mut self.fields, desc, opts);
        }
    }
}

fn unknown(layout: &TypeLayout, name: &str) -> SchemaError {
    SchemaError::UnknownField {
        type_name: layout.name.clone(),
        field: name.to_string(),
    }
}

fn too_deep(name: &str) -> SchemaError {
    SchemaError::InvalidFilter {
        field: name.to_string(),
        reason: format!("include nesting exceeds {MAX_INCLUDE_DEPTH} levels"),
    }
}

/// Splits `a.b.c` at the first prefix naming a reference of `layout`.
fn split_ref<'l, 'n>(
    layout: &'l TypeLayout,
    name: &'n str,
) -> Result<Option<(&'l FieldDescriptor, &'n str)>, SchemaError> {
    for (dot, _) in name.match_indices('.') {
        if let Some(desc) = layout.fields.get(&name[..dot]) {
            if !desc.tag.is_reference() {
                return Err(SchemaError::NotAReference {
                    type_name: layout.name.clone(),
                    field: desc.name.clone(),
                });
            }
            return Ok(Some((desc, &name[dot + 1..])));
        }
    }
    Ok(None)
}

fn plan<'l>(
    layout: &'l TypeLayout,
    edges: Option<&'l FieldTable>,
    items: &[IncludeItem],
    expand_refs: &dyn Fn(&FieldDescriptor) -> bool,
) -> Result<Plan<'l>, SchemaError> {
    let mut plan = Plan::default();
    let default_items = [IncludeItem::Path("*".into())];
    let items = if items.is_empty() { &default_items[..] } else { items };

    for item in items {
        let (name, opts, nested) = match item {
            IncludeItem::Path(name) => (name.as_str(), None, None),
            IncludeItem::WithOpts(name, opts) => (name.as_str(), Some(opts.clone()), None),
            IncludeItem::Nested(name, query) => (name.as_str(), None, Some(query.as_ref())),
        };

        if name == "*" || name == "**" {
            for desc in layout.fields.by_number_order() {
                if !desc.tag.is_reference() {
                    Plan::pick(&mut plan.fields, desc, None);
                } else if name == "**" && expand_refs(desc) {
                    plan.reference(desc)
                        .query
                        .include
                        .push(IncludeItem::Path("**".into()));
                }
            }
            continue;
        }

        if name.starts_with('$') {
            let desc = edges.and_then(|e| e.get(name)).ok_or_else(|| unknown(layout, name))?;
            Plan::pick(&mut plan.edges, desc, opts);
            continue;
        }

        if let Some(desc) = layout.fields.get(name) {
            match nested {
                Some(query) if desc.tag.is_reference() => merge_nested(&mut plan.reference(desc).query, query),
                Some(_) => {
                    return Err(SchemaError::NotAReference {
                        type_name: layout.name.clone(),
                        field: name.to_string(),
                    })
                }
                None => plan.leaf(desc, opts),
            }
            continue;
        }

        if let Some(node @ ObjectNode::Object(_)) = layout.fields.node(name) {
            let mut leaves = Vec::new();
            node.leaves(&mut leaves);
            for index in leaves {
                plan.leaf(layout.fields.at(index), opts.clone());
            }
            continue;
        }

        let (desc, rest) = split_ref(layout, name)?.ok_or_else(|| unknown(layout, name))?;
        let rest = rest.to_string();
        let forwarded = match (nested, opts) {
            (Some(query), _) => IncludeItem::Nested(rest, Box::new(query.clone())),
            (None, Some(opts)) => IncludeItem::WithOpts(rest, opts),
            (None, None) => IncludeItem::Path(rest),
        };
        plan.reference(desc).query.include.push(forwarded);
    }
    Ok(plan)
}

/// Folds an explicit nested query into whatever paths already target the reference.
fn merge_nested(into: &mut QueryDef, query: &QueryDef) {
    into.filter = query.filter.clone();
    into.sort = query.sort.clone();
    into.offset = query.offset;
    into.limit = query.limit;
    if query.locale.is_some() {
        into.locale = query.locale.clone();
    }
    if query.include.is_empty() {
        into.include.push(IncludeItem::Path("*".into()));
    } else {
        into.include.extend(query.include.iter().cloned());
    }
}

fn read_field(cx: &IncludeCx<'_>, desc: &FieldDescriptor, opts: Option<&IncludeOpts>, locale: u8) -> Result<ReadField, SchemaError> {
    let mut rf = ReadField::from_descriptor(desc, cx.locales.clone());
    if desc.tag == TypeTag::Text {
        rf.locale = match opts.and_then(|o| o.locale.as_deref()) {
            Some(name) => cx
                .schema
                .locale_slot(name)
                .ok_or_else(|| SchemaError::UnknownLocale(name.to_string()))?,
            None => locale,
        };
    }
    if let Some(o) = opts.filter(|o| o.start.is_some() || o.end.is_some()) {
        rf.slice = Some((o.start.unwrap_or(0), o.end));
    }
    Ok(rf)
}

/// Writes the main and separate lists for `picked` and records their reads.
fn emit_fields(
    cx: &IncludeCx<'_>,
    picked: &Picked<'_>,
    locale: u8,
    reader: &mut ReaderSchema,
    out: &mut Vec<u8>,
) -> Result<(), SchemaError> {
    let mut main: Vec<_> = picked.values().filter(|(d, _)| d.is_main()).collect();
    main.sort_by_key(|(d, _)| d.offset);
    out.put_u16(main.len() as u16);
    for (desc, opts) in main {
        out.put_u16(desc.offset);
        out.put_u16(desc.len);
        reader.main.push(read_field(cx, desc, opts.as_ref(), locale)?);
    }

    let separate: Vec<_> = picked.values().filter(|(d, _)| d.separate).collect();
    out.put_u16(separate.len() as u16);
    for (desc, opts) in separate {
        let rf = read_field(cx, desc, opts.as_ref(), locale)?;
        out.put_u8(desc.number);
        out.put_u8(desc.tag.code());
        out.put_u8(rf.locale);
        reader.separate.push(rf);
    }
    Ok(())
}

fn locale_of(cx: &IncludeCx<'_>, query: &QueryDef) -> Result<u8, SchemaError> {
    match &query.locale {
        Some(name) => cx
            .schema
            .locale_slot(name)
            .ok_or_else(|| SchemaError::UnknownLocale(name.clone())),
        None => Ok(cx.locale),
    }
}

/// Compiles the include section of `query` against `layout`.
///
/// `path` holds the type ids already expanded above this level; `**` does not
/// re-enter them.
pub(crate) fn compile_include(
    cx: &IncludeCx<'_>,
    layout: &TypeLayout,
    edges: Option<&FieldTable>,
    query: &QueryDef,
    path: &mut Vec<u16>,
    reader: &mut ReaderSchema,
    out: &mut Vec<u8>,
) -> Result<(), SchemaError> {
    let depth = path.len();
    let expand = |desc: &FieldDescriptor| {
        depth < MAX_INCLUDE_DEPTH
            && desc
                .reference
                .as_ref()
                .is_some_and(|r| !path.contains(&r.target_id))
    };
    let plan = plan(layout, edges, &query.include, &expand)?;
    let locale = locale_of(cx, query)?;

    emit_fields(cx, &plan.fields, locale, reader, out)?;

    for (number, rp) in &plan.refs {
        if depth >= MAX_INCLUDE_DEPTH {
            return Err(too_deep(&rp.desc.name));
        }
        let info = rp.desc.reference.as_ref().ok_or_else(|| SchemaError::NotAReference {
            type_name: layout.name.clone(),
            field: rp.desc.name.clone(),
        })?;
        let target = cx
            .schema
            .by_id(info.target_id)
            .ok_or(SchemaError::UnknownTypeId(info.target_id))?;
        let multi = rp.desc.tag == TypeTag::References;
        let nested_edges = rp.desc.edges();

        out.put_u8(if multi { MULTI_REF_MARKER } else { SINGLE_REF_MARKER });
        out.put_u8(*number);
        let len_at = out.len();
        out.put_u32(0);
        out.put_u16(target.id);

        let nested_locale = match &rp.query.locale {
            Some(_) => locale_of(cx, &rp.query)?,
            None => locale,
        };
        if multi {
            let scope = FilterScope {
                schema: cx.schema,
                layout: target,
                edges: nested_edges,
                locale: nested_locale,
            };
            let mut filter = Vec::new();
            compile_filter(scope, &rp.query.filter, &mut filter)?;
            let sort = match &rp.query.sort {
                Some(sort) => compile_sort(cx.schema, target, nested_edges, sort)?,
                None => Vec::new(),
            };
            let section_len = |bytes: &[u8]| {
                u16::try_from(bytes.len()).map_err(|_| SchemaError::InvalidFilter {
                    field: rp.desc.name.clone(),
                    reason: "nested section exceeds 65535 bytes".into(),
                })
            };
            out.put_u32(rp.query.offset);
            out.put_u32(rp.query.limit.unwrap_or(u32::MAX));
            out.put_u16(section_len(&filter)?);
            out.put_u16(section_len(&sort)?);
            out.put_bytes(&filter);
            out.put_bytes(&sort);
        } else if !rp.query.filter.is_empty() || rp.query.sort.is_some() {
            return Err(SchemaError::InvalidFilter {
                field: rp.desc.name.clone(),
                reason: "filters and sorting apply to reference lists only".into(),
            });
        }

        let mut nested_reader = ReaderSchema::new(target.name.clone(), target.id, QueryKind::Default);
        let nested_cx = IncludeCx {
            schema: cx.schema,
            locales: cx.locales.clone(),
            locale: nested_locale,
        };
        path.push(layout.id);
        let nested = compile_include(
            &nested_cx,
            target,
            nested_edges,
            &rp.query,
            path,
            &mut nested_reader,
            out,
        );
        path.pop();
        nested?;

        let len = out.len() - len_at - 4;
        patch_u32(out, len_at, len as u32);
        reader.refs.push(ReadRef {
            name: rp.desc.name.clone(),
            path: rp.desc.path.clone(),
            field: *number,
            multi,
            reader: Arc::new(nested_reader),
        });
    }

    if !plan.edges.is_empty() {
        let mut edge_reader = ReaderSchema::new(layout.name.clone(), layout.id, QueryKind::Default);
        out.put_u8(EDGE_BLOCK_MARKER);
        let len_at = out.len();
        out.put_u32(0);
        emit_fields(cx, &plan.edges, locale, &mut edge_reader, out)?;
        let len = out.len() - len_at - 4;
        patch_u32(out, len_at, len as u32);
        reader.edges = Some(Arc::new(edge_reader));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::ByteReader;
    use crate::query::Operator;
    use crate::schema::{PropDef, SchemaDef, TypeDef};

    fn schema() -> SchemaLayout {
        let def = SchemaDef::new()
            .locale("en")
            .locale("de")
            .with_type(
                TypeDef::new("user")
                    .prop(PropDef::string("name").max_bytes(20))
                    .prop(PropDef::text("bio"))
                    .prop(PropDef::object("meta", [PropDef::number("score"), PropDef::string("note")]))
                    .prop(
                        PropDef::references("posts", "post")
                            .inverse("author")
                            .edge(PropDef::new("$rank", TypeTag::Uint8)),
                    ),
            )
            .with_type(
                TypeDef::new("post")
                    .prop(PropDef::string("title"))
                    .prop(PropDef::reference("author", "user").inverse("posts")),
            );
        SchemaLayout::compile(&def, None).unwrap()
    }

    fn compile(schema: &SchemaLayout, query: &QueryDef) -> Result<(Vec<u8>, ReaderSchema), SchemaError> {
        let layout = schema.type_layout(&query.type_name)?;
        let cx = IncludeCx {
            schema,
            locales: Arc::from(schema.locales()),
            locale: 0,
        };
        let mut reader = ReaderSchema::new(layout.name.clone(), layout.id, QueryKind::Default);
        let mut out = Vec::new();
        compile_include(&cx, layout, None, query, &mut Vec::new(), &mut reader, &mut out)?;
        Ok((out, reader))
    }

    #[test]
    fn star_expands_scalars_in_number_order() {
        let schema = schema();
        let (bytes, reader) = compile(&schema, &QueryDef::new("user")).unwrap();
        let mut r = ByteReader::new(&bytes);
        // name and meta.score are main fields.
        assert_eq!(r.u16().unwrap(), 2);
        r.skip(8).unwrap();
        assert_eq!(r.u16().unwrap(), 2);
        r.skip(6).unwrap();
        assert!(r.is_empty());
        let names: Vec<_> = reader.separate.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["bio", "meta.note"]);
        assert!(reader.refs.is_empty());
    }

    #[test]
    fn split_descriptor_outlives_the_path() {
        let schema = schema();
        let user = schema.get("user").unwrap();
        let posts = {
            let path = String::from("posts.title");
            let (desc, rest) = split_ref(user, &path).unwrap().unwrap();
            assert_eq!(rest, "title");
            desc
        };
        assert_eq!(posts.name, "posts");
        assert!(split_ref(user, "name").unwrap().is_none());
        assert!(split_ref(user, "bio.x").is_err());
    }

    #[test]
    fn include_order_does_not_change_bytes() {
        let schema = schema();
        let a = compile(&schema, &QueryDef::new("user").include(["bio", "name", "posts.title"])).unwrap();
        let b = compile(&schema, &QueryDef::new("user").include(["posts.title", "name", "bio"])).unwrap();
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn double_star_stops_at_types_on_the_path() {
        let schema = schema();
        let (_, reader) = compile(&schema, &QueryDef::new("user").include(["**"])).unwrap();
        assert_eq!(reader.refs.len(), 1);
        let post = &reader.refs[0].reader;
        assert_eq!(post.type_name, "post");
        // post.author points back at user, which is already expanded.
        assert!(post.refs.is_empty());
        assert_eq!(post.separate[0].name, "title");
    }

    #[test]
    fn nested_query_writes_range_filter_and_edges() {
        let schema = schema();
        let query = QueryDef::new("user").include_ref("posts", |q| {
            q.include(["title", "$rank"])
                .filter("$rank", Operator::Gt, 1)
                .range(2, 5)
        });
        let (bytes, reader) = compile(&schema, &query).unwrap();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.u16().unwrap(), 0);
        assert_eq!(r.u16().unwrap(), 0);
        assert_eq!(r.u8().unwrap(), MULTI_REF_MARKER);
        r.u8().unwrap();
        let len = r.u32().unwrap() as usize;
        assert_eq!(len, r.remaining());
        assert_eq!(r.u16().unwrap(), schema.get("post").unwrap().id);
        assert_eq!(r.u32().unwrap(), 2);
        assert_eq!(r.u32().unwrap(), 5);
        let filter_len = r.u16().unwrap();
        assert!(filter_len > 0);
        assert_eq!(r.u16().unwrap(), 0);

        let posts = &reader.refs[0];
        assert!(posts.multi);
        let edges = posts.reader.edges.as_ref().unwrap();
        assert_eq!(edges.main[0].name, "$rank");
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn object_names_and_options() {
        let schema = schema();
        let query = QueryDef::new("user")
            .include(["meta"])
            .include_with("bio", IncludeOpts { start: Some(0), end: Some(3), locale: Some("de".into()) });
        let (_, reader) = compile(&schema, &query).unwrap();
        assert_eq!(reader.main[0].name, "meta.score");
        let bio = reader.field_named("bio").unwrap();
        assert_eq!(bio.locale, 2);
        assert_eq!(bio.slice, Some((0, Some(3))));
    }

    #[test]
    fn unknown_paths_fail() {
        let schema = schema();
        assert!(matches!(
            compile(&schema, &QueryDef::new("user").include(["nope"])),
            Err(SchemaError::UnknownField { .. })
        ));
        assert!(matches!(
            compile(&schema, &QueryDef::new("user").include(["$rank"])),
            Err(SchemaError::UnknownField { .. })
        ));
        assert!(matches!(
            compile(&schema, &QueryDef::new("user").include_locale("bio", "xx")),
            Err(SchemaError::UnknownLocale(_))
        ));
    }
}
