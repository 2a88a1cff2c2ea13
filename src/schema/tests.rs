use crate::error::SchemaError;
use crate::types::{TypeTag, VectorBase};

use super::*;

fn profile(props: Vec<PropDef>) -> SchemaDef {
    let ty = props.into_iter().fold(TypeDef::new("profile"), TypeDef::prop);
    SchemaDef::new().locale("en").locale("de").with_type(ty)
}

fn base_props() -> Vec<PropDef> {
    vec![
        PropDef::number("age"),
        PropDef::boolean("active"),
        PropDef::string("name").max_bytes(10),
        PropDef::string("bio"),
        PropDef::object(
            "address",
            [PropDef::string("city"), PropDef::new("zip", TypeTag::Uint32)],
        ),
    ]
}

fn schema_error(err: &eyre::Report) -> &SchemaError {
    err.downcast_ref::<SchemaError>().unwrap()
}

#[test]
fn fields_are_numbered_and_placed_in_order() {
    let layout = SchemaLayout::compile(&profile(base_props()), None).unwrap();
    let ty = layout.get("profile").unwrap();
    assert_eq!(ty.id, 1);

    let placed: Vec<(&str, u8, bool, u16, u16)> = ty
        .fields
        .iter()
        .map(|f| (f.name.as_str(), f.number, f.separate, f.offset, f.len))
        .collect();
    assert_eq!(
        placed,
        [
            ("age", 1, false, 0, 8),
            ("active", 2, false, 8, 1),
            ("name", 3, false, 9, 11),
            ("bio", 4, true, 0, 0),
            ("address.city", 5, true, 0, 0),
            ("address.zip", 6, false, 20, 4),
        ]
    );
    assert_eq!(ty.main_len(), 24);
    assert!(ty.fields.node("address").is_some());
}

#[test]
fn long_strings_and_vectors_go_separate() {
    let layout = SchemaLayout::compile(
        &profile(vec![
            PropDef::string("title").max_bytes(200),
            PropDef::vector("small", 4, VectorBase::Float32),
            PropDef::vector("large", 64, VectorBase::Float32),
            PropDef::colvec("column", 2, VectorBase::Float32),
        ]),
        None,
    )
    .unwrap();
    let ty = layout.get("profile").unwrap();
    let separate = |name: &str| ty.field(name).unwrap().separate;
    assert!(separate("title"));
    assert!(!separate("small"));
    assert!(separate("large"));
    assert!(separate("column"));
    assert_eq!(ty.field("small").unwrap().len, 16);
}

#[test]
fn migration_keeps_numbers_and_retires_removed_fields() {
    let v1 = SchemaLayout::compile(&profile(base_props()), None).unwrap();

    let mut props = base_props();
    props.remove(1);
    props.push(PropDef::number("score"));
    let v2 = SchemaLayout::compile(&profile(props.clone()), Some(&v1)).unwrap();
    let ty = v2.get("profile").unwrap();
    assert_eq!(ty.id, 1);
    assert_eq!(ty.field("age").unwrap().number, 1);
    assert_eq!(ty.field("name").unwrap().offset, 9);
    assert_eq!(ty.field("address.zip").unwrap().number, 6);
    let score = ty.field("score").unwrap();
    assert_eq!((score.number, score.offset), (7, 24));
    assert_eq!(ty.main_len(), 32);
    assert_eq!(ty.fields.retired(), &[2]);

    props.push(PropDef::boolean("active"));
    let v3 = SchemaLayout::compile(&profile(props), Some(&v2)).unwrap();
    let ty = v3.get("profile").unwrap();
    assert_eq!(ty.field("active").unwrap().number, 8);
    assert_eq!(ty.fields.retired(), &[2]);
    assert_ne!(v1.hash(), v3.hash());
}

#[test]
fn changing_a_field_kind_allocates_a_fresh_number() {
    let v1 = SchemaLayout::compile(&profile(base_props()), None).unwrap();
    let mut props = base_props();
    props[0] = PropDef::string("age");
    let v2 = SchemaLayout::compile(&profile(props), Some(&v1)).unwrap();
    let ty = v2.get("profile").unwrap();
    assert_eq!(ty.field("age").unwrap().number, 7);
    assert_eq!(ty.fields.retired(), &[1]);
}

#[test]
fn new_types_get_fresh_ids() {
    let v1 = SchemaLayout::compile(&profile(base_props()), None).unwrap();
    let def = profile(base_props()).with_type(TypeDef::new("note").prop(PropDef::text("body")));
    let v2 = SchemaLayout::compile(&def, Some(&v1)).unwrap();
    assert_eq!(v2.get("profile").unwrap().id, 1);
    assert_eq!(v2.get("note").unwrap().id, 2);
    assert_eq!(v2.by_id(2).unwrap().name, "note");
}

#[test]
fn recompiling_is_deterministic() {
    let a = SchemaLayout::compile(&profile(base_props()), None).unwrap();
    let b = SchemaLayout::compile(&profile(base_props()), None).unwrap();
    assert_eq!(a.descriptor(), b.descriptor());
    assert_eq!(a.hash(), b.hash());
}

#[test]
fn references_resolve_targets_and_inverses() {
    let def = SchemaDef::new()
        .with_type(
            TypeDef::new("user")
                .prop(PropDef::string("name"))
                .prop(
                    PropDef::references("friends", "user")
                        .inverse("friends")
                        .edge(PropDef::number("$weight")),
                ),
        )
        .with_type(
            TypeDef::new("post").prop(PropDef::reference("author", "user").inverse("posts")),
        );
    let err = SchemaLayout::compile(&def, None).unwrap_err();
    assert!(matches!(schema_error(&err), SchemaError::UnknownField { .. }));

    let mut fixed = def.clone();
    fixed.types[0] = fixed.types[0]
        .clone()
        .prop(PropDef::references("posts", "post").inverse("author"));
    let layout = SchemaLayout::compile(&fixed, None).unwrap();
    let user = layout.get("user").unwrap();
    let post = layout.get("post").unwrap();

    let friends = user.field("friends").unwrap().reference.as_ref().unwrap();
    assert_eq!(friends.target_id, user.id);
    assert_eq!(friends.inverse_field, user.field("friends").unwrap().number);
    assert_eq!(friends.edges.as_ref().unwrap().get("$weight").unwrap().tag, TypeTag::Number);

    let author = post.field("author").unwrap().reference.as_ref().unwrap();
    assert_eq!(author.target_id, user.id);
    assert_eq!(author.inverse_field, user.field("posts").unwrap().number);
}

#[test]
fn inverse_must_point_back() {
    let def = SchemaDef::new()
        .with_type(TypeDef::new("user").prop(PropDef::string("name")))
        .with_type(TypeDef::new("post").prop(PropDef::reference("author", "user").inverse("name")));
    let err = SchemaLayout::compile(&def, None).unwrap_err();
    assert!(matches!(schema_error(&err), SchemaError::InvalidDefinition { .. }));

    let def = SchemaDef::new()
        .with_type(TypeDef::new("post").prop(PropDef::reference("author", "ghost")));
    let err = SchemaLayout::compile(&def, None).unwrap_err();
    assert_eq!(schema_error(&err), &SchemaError::UnknownType("ghost".into()));
}

#[test]
fn invalid_definitions_are_rejected() {
    let reject = |props: Vec<PropDef>| SchemaLayout::compile(&profile(props), None).is_err();
    assert!(reject(vec![PropDef::string("id")]));
    assert!(reject(vec![PropDef::string("a"), PropDef::number("a")]));
    assert!(reject(vec![PropDef::string("a.b")]));
    assert!(reject(vec![PropDef::string("$edge")]));
    assert!(reject(vec![PropDef::enumeration("e", Vec::<String>::new())]));
    assert!(reject(vec![PropDef::micro_buffer("m", 0)]));
    assert!(reject(vec![PropDef::new("v", TypeTag::Vector)]));

    let no_locales = SchemaDef::new().with_type(TypeDef::new("t").prop(PropDef::text("body")));
    assert!(SchemaLayout::compile(&no_locales, None).is_err());

    let twice = SchemaDef::new().with_type(TypeDef::new("t")).with_type(TypeDef::new("t"));
    let err = SchemaLayout::compile(&twice, None).unwrap_err();
    assert_eq!(schema_error(&err), &SchemaError::DuplicateType("t".into()));

    let locales = SchemaDef::new().locale("en").locale("en");
    assert!(SchemaLayout::compile(&locales, None).is_err());
}

#[test]
fn locales_map_to_slots() {
    let layout = SchemaLayout::compile(&profile(vec![PropDef::text("bio")]), None).unwrap();
    assert_eq!(layout.locale_slot("en"), Some(1));
    assert_eq!(layout.locale_slot("de"), Some(2));
    assert_eq!(layout.locale_slot("fr"), None);
    assert_eq!(layout.locale_count(), 3);

    let ty = layout.get("profile").unwrap();
    assert_eq!(ty.sort_slots.len(), 3);
    assert_eq!(ty.sort_slot(1, 2), Some(2));
}

#[test]
fn descriptor_parses_back() {
    let def = profile(base_props()).with_type(
        TypeDef::new("link").prop(
            PropDef::references("targets", "profile")
                .edge(PropDef::number("$weight"))
                .edge(PropDef::string("$note")),
        ),
    );
    let layout = SchemaLayout::compile(&def, None).unwrap();
    let packed = PackedSchema::parse(layout.descriptor()).unwrap();
    assert_eq!(packed.locale_count, 3);
    assert_eq!(packed.types.len(), 2);

    let profile = packed.get(1).unwrap();
    assert_eq!(profile.main_len, 24);
    let bio = profile.field(4).unwrap();
    assert_eq!(bio.tag, TypeTag::String);
    assert!(bio.separate());
    assert!(!profile.field(1).unwrap().separate());
    assert_eq!(profile.sort_slots, vec![(4, 0), (5, 0)]);

    let link = packed.get(2).unwrap();
    let targets = link.field(1).unwrap().reference.as_ref().unwrap();
    assert_eq!(targets.target, 1);
    assert_eq!(targets.inverse, 0);
    assert_eq!(targets.edges.len(), 2);
    assert_eq!(targets.edge_main_len, 8);

    assert!(PackedSchema::parse(&layout.descriptor()[..6]).is_err());
    assert!(PackedSchema::parse(b"nope").is_err());
}
