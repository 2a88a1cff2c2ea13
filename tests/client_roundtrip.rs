//! # Client Round Trip Tests
//!
//! Writes records of every field type through a `Client` into the loopback
//! `MemoryEngine` and reads them back through compiled queries and the lazy
//! result decoder.
//!
//! - Basic create and include
//! - Validation failures (enum members, undeclared locales)
//! - Vector truncation to the declared size
//! - Empty values for fields a record never wrote

#![cfg(feature = "loopback")]

use quarrydb::{
    Client, DecodeArena, MemoryEngine, PropDef, QueryResult, SchemaDef, TypeDef, TypeTag, TypedVector,
    Value, VectorBase, WriteOutcome,
};
use serde_json::json;

fn connect(def: &SchemaDef) -> Client {
    let client = Client::new(MemoryEngine::new()).unwrap();
    client.set_schema(def).unwrap();
    client
}

fn single(result: &QueryResult) -> Value {
    result.to_value(&mut DecodeArena::new()).unwrap()
}

fn catalog() -> SchemaDef {
    SchemaDef::new().locale("en").locale("de").with_type(
        TypeDef::new("item")
            .prop(PropDef::string("name"))
            .prop(PropDef::string("nick").max_bytes(12))
            .prop(PropDef::text("body"))
            .prop(PropDef::number("price"))
            .prop(PropDef::timestamp("born"))
            .prop(PropDef::boolean("active"))
            .prop(PropDef::enumeration("tier", ["free", "pro"]))
            .prop(PropDef::binary("blob"))
            .prop(PropDef::json("meta"))
            .prop(PropDef::vector("emb", 4, VectorBase::Float32))
            .prop(PropDef::vector("big", 16, VectorBase::Float32))
            .prop(PropDef::cardinality("tags"))
            .prop(PropDef::new("small", TypeTag::Uint8))
            .prop(PropDef::new("delta", TypeTag::Int16))
            .prop(PropDef::alias("code")),
    )
}

mod scenario_tests {
    use super::*;

    #[test]
    fn create_then_include_name() {
        let def = SchemaDef::new().with_type(TypeDef::new("user").prop(PropDef::string("name")));
        let client = connect(&def);
        client.create("user", Value::object([("name", "a")])).unwrap();

        let result = client.query("user").include(["name"]).get().unwrap();
        assert_eq!(
            single(&result),
            Value::List(vec![Value::object([
                ("id", Value::Int(1)),
                ("name", Value::from("a")),
            ])])
        );
    }

    #[test]
    fn invalid_enum_update_writes_nothing() {
        let client = connect(&catalog());
        let id = client.create("item", Value::object([("tier", "free")])).unwrap().id().unwrap();
        client.drain().unwrap();

        let outcome = client.update("item", id, Value::object([("tier", "gold")])).unwrap();
        let WriteOutcome::Rejected(errors) = outcome else {
            panic!("expected a rejection");
        };
        assert_eq!(errors[0].field, "tier");
        assert_eq!(client.buffered(), 0);

        let result = client.query("item").id(id).include(["tier"]).get().unwrap();
        assert_eq!(single(&result).get("tier"), Some(&Value::from("free")));
    }

    #[test]
    fn undeclared_locale_is_rejected() {
        let client = connect(&catalog());
        let outcome = client
            .create("item", Value::object([("body", Value::text([("fr", "bonjour")]))]))
            .unwrap();
        let WriteOutcome::Rejected(errors) = outcome else {
            panic!("expected a rejection");
        };
        assert!(errors[0].reason.contains("invalid locale"));
        assert_eq!(client.buffered(), 0);
    }

    #[test]
    fn long_vectors_are_truncated() {
        let client = connect(&catalog());
        let id = client
            .create(
                "item",
                Value::object([
                    ("emb", Value::list([1.0, 2.0, 3.0, 4.0, 5.0, 6.0])),
                    ("big", Value::Vector(TypedVector::Float64((0..20).map(f64::from).collect()))),
                ]),
            )
            .unwrap()
            .id()
            .unwrap();

        let result = client.query("item").id(id).include(["emb", "big"]).get().unwrap();
        let value = single(&result);
        assert_eq!(
            value.get("emb"),
            Some(&Value::Vector(TypedVector::Float32(vec![1.0, 2.0, 3.0, 4.0])))
        );
        let Some(Value::Vector(big)) = value.get("big") else {
            panic!("expected a vector");
        };
        assert_eq!(big.len(), 16);
        assert_eq!(big.to_f64()[15], 15.0);
    }
}

mod field_type_tests {
    use super::*;

    #[test]
    fn every_field_type_round_trips() {
        let client = connect(&catalog());
        let id = client
            .create(
                "item",
                Value::object([
                    ("name", Value::from("widget")),
                    ("nick", Value::from("wdg")),
                    ("body", Value::text([("en", "hello"), ("de", "hallo")])),
                    ("price", Value::from(2.5)),
                    ("born", Value::Timestamp(1_700_000_000_000)),
                    ("active", Value::from(true)),
                    ("tier", Value::from("pro")),
                    ("blob", Value::Binary(vec![1, 2, 3])),
                    ("meta", Value::from(json!({"a": 1, "b": [true]}))),
                    ("emb", Value::list([0.5, 1.5, 2.5, 3.5])),
                    ("tags", Value::list(["x", "y", "x"])),
                    ("small", Value::from(7)),
                    ("delta", Value::from(-3)),
                    ("code", Value::from("w-1")),
                ]),
            )
            .unwrap()
            .id()
            .unwrap();

        let result = client.query("item").id(id).get().unwrap();
        let value = single(&result);
        let field = |name: &str| value.get(name).cloned().unwrap_or(Value::Null);

        assert_eq!(field("id"), Value::Int(id as i64));
        assert_eq!(field("name"), Value::from("widget"));
        assert_eq!(field("nick"), Value::from("wdg"));
        assert_eq!(field("body"), Value::text([("de", "hallo"), ("en", "hello")]));
        assert_eq!(field("price"), Value::Float(2.5));
        assert_eq!(field("born"), Value::Timestamp(1_700_000_000_000));
        assert_eq!(field("active"), Value::Bool(true));
        assert_eq!(field("tier"), Value::from("pro"));
        assert_eq!(field("blob"), Value::Binary(vec![1, 2, 3]));
        assert_eq!(field("meta"), Value::Json(json!({"a": 1, "b": [true]})));
        assert_eq!(field("emb"), Value::Vector(TypedVector::Float32(vec![0.5, 1.5, 2.5, 3.5])));
        assert_eq!(field("tags"), Value::Int(2));
        assert_eq!(field("small"), Value::Int(7));
        assert_eq!(field("delta"), Value::Int(-3));
        assert_eq!(field("code"), Value::from("w-1"));
    }

    #[test]
    fn unwritten_fields_decode_as_empty_values() {
        let client = connect(&catalog());
        let id = client.create("item", Value::object([("name", "bare")])).unwrap().id().unwrap();

        let result = client.query("item").id(id).get().unwrap();
        let value = single(&result);
        assert_eq!(value.get("price"), Some(&Value::Float(0.0)));
        assert_eq!(value.get("active"), Some(&Value::Bool(false)));
        assert_eq!(value.get("tier"), Some(&Value::Null));
        assert_eq!(value.get("blob"), Some(&Value::Binary(Vec::new())));
        assert_eq!(value.get("tags"), Some(&Value::Int(0)));
        assert_eq!(value.get("nick"), Some(&Value::from("")));
        assert_eq!(value.get("meta"), Some(&Value::Null));
        assert_eq!(
            value.get("emb"),
            Some(&Value::Vector(TypedVector::zeroed(VectorBase::Float32, 4)))
        );
        assert_eq!(
            value.get("big"),
            Some(&Value::Vector(TypedVector::zeroed(VectorBase::Float32, 16)))
        );
    }

    #[test]
    fn single_locale_reads_a_plain_string() {
        let client = connect(&catalog());
        let id = client
            .create("item", Value::object([("body", Value::text([("en", "hello"), ("de", "hallo")]))]))
            .unwrap()
            .id()
            .unwrap();

        let result = client.query("item").id(id).include_locale("body", "de").get().unwrap();
        let record = result.record(0).unwrap();
        let body = record.get("body", &mut DecodeArena::new()).unwrap();
        assert_eq!(body, Value::from("hallo"));
    }

    #[test]
    fn updates_overwrite_only_named_fields() {
        let client = connect(&catalog());
        let id = client
            .create("item", Value::object([("name", Value::from("a")), ("price", Value::from(1.0))]))
            .unwrap()
            .id()
            .unwrap();
        client.update("item", id, Value::object([("price", 9.0)])).unwrap();

        let value = single(&client.query("item").id(id).include(["name", "price"]).get().unwrap());
        assert_eq!(value.get("name"), Some(&Value::from("a")));
        assert_eq!(value.get("price"), Some(&Value::Float(9.0)));
    }

    #[test]
    fn deleted_records_disappear() {
        let client = connect(&catalog());
        let a = client.create("item", Value::object([("name", "a")])).unwrap().id().unwrap();
        let b = client.create("item", Value::object([("name", "b")])).unwrap().id().unwrap();
        client.delete("item", a).unwrap();

        let result = client.query("item").get().unwrap();
        assert_eq!(result.ids(), [b]);
        let missing = client.query("item").id(a).get().unwrap();
        assert_eq!(single(&missing), Value::Null);
    }
}
