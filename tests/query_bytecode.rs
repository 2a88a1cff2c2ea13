//! # Query Byte-Code Tests
//!
//! Compiled queries are the cache key of subscriptions, so equal definitions
//! must compile to equal bytes. These tests compile through the public
//! `Client` API and inspect the emitted header.

#![cfg(feature = "loopback")]

use quarrydb::query::{QueryHeader, QueryKind, QUERY_HEADER_SIZE};
use quarrydb::{Client, MemoryEngine, Operator, Order, PropDef, QueryDef, SchemaDef, TypeDef};

fn people() -> SchemaDef {
    SchemaDef::new().locale("en").with_type(
        TypeDef::new("person")
            .prop(PropDef::string("name"))
            .prop(PropDef::number("age"))
            .prop(PropDef::text("bio"))
            .prop(PropDef::references("friends", "person").inverse("friends")),
    )
}

fn client() -> Client {
    let client = Client::new(MemoryEngine::new()).unwrap();
    client.set_schema(&people()).unwrap();
    client
}

fn age_outliers() -> QueryDef {
    QueryDef::new("person")
        .filter("age", Operator::Gt, 8)
        .or(|f| f.filter("age", Operator::Lt, 1))
}

#[test]
fn or_filter_compiles_identically_twice() {
    let client = client();
    let a = client.compile(&age_outliers()).unwrap();
    let b = client.compile(&age_outliers()).unwrap();
    assert_eq!(a.bytes, b.bytes);
    assert_eq!(a.schema_hash, b.schema_hash);

    let header = QueryHeader::from_bytes(&a.bytes).unwrap();
    assert_eq!(header.query_kind(), QueryKind::Default);
    assert!(header.filter_len() > 0);
    assert_eq!(a.bytes.len(), QUERY_HEADER_SIZE + header.body_len());
}

#[test]
fn equal_schemas_on_separate_clients_agree() {
    let a = client().compile(&age_outliers()).unwrap();
    let b = client().compile(&age_outliers()).unwrap();
    assert_eq!(a.bytes, b.bytes);
}

#[test]
fn different_definitions_differ() {
    let client = client();
    let base = client.compile(&age_outliers()).unwrap();
    let flipped = client
        .compile(
            &QueryDef::new("person")
                .filter("age", Operator::Lt, 1)
                .or(|f| f.filter("age", Operator::Gt, 8)),
        )
        .unwrap();
    let sorted = client.compile(&age_outliers().sort("age", Order::Desc)).unwrap();
    assert_ne!(base.bytes, flipped.bytes);
    assert_ne!(base.bytes, sorted.bytes);

    let header = QueryHeader::from_bytes(&sorted.bytes).unwrap();
    assert_eq!(header.sort_len(), 8);
}

#[test]
fn range_lands_in_the_header() {
    let client = client();
    let q = client.query("person").range(20, 10).compile().unwrap();
    let header = QueryHeader::from_bytes(&q.bytes).unwrap();
    assert_eq!(header.offset(), 20);
    assert_eq!(header.limit(), 10);
    assert_eq!(header.type_id(), client.schema().unwrap().get("person").unwrap().id);
}

#[test]
fn invalid_queries_fail_to_compile() {
    let client = client();
    assert!(client.compile(&QueryDef::new("ghost")).is_err());
    assert!(client.query("person").filter("height", Operator::Gt, 1).compile().is_err());
    assert!(client.query("person").sort("bio", Order::Asc).locale("fr").compile().is_err());
    assert!(client.query("person").include(["friends.nope"]).compile().is_err());
    assert!(client.query("person").sum(["name"]).compile().is_err());
}

#[test]
fn compiled_queries_run() {
    let client = client();
    for age in [0, 5, 9] {
        client
            .create("person", quarrydb::Value::object([("age", age)]))
            .unwrap();
    }
    let result = client.get(&age_outliers()).unwrap();
    assert_eq!(result.len(), 2);
}
