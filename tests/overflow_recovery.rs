//! # Overflow Recovery Tests
//!
//! A record that overflows the mutation buffer is rolled back to its
//! checkpoint, the buffer grows, and the record is encoded again. The bytes
//! must match an encode into a buffer that was large enough from the start.

#![cfg(feature = "loopback")]

use quarrydb::modify::{encode_create, encode_update, ModifyCtx, RecordOutcome};
use quarrydb::{
    Client, DecodeArena, MemoryEngine, ModifyMode, PropDef, SchemaDef, SchemaLayout, TypeDef, Value,
    VectorBase,
};

fn def() -> SchemaDef {
    SchemaDef::new().locale("en").locale("fr").with_type(
        TypeDef::new("doc")
            .prop(PropDef::string("title").max_bytes(40))
            .prop(PropDef::string("body"))
            .prop(PropDef::text("summary"))
            .prop(PropDef::number("score"))
            .prop(PropDef::vector("emb", 32, VectorBase::Float32))
            .prop(PropDef::references("links", "doc").edge(PropDef::number("$weight"))),
    )
}

fn ctx(layout: &SchemaLayout, capacity: usize) -> ModifyCtx {
    let mut ctx = ModifyCtx::new(capacity, 1 << 20);
    ctx.set_locales(layout.locales());
    ctx.set_clock(Some(1_000));
    ctx
}

fn payload(i: u32) -> Value {
    Value::object([
        ("title", Value::from(format!("document number {i}"))),
        ("body", Value::from("lorem ipsum dolor sit amet ".repeat(4))),
        ("summary", Value::text([("en", "short"), ("fr", "court")])),
        ("score", Value::from(i as f64 / 3.0)),
        ("emb", Value::list((0..32).map(|x| x as f64 * 0.25))),
        (
            "links",
            Value::list([Value::edge(1, [("$weight", 0.5)]), Value::reference(2)]),
        ),
    ])
}

#[test]
fn grown_buffer_matches_a_large_one() {
    let layout = SchemaLayout::compile(&def(), None).unwrap();
    let doc = layout.get("doc").unwrap();

    let mut large = ctx(&layout, 1 << 16);
    let mut small = ctx(&layout, 8);
    for i in 1..=5 {
        let a = encode_create(&mut large, doc, i, &payload(i), ModifyMode::Safe).unwrap();
        let b = encode_create(&mut small, doc, i, &payload(i), ModifyMode::Safe).unwrap();
        assert!(matches!(a, RecordOutcome::Written(_)));
        assert_eq!(a, b);
    }
    encode_update(&mut large, doc, 3, &payload(9), ModifyMode::Safe).unwrap();
    encode_update(&mut small, doc, 3, &payload(9), ModifyMode::Safe).unwrap();

    assert!(small.capacity() > 8);
    assert_eq!(small.as_bytes(), large.as_bytes());
    assert_eq!(small.records(), large.records());
}

#[test]
fn record_larger_than_the_cap_leaves_the_buffer_untouched() {
    let layout = SchemaLayout::compile(&def(), None).unwrap();
    let doc = layout.get("doc").unwrap();
    let mut ctx = ModifyCtx::new(16, 256);
    ctx.set_locales(layout.locales());

    let first = Value::object([("score", 1.0)]);
    encode_create(&mut ctx, doc, 1, &first, ModifyMode::Safe).unwrap();
    let before = ctx.as_bytes().to_vec();

    let outcome = encode_create(&mut ctx, doc, 2, &payload(2), ModifyMode::Safe).unwrap();
    assert_eq!(outcome, RecordOutcome::Full);
    assert_eq!(ctx.as_bytes(), before.as_slice());
}

#[test]
fn small_client_buffers_store_the_same_records() {
    let small = Client::builder()
        .hooks(MemoryEngine::new())
        .modify_size(32)
        .max_modify_size(2048)
        .build()
        .unwrap();
    let large = Client::new(MemoryEngine::new()).unwrap();
    for client in [&small, &large] {
        client.set_schema(&def()).unwrap();
        for i in 1..=40 {
            let outcome = client.create("doc", payload(i)).unwrap();
            assert_eq!(outcome.id(), Some(i));
        }
    }

    let small_report = small.drain().unwrap();
    let large_report = large.drain().unwrap();
    assert!(small_report.flushes > 1);
    assert_eq!(large_report.flushes, 1);

    let read = |client: &Client| {
        client
            .query("doc")
            .include(["title", "score", "summary"])
            .range(0, 100)
            .get()
            .unwrap()
            .to_value(&mut DecodeArena::new())
            .unwrap()
    };
    assert_eq!(read(&small), read(&large));
}
