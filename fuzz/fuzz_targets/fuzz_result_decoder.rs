//! Fuzz testing for the lazy result decoder.
//!
//! Feeds arbitrary bytes to `QueryResult` as if an engine had returned them
//! for a few compiled queries over a fixed schema. Malformed buffers must be
//! reported as `DecodeError`s, never as panics.

#![no_main]

use std::sync::OnceLock;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use quarrydb::query::CompiledQuery;
use quarrydb::{
    Client, DecodeArena, MemoryEngine, PropDef, QueryDef, QueryResult, SchemaDef, TypeDef, VectorBase,
};

#[derive(Debug, Arbitrary)]
struct DecoderInput {
    query: u8,
    data: Vec<u8>,
}

fn queries() -> &'static [CompiledQuery] {
    static QUERIES: OnceLock<Vec<CompiledQuery>> = OnceLock::new();
    QUERIES.get_or_init(|| {
        let client = Client::new(MemoryEngine::new()).unwrap();
        let def = SchemaDef::new().locale("en").locale("de").with_type(
            TypeDef::new("node")
                .prop(PropDef::string("name").max_bytes(16))
                .prop(PropDef::string("body"))
                .prop(PropDef::text("label"))
                .prop(PropDef::number("weight"))
                .prop(PropDef::binary("blob"))
                .prop(PropDef::json("meta"))
                .prop(PropDef::cardinality("seen"))
                .prop(PropDef::vector("emb", 4, VectorBase::Float32))
                .prop(PropDef::reference("parent", "node"))
                .prop(PropDef::references("children", "node").edge(PropDef::number("$rank"))),
        );
        client.set_schema(&def).unwrap();
        [
            QueryDef::new("node"),
            QueryDef::new("node").id(1),
            QueryDef::new("node")
                .include(["name", "parent.name"])
                .include_ref("children", |q| q.include(["weight", "$rank"])),
            QueryDef::new("node").count(),
            QueryDef::new("node").group_by("body").sum(["weight"]),
        ]
        .iter()
        .map(|def| client.compile(def).unwrap())
        .collect()
    })
}

fuzz_target!(|input: DecoderInput| {
    let queries = queries();
    let compiled = &queries[input.query as usize % queries.len()];
    let Ok(result) = QueryResult::new(compiled.reader.clone(), input.data) else {
        return;
    };
    let mut arena = DecodeArena::new();
    let _ = result.to_value(&mut arena);
    for record in result.records() {
        let _ = record.get("name", &mut arena);
        let _ = record.references("children");
    }
});
