//! Codec benchmarks for QuarryDB
//!
//! Measures the three hot paths of the client: encoding mutations into the
//! modify buffer, compiling query definitions to byte code, and decoding
//! engine results into values.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quarrydb::modify::{encode_create, ModifyCtx};
use quarrydb::{
    Client, DecodeArena, MemoryEngine, ModifyMode, Operator, Order, PropDef, QueryDef, QueryResult,
    SchemaDef, SchemaLayout, TypeDef, Value, VectorBase,
};

fn schema() -> SchemaDef {
    SchemaDef::new().locale("en").with_type(
        TypeDef::new("article")
            .prop(PropDef::string("title").max_bytes(48))
            .prop(PropDef::string("body"))
            .prop(PropDef::text("summary"))
            .prop(PropDef::number("score"))
            .prop(PropDef::boolean("published"))
            .prop(PropDef::enumeration("state", ["draft", "live", "gone"]))
            .prop(PropDef::vector("emb", 8, VectorBase::Float32)),
    )
}

fn article(i: usize, body_len: usize) -> Value {
    Value::object([
        ("title", Value::from(format!("article {i}"))),
        ("body", Value::from("the quick brown fox ".repeat(body_len / 20 + 1))),
        ("summary", Value::text([("en", "a summary")])),
        ("score", Value::from(i as f64)),
        ("published", Value::from(i % 2 == 0)),
        ("state", Value::from("live")),
        ("emb", Value::list((0..8).map(|x| (x + i) as f64))),
    ])
}

fn bench_encode_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_create");
    let layout = SchemaLayout::compile(&schema(), None).unwrap();
    let ty = layout.get("article").unwrap();

    for body_len in [32usize, 512, 8192] {
        let value = article(1, body_len);
        group.bench_with_input(BenchmarkId::new("body", body_len), &value, |b, value| {
            let mut ctx = ModifyCtx::new(1 << 16, 1 << 24);
            ctx.set_locales(layout.locales());
            b.iter(|| {
                ctx.reset();
                let outcome = encode_create(&mut ctx, ty, 1, black_box(value), ModifyMode::Safe);
                black_box(outcome.unwrap())
            });
        });
    }

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let client = Client::new(MemoryEngine::new()).unwrap();
    client.set_schema(&schema()).unwrap();
    let def = QueryDef::new("article")
        .filter("score", Operator::Gt, 10)
        .or(|f| f.filter("state", Operator::Equal, "draft"))
        .sort("score", Order::Desc)
        .range(0, 50)
        .include(["title", "score", "summary"]);

    c.bench_function("compile_query", |b| {
        b.iter(|| black_box(client.compile(black_box(&def)).unwrap()))
    });
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_result");

    for count in [10usize, 100, 1000] {
        let client = Client::new(MemoryEngine::new()).unwrap();
        client.set_schema(&schema()).unwrap();
        for i in 0..count {
            client.create("article", article(i, 64)).unwrap();
        }
        let result = client.query("article").range(0, count as u32).get().unwrap();
        let reader = result.reader().clone();
        let bytes = result.bytes().to_vec();

        group.bench_with_input(BenchmarkId::new("to_value", count), &bytes, |b, bytes| {
            let mut arena = DecodeArena::new();
            b.iter(|| {
                arena.reset();
                let result = QueryResult::new(reader.clone(), bytes.clone()).unwrap();
                black_box(result.to_value(&mut arena).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode_create, bench_compile, bench_decode);

criterion_main!(benches);
