//! Fuzz testing for the mutation encoder.
//!
//! Arbitrary JSON payloads are encoded as creates and updates into a tiny
//! modify buffer so the overflow and rollback paths run constantly. The
//! encoder may reject a payload but must never panic, and a rejected or
//! overflowing record must leave the buffer as it was.

#![no_main]

use libfuzzer_sys::fuzz_target;

use quarrydb::modify::{encode_create, encode_update, ModifyCtx, RecordOutcome};
use quarrydb::{ModifyMode, PropDef, SchemaDef, SchemaLayout, TypeDef, Value, VectorBase};

fuzz_target!(|data: &[u8]| {
    let Ok(json) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let payload = Value::from_json(&json);

    let def = SchemaDef::new().locale("en").with_type(
        TypeDef::new("doc")
            .prop(PropDef::string("title").max_bytes(20))
            .prop(PropDef::string("body"))
            .prop(PropDef::text("label"))
            .prop(PropDef::number("score"))
            .prop(PropDef::enumeration("state", ["a", "b"]))
            .prop(PropDef::json("meta"))
            .prop(PropDef::vector("emb", 4, VectorBase::Float32))
            .prop(PropDef::references("links", "doc").edge(PropDef::number("$w"))),
    );
    let layout = SchemaLayout::compile(&def, None).unwrap();
    let doc = layout.get("doc").unwrap();

    for mode in [ModifyMode::Safe, ModifyMode::Unsafe] {
        let mut ctx = ModifyCtx::new(16, 4096);
        ctx.set_locales(layout.locales());
        let before = ctx.as_bytes().to_vec();
        match encode_create(&mut ctx, doc, 1, &payload, mode) {
            Ok(RecordOutcome::Written(_)) | Err(_) => {}
            Ok(_) => assert_eq!(ctx.as_bytes(), before.as_slice()),
        }
        let _ = encode_update(&mut ctx, doc, 1, &payload, mode);
    }
});
