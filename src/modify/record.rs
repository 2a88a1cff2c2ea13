//! # Record Driver
//!
//! Encodes one whole record into a [`ModifyCtx`]:
//!
//! ```text
//! checkpoint ──> encode every field ──> Ok          record done
//!                      │
//!                      ├── Overflow  ──> rollback, grow, start over
//!                      │                 (at max capacity: Full)
//!                      ├── Invalid   ──> Safe:   rollback, Rejected
//!                      │                 Unsafe: roll back the field only
//!                      └── Schema    ──> rollback, error
//! ```
//!
//! Retrying from the record's checkpoint is the only recovery the driver
//! does. Flushing the batch and retrying in an empty buffer is left to the
//! batch owner when the driver reports [`RecordOutcome::Full`].

use std::collections::BTreeMap;

use tracing::trace;

use super::ctx::{FieldError, ModifyCtx};
use crate::error::{ModifyError, SchemaError};
use crate::schema::{FieldDescriptor, ObjectNode, TimestampHook, TypeLayout};
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModifyMode {
    /// An invalid field rejects the whole record.
    #[default]
    Safe,
    /// An invalid field is skipped; the rest of the record is written.
    Unsafe,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// The record is in the buffer. Unsafe mode lists the skipped fields.
    Written(Vec<ModifyError>),
    /// Safe mode rejected the record; nothing of it is in the buffer.
    Rejected(Vec<ModifyError>),
    /// The record does not fit even at maximum capacity; nothing was written.
    Full,
}

struct Writer<'a> {
    layout: &'a TypeLayout,
    mode: ModifyMode,
    errors: Vec<ModifyError>,
}

impl Writer<'_> {
    fn reject(&mut self, desc: &FieldDescriptor, value: &Value, reason: String) -> Result<(), FieldError> {
        self.errors.push(ModifyError {
            type_name: self.layout.name.clone(),
            field: desc.name.clone(),
            value: value.clone(),
            reason: reason.clone(),
        });
        match self.mode {
            ModifyMode::Safe => Err(FieldError::Invalid(reason)),
            ModifyMode::Unsafe => Ok(()),
        }
    }

    fn write_field(&mut self, ctx: &mut ModifyCtx, desc: &FieldDescriptor, value: &Value) -> Result<(), FieldError> {
        let hooked = desc.hook.as_ref().and_then(|h| h.apply(Some(value)));
        let value = hooked.as_ref().unwrap_or(value);

        if let Err(reason) = (desc.codec.validate)(desc, value) {
            return self.reject(desc, value, reason);
        }
        if let Some(predicate) = &desc.validation {
            if !value.is_null() && !predicate.check(value) {
                return self.reject(desc, value, "rejected by the field's validation".into());
            }
        }

        let cp = ctx.checkpoint();
        match (desc.codec.encode)(ctx, desc, value) {
            Err(FieldError::Invalid(reason)) => {
                ctx.rollback(cp);
                self.reject(desc, value, reason)
            }
            other => other,
        }
    }

    fn write_object(
        &mut self,
        ctx: &mut ModifyCtx,
        node: &ObjectNode,
        object: &BTreeMap<String, Value>,
        prefix: &str,
    ) -> Result<(), FieldError> {
        let layout = self.layout;
        for (key, value) in object {
            let Some(child) = node.child(key) else {
                return Err(SchemaError::UnknownField {
                    type_name: layout.name.clone(),
                    field: format!("{prefix}{key}"),
                }
                .into());
            };
            match (child, value) {
                (ObjectNode::Field(i), _) => {
                    self.write_field(ctx, layout.fields.at(*i), value)?;
                }
                (ObjectNode::Object(_), Value::Object(nested)) => {
                    self.write_object(ctx, child, nested, &format!("{prefix}{key}."))?;
                }
                (ObjectNode::Object(_), Value::Null) => {
                    let mut leaves = Vec::new();
                    child.leaves(&mut leaves);
                    for i in leaves {
                        self.write_field(ctx, layout.fields.at(i), &Value::Null)?;
                    }
                }
                (ObjectNode::Object(_), other) => {
                    let reason = format!("expected an object, got {}", crate::codec::value_kind(other));
                    self.errors.push(ModifyError {
                        type_name: layout.name.clone(),
                        field: format!("{prefix}{key}"),
                        value: other.clone(),
                        reason: reason.clone(),
                    });
                    if self.mode == ModifyMode::Safe {
                        return Err(FieldError::Invalid(reason));
                    }
                }
            }
        }
        Ok(())
    }

    /// Fields the payload omits that still get a value: timestamps, hooks
    /// and, on create, separate defaults.
    fn write_implicit(&mut self, ctx: &mut ModifyCtx, payload: &Value, creating: bool) -> Result<(), FieldError> {
        let layout = self.layout;
        let now = ctx.now_millis();
        for desc in layout.fields.iter() {
            if payload.pointer(&desc.name).is_some() {
                continue;
            }
            let stamped = match desc.on {
                Some(TimestampHook::Create) => creating,
                Some(TimestampHook::Update) => true,
                None => false,
            };
            let value = if stamped {
                Some(Value::Timestamp(now))
            } else if let Some(hook) = &desc.hook {
                hook.apply(None)
            } else if creating && desc.separate {
                desc.default.clone()
            } else {
                None
            };
            if let Some(value) = value {
                self.write_field(ctx, desc, &value)?;
            }
        }
        Ok(())
    }
}

fn payload_object<'v>(layout: &TypeLayout, payload: &'v Value) -> Result<&'v BTreeMap<String, Value>, ModifyError> {
    payload.as_object().ok_or_else(|| ModifyError {
        type_name: layout.name.clone(),
        field: String::new(),
        value: payload.clone(),
        reason: format!("payload must be an object, got {}", crate::codec::value_kind(payload)),
    })
}

/// Runs `encode` from one checkpoint until it fits, growing the buffer on
/// overflow.
fn drive(
    ctx: &mut ModifyCtx,
    layout: &TypeLayout,
    mode: ModifyMode,
    encode: impl Fn(&mut Writer<'_>, &mut ModifyCtx) -> Result<(), FieldError>,
) -> Result<RecordOutcome, SchemaError> {
    loop {
        let cp = ctx.checkpoint();
        let mut writer = Writer {
            layout,
            mode,
            errors: Vec::new(),
        };
        match encode(&mut writer, ctx) {
            Ok(()) => {
                ctx.record_done();
                return Ok(RecordOutcome::Written(writer.errors));
            }
            Err(FieldError::Overflow) => {
                ctx.rollback(cp);
                if !ctx.grow() {
                    trace!(capacity = ctx.capacity(), needed = ctx.needed(), "record does not fit");
                    return Ok(RecordOutcome::Full);
                }
            }
            Err(FieldError::Invalid(_)) => {
                ctx.rollback(cp);
                trace!(type_name = %layout.name, errors = writer.errors.len(), "record rejected");
                return Ok(RecordOutcome::Rejected(writer.errors));
            }
            Err(FieldError::Schema(err)) => {
                ctx.rollback(cp);
                return Err(err);
            }
        }
    }
}

pub fn encode_create(
    ctx: &mut ModifyCtx,
    layout: &TypeLayout,
    id: u32,
    payload: &Value,
    mode: ModifyMode,
) -> Result<RecordOutcome, SchemaError> {
    let object = match payload_object(layout, payload) {
        Ok(object) => object,
        Err(err) => return Ok(RecordOutcome::Rejected(vec![err])),
    };
    let main = layout.fields.default_main();
    drive(ctx, layout, mode, |writer, ctx| {
        ctx.begin_create(layout, id, &main)?;
        writer.write_object(ctx, layout.fields.root(), object, "")?;
        writer.write_implicit(ctx, payload, true)?;
        ctx.finish_create(layout)
    })
}

pub fn encode_update(
    ctx: &mut ModifyCtx,
    layout: &TypeLayout,
    id: u32,
    payload: &Value,
    mode: ModifyMode,
) -> Result<RecordOutcome, SchemaError> {
    let object = match payload_object(layout, payload) {
        Ok(object) => object,
        Err(err) => return Ok(RecordOutcome::Rejected(vec![err])),
    };
    drive(ctx, layout, mode, |writer, ctx| {
        ctx.begin_update(layout, id);
        writer.write_object(ctx, layout.fields.root(), object, "")?;
        writer.write_implicit(ctx, payload, false)?;
        ctx.finish_update()
    })
}

pub fn encode_delete(ctx: &mut ModifyCtx, layout: &TypeLayout, id: u32) -> RecordOutcome {
    loop {
        let cp = ctx.checkpoint();
        match ctx.delete_record(layout, id) {
            Ok(()) => {
                ctx.record_done();
                return RecordOutcome::Written(Vec::new());
            }
            Err(_) => {
                ctx.rollback(cp);
                if !ctx.grow() {
                    return RecordOutcome::Full;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modify::ops;
    use crate::schema::{PropDef, SchemaDef, SchemaLayout, TypeDef};

    fn layout() -> SchemaLayout {
        let def = SchemaDef::new().locale("en").with_type(
            TypeDef::new("post")
                .prop(PropDef::string("title"))
                .prop(PropDef::number("score").default_value(serde_json::json!(7)))
                .prop(PropDef::string("state").default_value(serde_json::json!("draft")))
                .prop(PropDef::enumeration("kind", ["news", "blog"]))
                .prop(PropDef::object("meta", [PropDef::string("lang"), PropDef::boolean("pinned")]))
                .prop(PropDef::timestamp("created").on(TimestampHook::Create))
                .prop(PropDef::timestamp("updated").on(TimestampHook::Update))
                .prop(PropDef::string("slug").hook(|v| v.and_then(Value::as_str).map(|s| Value::from(s.to_lowercase())))),
        );
        SchemaLayout::compile(&def, None).unwrap()
    }

    fn post(layout: &SchemaLayout) -> &TypeLayout {
        layout.get("post").unwrap()
    }

    fn pinned_ctx(capacity: usize) -> ModifyCtx {
        let mut ctx = ModifyCtx::new(capacity, 1 << 20);
        ctx.set_locales(&["en".to_string()]);
        ctx.set_clock(Some(1_000));
        ctx
    }

    #[test]
    fn create_prefills_main_defaults_and_writes_separate_defaults() {
        let layout = layout();
        let post = post(&layout);
        let mut ctx = pinned_ctx(4096);
        let payload = Value::object([("title", "hello")]);
        let outcome = encode_create(&mut ctx, post, 1, &payload, ModifyMode::Safe).unwrap();
        assert_eq!(outcome, RecordOutcome::Written(vec![]));

        let score = post.field("score").unwrap();
        let at = 15 + score.offset as usize;
        assert_eq!(&ctx.as_bytes()[at..at + 8], &7f64.to_le_bytes());

        let bytes = ctx.as_bytes();
        let draft = bytes.windows(5).any(|w| w == b"draft");
        assert!(draft, "separate default is written");
        assert_eq!(ctx.records(), 1);
    }

    #[test]
    fn create_stamps_both_timestamp_hooks() {
        let layout = layout();
        let post = post(&layout);
        let mut ctx = pinned_ctx(4096);
        encode_create(&mut ctx, post, 1, &Value::object([("title", "x")]), ModifyMode::Safe).unwrap();
        for name in ["created", "updated"] {
            let f = post.field(name).unwrap();
            let at = 15 + f.offset as usize;
            assert_eq!(&ctx.as_bytes()[at..at + 8], &1_000i64.to_le_bytes(), "{name}");
        }
    }

    #[test]
    fn update_only_stamps_update_hooks() {
        let layout = layout();
        let post = post(&layout);
        let mut ctx = pinned_ctx(4096);
        encode_update(&mut ctx, post, 3, &Value::object([("kind", "blog")]), ModifyMode::Safe).unwrap();

        let bytes = ctx.as_bytes();
        let partial = bytes.iter().position(|&b| b == ops::UPDATE_PARTIAL).unwrap();
        let updated = post.field("updated").unwrap();
        let created = post.field("created").unwrap();
        let mut ranges = Vec::new();
        let mut r = crate::encoding::ByteReader::new(&bytes[partial + 5..]);
        while !r.is_empty() {
            let offset = r.u16().unwrap();
            let len = r.u16().unwrap();
            r.skip(len as usize).unwrap();
            ranges.push(offset);
        }
        assert!(ranges.contains(&updated.offset));
        assert!(!ranges.contains(&created.offset));
    }

    #[test]
    fn field_hook_rewrites_the_value() {
        let layout = layout();
        let post = post(&layout);
        let mut ctx = pinned_ctx(4096);
        encode_update(&mut ctx, post, 3, &Value::object([("slug", "Hello-World")]), ModifyMode::Safe).unwrap();
        assert!(ctx.as_bytes().windows(11).any(|w| w == b"hello-world"));
    }

    #[test]
    fn safe_mode_rejects_the_whole_record() {
        let layout = layout();
        let post = post(&layout);
        let mut ctx = pinned_ctx(4096);
        let payload = Value::object([("title", "ok"), ("kind", "podcast")]);
        let outcome = encode_update(&mut ctx, post, 3, &payload, ModifyMode::Safe).unwrap();

        let RecordOutcome::Rejected(errors) = outcome else {
            panic!("expected a rejection, got {outcome:?}");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "kind");
        assert_eq!(errors[0].value, Value::from("podcast"));
        assert!(ctx.is_empty());
        assert_eq!(ctx.records(), 0);
    }

    #[test]
    fn unsafe_mode_skips_only_the_invalid_field() {
        let layout = layout();
        let post = post(&layout);
        let mut ctx = pinned_ctx(4096);
        let payload = Value::object([("title", "kept"), ("kind", "podcast")]);
        let outcome = encode_update(&mut ctx, post, 3, &payload, ModifyMode::Unsafe).unwrap();

        let RecordOutcome::Written(errors) = outcome else {
            panic!("expected the record to be written, got {outcome:?}");
        };
        assert_eq!(errors.len(), 1);
        assert!(ctx.as_bytes().windows(4).any(|w| w == b"kept"));
    }

    #[test]
    fn unknown_payload_key_is_a_schema_error() {
        let layout = layout();
        let post = post(&layout);
        let mut ctx = pinned_ctx(4096);
        let err = encode_create(&mut ctx, post, 1, &Value::object([("nope", 1)]), ModifyMode::Safe).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownField { field, .. } if field == "nope"));
        assert!(ctx.is_empty());

        let nested = Value::object([("meta", Value::object([("color", "red")]))]);
        let err = encode_update(&mut ctx, post, 1, &nested, ModifyMode::Safe).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownField { field, .. } if field == "meta.color"));
    }

    #[test]
    fn nested_objects_are_walked_by_path() {
        let layout = layout();
        let post = post(&layout);
        let mut ctx = pinned_ctx(4096);
        let payload = Value::object([("meta", Value::object([("lang", Value::from("nl")), ("pinned", Value::Bool(true))]))]);
        let outcome = encode_update(&mut ctx, post, 2, &payload, ModifyMode::Safe).unwrap();
        assert_eq!(outcome, RecordOutcome::Written(vec![]));
        assert!(ctx.as_bytes().windows(2).any(|w| w == b"nl"));
    }

    #[test]
    fn overflow_retry_matches_a_large_buffer() {
        let layout = layout();
        let post = post(&layout);
        let payload = Value::object([
            ("title", Value::from("a fairly long title that will not fit")),
            ("kind", Value::from("news")),
        ]);

        let mut large = pinned_ctx(4096);
        encode_create(&mut large, post, 1, &payload, ModifyMode::Safe).unwrap();
        encode_update(&mut large, post, 1, &payload, ModifyMode::Safe).unwrap();

        let mut small = pinned_ctx(16);
        encode_create(&mut small, post, 1, &payload, ModifyMode::Safe).unwrap();
        encode_update(&mut small, post, 1, &payload, ModifyMode::Safe).unwrap();

        assert!(small.capacity() > 16);
        assert_eq!(small.as_bytes(), large.as_bytes());
    }

    #[test]
    fn full_when_the_maximum_is_reached() {
        let layout = layout();
        let post = post(&layout);
        let mut ctx = ModifyCtx::new(32, 64);
        let payload = Value::object([("title", "x".repeat(100))]);
        let outcome = encode_create(&mut ctx, post, 1, &payload, ModifyMode::Safe).unwrap();
        assert_eq!(outcome, RecordOutcome::Full);
        assert!(ctx.is_empty());
        assert!(ctx.needed() > 64);
    }

    #[test]
    fn delete_switches_type_once() {
        let layout = layout();
        let post = post(&layout);
        let mut ctx = pinned_ctx(4096);
        encode_delete(&mut ctx, post, 4);
        encode_delete(&mut ctx, post, 5);
        assert_eq!(
            ctx.as_bytes(),
            &[
                ops::SWITCH_TYPE, post.id as u8, 0,
                ops::DELETE_RECORD, 4, 0, 0, 0,
                ops::DELETE_RECORD, 5, 0, 0, 0,
            ]
        );
    }
}
