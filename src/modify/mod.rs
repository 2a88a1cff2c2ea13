//! # Modify Module
//!
//! The mutation encoder. Create, update and delete payloads are turned into
//! the mutation byte stream that `flush_modify` hands to the engine.
//!
//! - [`ops`]: operation bytes of the stream
//! - [`ctx`]: `ModifyCtx`, the checkpointed copy-on-grow buffer
//! - [`record`]: the record driver (validation, hooks, overflow retry)
//!
//! Field payloads themselves are written by the codecs bound to each
//! `FieldDescriptor` (see [`crate::codec`]).

pub mod ctx;
pub mod ops;
pub mod record;

pub use ctx::{Checkpoint, FieldError, ModifyCtx, OpKind};
pub use record::{encode_create, encode_delete, encode_update, ModifyMode, RecordOutcome};
