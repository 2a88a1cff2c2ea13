//! # QuarryDB - Schema-Driven Binary Codec
//!
//! QuarryDB is the client half of an embedded database: it turns typed
//! records and declarative queries into the compact byte streams an engine
//! consumes, and reads the engine's result buffers back lazily. The engine
//! itself sits behind four hooks, so the same client drives an in-process
//! engine, a remote one, or the in-memory [`MemoryEngine`] used by tests.
//!
//! - **Fixed layouts**: every type gets a numbered, placed field layout once,
//!   and every stream addresses fields by number
//! - **Buffered writes**: one growable mutation buffer, flushed in batches
//! - **Lazy reads**: results are indexed once and decoded field by field
//!
//! ## Quick Start
//!
//! ```ignore
//! use quarrydb::{Client, MemoryEngine, PropDef, SchemaDef, TypeDef, Value};
//!
//! let client = Client::new(MemoryEngine::new())?;
//! client.set_schema(
//!     &SchemaDef::new()
//!         .locale("en")
//!         .with_type(TypeDef::new("user").prop(PropDef::string("name"))),
//! )?;
//!
//! client.create("user", Value::object([("name", "ann")]))?;
//! let users = client.query("user").include(["name"]).get()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │           Client (buffer, ids, subs)          │
//! ├───────────────┬───────────────┬──────────────┤
//! │ modify        │ query         │ decode       │
//! │ (mutations)   │ (byte-code)   │ (lazy reads) │
//! ├───────────────┴───────────────┴──────────────┤
//! │        codec (per-type field codecs)          │
//! ├──────────────────────────────────────────────┤
//! │     schema (layout compiler, descriptor)      │
//! ├──────────────────────────────────────────────┤
//! │   EngineHooks ──> engine (MemoryEngine, ..)   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`schema`]: numbering, placement and migration of type layouts
//! - [`codec`]: validation, encoding and decoding per field type
//! - [`modify`]: the mutation stream and its record driver
//! - [`query`]: query definitions and their byte-code compiler
//! - [`decode`]: result indexing and lazy record views
//! - [`client`]: the batch owner and the engine hook boundary
//! - [`engine`]: an in-memory engine speaking the same bytes (`loopback`
//!   feature, on by default)

#[macro_use]
mod macros;

pub mod client;
pub mod codec;
pub mod config;
pub mod decode;
pub mod encoding;
#[cfg(feature = "loopback")]
pub mod engine;
pub mod error;
pub mod modify;
pub mod query;
pub mod schema;
pub mod types;

pub use client::{Client, ClientBuilder, EngineHooks, FlushOffsets, FlushReport, Query, Subscription, SubscriptionHandle, WriteOutcome};
pub use decode::{DecodeArena, QueryResult, RecordView};
#[cfg(feature = "loopback")]
pub use engine::MemoryEngine;
pub use error::{CodecError, DecodeError, ModifyError, SchemaError};
pub use modify::ModifyMode;
pub use query::{Filter, IncludeOpts, Operator, Order, QueryDef, VectorFn};
pub use schema::{PropDef, SchemaDef, SchemaLayout, TypeDef};
pub use types::{TypeTag, TypedVector, Value, VectorBase};
