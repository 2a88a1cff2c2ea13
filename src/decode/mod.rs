//! # Decode Module
//!
//! Reads result bytes produced by the engine for a compiled query.
//!
//! Decoding happens in two phases:
//!
//! 1. [`ResultIndex::build`] walks the framing once, checks it against the
//!    [`ReaderSchema`] and records byte ranges.
//! 2. [`QueryResult`] and [`RecordView`] decode fields only when asked,
//!    using a caller-owned [`DecodeArena`] for scratch space.
//!
//! ```ignore
//! let result = QueryResult::new(compiled.reader.clone(), bytes)?;
//! let mut arena = DecodeArena::new();
//! for record in result.records() {
//!     let name = record.get("name", &mut arena)?;
//! }
//! ```

mod aggregate;
pub mod arena;
pub mod index;
pub mod reader;
pub mod view;

pub use arena::DecodeArena;
pub use index::{RecordIndex, RefIndex, ResultIndex};
pub use reader::{ReadAggFn, ReadAggregate, ReadField, ReadRef, ReaderSchema};
pub use view::{QueryResult, RecordView};
