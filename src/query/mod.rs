//! # Query Module
//!
//! Compiles fluent query definitions into the byte-code the engine executes,
//! together with a [`ReaderSchema`](crate::decode::ReaderSchema) describing
//! exactly which fields the engine will return.
//!
//! ## Components
//!
//! - [`def`]: `QueryDef` and the filter, sort, include, aggregate and search
//!   definitions it is built from
//! - [`header`]: the fixed query header and query kinds
//! - [`filter`]: filter items and OR groups in reverse Polish order
//! - [`include`]: include sections, glob expansion and nested references
//! - [`aggregate`]: accumulator layout of aggregate queries
//! - [`compiler`]: targets, sorts, search and section assembly

pub mod aggregate;
pub mod compiler;
pub mod def;
pub mod filter;
pub mod header;
pub mod include;

pub use compiler::{compile, CompiledQuery};
pub use def::{
    AggFn, AggregateDef, Clause, Condition, Filter, IncludeItem, IncludeOpts, Operator, Order, QueryDef,
    SearchDef, SortDef, Target, VectorFn,
};
pub use header::{QueryHeader, QueryKind, QUERY_HEADER_SIZE};
