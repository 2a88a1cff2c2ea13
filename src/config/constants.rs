//! # Codec Configuration Constants
//!
//! This module centralizes the numeric limits of the wire formats and the
//! buffer-sizing defaults. Constants that depend on each other are co-located
//! and their relationships are enforced with compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_MODIFY_SIZE (64 KiB)
//!       │
//!       └─> MAX_MODIFY_SIZE (must be >=)
//!             The mutation buffer doubles on overflow until it reaches
//!             MAX_MODIFY_SIZE. A single record larger than this is fatal.
//!
//! MAX_FIELD_NUMBER (250)
//!       │
//!       ├─> EDGE_BLOCK_MARKER (253), MULTI_REF_MARKER (254),
//!       │   SINGLE_REF_MARKER (255)
//!       │     Result items are keyed by field number, so every field number
//!       │     must stay below the block markers.
//!       │
//!       └─> ID_FIELD (255) addresses the record id in filters and sorts.
//!
//! MAIN_STRING_MAX_BYTES (60)
//!       │
//!       └─> main string width = max_bytes + 1 (length byte) must fit u8
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `DEFAULT_MODIFY_SIZE <= MAX_MODIFY_SIZE`
//! 2. `MAX_FIELD_NUMBER < EDGE_BLOCK_MARKER`
//! 3. `MAIN_STRING_MAX_BYTES < u8::MAX`
//! 4. `FILTER_INLINE_MAX_BYTES < STRING_COMPRESS_THRESHOLD`

// ============================================================================
// MUTATION BUFFER
// ============================================================================

/// Initial capacity of a mutation context.
pub const DEFAULT_MODIFY_SIZE: usize = 64 * 1024;

/// Hard ceiling for a mutation context. A batch that cannot grow past this is
/// flushed; a single record that does not fit is rejected as out of space.
pub const MAX_MODIFY_SIZE: usize = 100 * 1024 * 1024;

const _: () = assert!(
    DEFAULT_MODIFY_SIZE <= MAX_MODIFY_SIZE,
    "DEFAULT_MODIFY_SIZE must not exceed MAX_MODIFY_SIZE"
);

/// Strings longer than this many bytes are deflate-compressed when the field
/// allows compression.
pub const STRING_COMPRESS_THRESHOLD: usize = 200;

// ============================================================================
// SCHEMA LAYOUT
// ============================================================================

/// Highest field number a type (or an edge sub-schema) may allocate.
pub const MAX_FIELD_NUMBER: u16 = 250;

/// Strings declaring `max_bytes` at or below this are stored in the main region.
pub const MAIN_STRING_MAX_BYTES: u16 = 60;

/// Vectors whose total byte size is at or below this are stored in the main region.
pub const MAIN_VECTOR_MAX_BYTES: usize = 32;

/// Largest main region a type may declare.
pub const MAX_MAIN_LEN: usize = u16::MAX as usize;

/// Enum values are stored as `index + 1` in a single byte, 0 meaning unset.
pub const MAX_ENUM_VALUES: usize = 254;

const _: () = assert!(
    MAIN_STRING_MAX_BYTES < u8::MAX as u16,
    "main string length prefix is a single byte"
);

// ============================================================================
// WIRE MARKERS
// ============================================================================

/// Field number reserved for the fixed-offset main region.
pub const MAIN_FIELD: u8 = 0;

/// Pseudo field number addressing the record id.
pub const ID_FIELD: u8 = 255;

/// Include/result block holding a single referenced record.
pub const SINGLE_REF_MARKER: u8 = 255;

/// Include/result block holding a list of referenced records.
pub const MULTI_REF_MARKER: u8 = 254;

/// Include/result block holding the edge properties of a traversed reference.
pub const EDGE_BLOCK_MARKER: u8 = 253;

const _: () = assert!(
    MAX_FIELD_NUMBER < EDGE_BLOCK_MARKER as u16,
    "field numbers must not collide with result block markers"
);

// ============================================================================
// QUERY COMPILATION
// ============================================================================

/// Variable-width filter values longer than this are sent as a content hash.
pub const FILTER_INLINE_MAX_BYTES: usize = 32;

const _: () = assert!(
    FILTER_INLINE_MAX_BYTES < STRING_COMPRESS_THRESHOLD,
    "inline filter values must never need decompression to compare"
);

/// Limit applied when a query does not set one.
pub const DEFAULT_LIMIT: u32 = 1000;

/// Maximum nesting of reference includes and `**` expansion.
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Seed for every xxh64 hash the codec emits. Changing it changes the wire format.
pub const HASH_SEED: u64 = 0;
