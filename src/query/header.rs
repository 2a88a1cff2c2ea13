//! # Query Header
//!
//! Every compiled query starts with a fixed 31-byte header that tells the
//! engine what kind of query follows and how long each section is.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------
//! 0       1     kind
//! 1       2     type_id
//! 3       4     offset
//! 7       4     limit
//! 11      4     target_len
//! 15      4     filter_len
//! 19      2     sort_len
//! 21      2     search_len
//! 23      4     include_len
//! 27      4     aggregate_len
//! ```
//!
//! The sections follow in the same order as their lengths: target, filter,
//! sort, search, include, aggregate.

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const QUERY_HEADER_SIZE: usize = 31;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Range scan over every record of the type.
    Default = 0,
    Ids = 1,
    Id = 2,
    Alias = 3,
    Aggregate = 4,
    /// Bare record count; every section is empty.
    AggregateCount = 5,
}

impl QueryKind {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => QueryKind::Default,
            1 => QueryKind::Ids,
            2 => QueryKind::Id,
            3 => QueryKind::Alias,
            4 => QueryKind::Aggregate,
            5 => QueryKind::AggregateCount,
            _ => return None,
        })
    }

    /// Whether the result holds at most one record.
    pub fn is_single(self) -> bool {
        matches!(self, QueryKind::Id | QueryKind::Alias)
    }

    pub fn is_aggregate(self) -> bool {
        matches!(self, QueryKind::Aggregate | QueryKind::AggregateCount)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct QueryHeader {
    kind: u8,
    type_id: U16,
    offset: U32,
    limit: U32,
    target_len: U32,
    filter_len: U32,
    sort_len: U16,
    search_len: U16,
    include_len: U32,
    aggregate_len: U32,
}

const _: () = assert!(std::mem::size_of::<QueryHeader>() == QUERY_HEADER_SIZE);

impl QueryHeader {
    pub fn new(kind: QueryKind, type_id: u16) -> Self {
        let mut header = Self::default();
        header.set_kind(kind as u8);
        header.set_type_id(type_id);
        header
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= QUERY_HEADER_SIZE,
            "buffer too small for QueryHeader: {} < {}",
            bytes.len(),
            QUERY_HEADER_SIZE
        );
        let header = Self::ref_from_bytes(&bytes[..QUERY_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse QueryHeader: {:?}", e))?;
        if QueryKind::from_u8(header.kind).is_none() {
            bail!("unknown query kind {}", header.kind);
        }
        Ok(header)
    }

    pub fn query_kind(&self) -> QueryKind {
        QueryKind::from_u8(self.kind).unwrap_or(QueryKind::Default)
    }

    /// Sum of every section length.
    pub fn body_len(&self) -> usize {
        self.target_len() as usize
            + self.filter_len() as usize
            + self.sort_len() as usize
            + self.search_len() as usize
            + self.include_len() as usize
            + self.aggregate_len() as usize
    }

    crate::zerocopy_accessors! {
        kind: u8,
        type_id: u16,
        offset: u32,
        limit: u32,
        target_len: u32,
        filter_len: u32,
        sort_len: u16,
        search_len: u16,
        include_len: u32,
        aggregate_len: u32,
    }
}
