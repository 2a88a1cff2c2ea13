//! # Engine Hooks
//!
//! The four calls the codec makes into an engine. Everything that crosses
//! them is bytes: the packed schema descriptor, mutation batches, compiled
//! queries and result buffers.
//!
//! | Hook | Input | Output |
//! |------|-------|--------|
//! | `set_schema` | packed descriptor | schema hash |
//! | `flush_modify` | one mutation batch | per-type id offsets, or `None` when nothing was created |
//! | `get_query_buf` | compiled query | result bytes |
//! | `subscribe` | compiled query | a [`Subscription`] that unsubscribes on drop |
//!
//! ## Provisional Ids
//!
//! Creates are encoded with ids the client picks from its own per-type
//! counter. For every type that received creates, the engine reports an
//! offset: the final id of a created record is `provisional + offset`. Ids of
//! the same type at or above the first provisional id of the batch refer to
//! records created in that batch and are shifted by the same offset.

use std::fmt;
use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;

/// Per type id, the amount added to provisional ids of one flushed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOffsets {
    offsets: HashMap<u16, u32>,
}

impl FlushOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, type_id: u16, offset: u32) {
        self.offsets.insert(type_id, offset);
    }

    /// Offset of `type_id`; 0 for types the batch did not create.
    pub fn offset(&self, type_id: u16) -> u32 {
        self.offsets.get(&type_id).copied().unwrap_or(0)
    }

    pub fn resolve(&self, type_id: u16, provisional: u32) -> u32 {
        provisional.wrapping_add(self.offset(type_id))
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&eyre::Report) + Send + Sync>;

/// An engine-side registration. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A registration with nothing to release.
    pub fn detached() -> Self {
        Self { cancel: None }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// The engine boundary.
///
/// Implementations must apply each `flush_modify` batch atomically and must
/// treat byte-identical query buffers as the same query.
pub trait EngineHooks: Send + Sync {
    fn set_schema(&self, descriptor: &[u8]) -> Result<u64>;

    fn flush_modify(&self, batch: &[u8]) -> Result<Option<FlushOffsets>>;

    fn get_query_buf(&self, query: &[u8]) -> Result<Vec<u8>>;

    /// Registers `query`; `on_data` receives a fresh result after every
    /// change the engine considers relevant.
    fn subscribe(&self, query: &[u8], on_data: DataCallback, on_error: ErrorCallback) -> Result<Subscription>;
}

impl<T: EngineHooks + ?Sized> EngineHooks for Arc<T> {
    fn set_schema(&self, descriptor: &[u8]) -> Result<u64> {
        (**self).set_schema(descriptor)
    }

    fn flush_modify(&self, batch: &[u8]) -> Result<Option<FlushOffsets>> {
        (**self).flush_modify(batch)
    }

    fn get_query_buf(&self, query: &[u8]) -> Result<Vec<u8>> {
        (**self).get_query_buf(query)
    }

    fn subscribe(&self, query: &[u8], on_data: DataCallback, on_error: ErrorCallback) -> Result<Subscription> {
        (**self).subscribe(query, on_data, on_error)
    }
}
