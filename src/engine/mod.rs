//! # Loopback Engine
//!
//! `MemoryEngine` implements [`EngineHooks`] over an in-memory store. It
//! speaks the same bytes a real engine does: packed schema descriptors in,
//! mutation batches in, compiled queries in, result buffers out. Tests and
//! examples use it to drive the codec end to end without a server.
//!
//! ## Atomicity
//!
//! A batch is applied to a copy of the store; the copy replaces the live
//! store only when every op applied. A rejected batch leaves no trace.
//!
//! ## Subscriptions
//!
//! Each subscription keeps its last delivered result. After every flush the
//! engine re-runs every subscription and calls `on_data` only for results
//! whose bytes changed. Callbacks run with no engine lock held.

mod apply;
mod exec;
mod store;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use eyre::{bail, eyre, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::client::{DataCallback, EngineHooks, ErrorCallback, FlushOffsets, Subscription};
use crate::encoding::hash64;
use crate::schema::PackedSchema;

use self::store::Store;

struct Sub {
    query: Vec<u8>,
    on_data: DataCallback,
    on_error: ErrorCallback,
    last: Option<Vec<u8>>,
}

#[derive(Default)]
struct Shared {
    store: RwLock<Store>,
    subs: Mutex<HashMap<u64, Sub>>,
    next_sub: AtomicU64,
    flushes: AtomicU64,
    fail_next_flush: AtomicBool,
}

/// In-memory engine. Clones share the same store.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("flushes", &self.flushes())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records of `type_id`.
    pub fn record_count(&self, type_id: u16) -> usize {
        self.inner
            .store
            .read()
            .table(type_id)
            .map_or(0, |t| t.records.len())
    }

    /// Number of batches applied successfully.
    pub fn flushes(&self) -> u64 {
        self.inner.flushes.load(Ordering::Relaxed)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subs.lock().len()
    }

    /// Hash of the installed schema descriptor, 0 before any.
    pub fn schema_hash(&self) -> u64 {
        self.inner.store.read().hash
    }

    /// Makes the next `flush_modify` fail without applying anything.
    pub fn fail_next_flush(&self) {
        self.inner.fail_next_flush.store(true, Ordering::SeqCst);
    }

    fn schema(&self) -> Result<Arc<PackedSchema>> {
        self.inner
            .store
            .read()
            .schema
            .clone()
            .ok_or_else(|| eyre!("no schema installed"))
    }

    fn run(&self, query: &[u8]) -> Result<Vec<u8>> {
        let schema = self.schema()?;
        let store = self.inner.store.read();
        exec::execute(&store, &schema, query)
    }

    /// Re-runs every subscription and pushes results that changed.
    fn notify(&self) {
        let queries: Vec<(u64, Vec<u8>)> = self
            .inner
            .subs
            .lock()
            .iter()
            .map(|(id, sub)| (*id, sub.query.clone()))
            .collect();
        for (id, query) in queries {
            let result = self.run(&query);
            let deliver = {
                let mut subs = self.inner.subs.lock();
                let Some(sub) = subs.get_mut(&id) else {
                    continue;
                };
                match result {
                    Ok(bytes) if sub.last.as_deref() == Some(bytes.as_slice()) => None,
                    Ok(bytes) => {
                        sub.last = Some(bytes.clone());
                        Some((sub.on_data.clone(), Ok(bytes)))
                    }
                    Err(err) => Some((sub.on_data.clone(), Err((sub.on_error.clone(), err)))),
                }
            };
            match deliver {
                Some((on_data, Ok(bytes))) => {
                    trace!(sub = id, result_len = bytes.len(), "pushing subscription result");
                    on_data(&bytes);
                }
                Some((_, Err((on_error, err)))) => {
                    warn!(sub = id, error = %err, "subscription query failed");
                    on_error(&err);
                }
                None => {}
            }
        }
    }
}

impl EngineHooks for MemoryEngine {
    fn set_schema(&self, descriptor: &[u8]) -> Result<u64> {
        let schema = PackedSchema::parse(descriptor).wrap_err("invalid schema descriptor")?;
        let hash = hash64(descriptor);
        let mut store = self.inner.store.write();
        store.schema = Some(Arc::new(schema));
        store.hash = hash;
        debug!(hash, descriptor_len = descriptor.len(), "installed schema");
        Ok(hash)
    }

    fn flush_modify(&self, batch: &[u8]) -> Result<Option<FlushOffsets>> {
        if self.inner.fail_next_flush.swap(false, Ordering::SeqCst) {
            bail!("flush rejected by the engine");
        }
        let schema = self.schema()?;
        let applied = {
            let mut live = self.inner.store.write();
            let mut next = live.clone();
            let applied = apply::apply(&mut next, &schema, batch)?;
            *live = next;
            applied
        };
        self.inner.flushes.fetch_add(1, Ordering::Relaxed);
        debug!(
            batch_len = batch.len(),
            created = applied.created,
            deleted = applied.deleted,
            "applied batch"
        );
        self.notify();
        Ok(applied.offsets)
    }

    fn get_query_buf(&self, query: &[u8]) -> Result<Vec<u8>> {
        self.run(query)
    }

    fn subscribe(&self, query: &[u8], on_data: DataCallback, on_error: ErrorCallback) -> Result<Subscription> {
        let first = self.run(query).wrap_err("subscription query failed")?;
        let id = self.inner.next_sub.fetch_add(1, Ordering::Relaxed);
        self.inner.subs.lock().insert(
            id,
            Sub {
                query: query.to_vec(),
                on_data: on_data.clone(),
                on_error,
                last: Some(first.clone()),
            },
        );
        debug!(sub = id, query_len = query.len(), "subscribed");
        on_data(&first);

        let weak: Weak<Shared> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.subs.lock().remove(&id);
                debug!(sub = id, "unsubscribed");
            }
        }))
    }
}

#[cfg(test)]
mod tests;
