//! Subscription registry.
//!
//! Registrations are keyed by the compiled query bytes. The first listener
//! of a key opens the engine subscription; later listeners of the same key
//! join it and immediately receive the last result. Dropping the last
//! [`SubscriptionHandle`] of a key drops the engine subscription.
//!
//! Listener callbacks always run with the registry unlocked, so a listener
//! may subscribe or drop handles itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::hooks::{DataCallback, ErrorCallback, Subscription};
use super::Inner;
use crate::decode::{QueryResult, ReaderSchema};
use crate::query::CompiledQuery;

pub(crate) type Listener = Arc<dyn Fn(&QueryResult) + Send + Sync>;

struct Entry {
    reader: Arc<ReaderSchema>,
    listeners: Vec<(u64, Listener)>,
    engine: Option<Subscription>,
    last: Option<Arc<QueryResult>>,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<Vec<u8>, Entry>>,
    next_listener: AtomicU64,
}

impl Registry {
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Decodes a pushed result and hands it to every listener of `key`.
    fn deliver(&self, key: &[u8], bytes: &[u8]) {
        let Some((reader, listeners)) = self.entries.lock().get(key).map(|e| {
            let listeners: Vec<Listener> = e.listeners.iter().map(|(_, l)| l.clone()).collect();
            (e.reader.clone(), listeners)
        }) else {
            return;
        };
        let result = match QueryResult::new(reader, bytes.to_vec()) {
            Ok(result) => Arc::new(result),
            Err(err) => {
                warn!(error = %err, "dropping undecodable subscription result");
                return;
            }
        };
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.last = Some(result.clone());
        }
        for listener in listeners {
            listener(&result);
        }
    }
}

/// Keeps one listener registered. Dropping it unregisters the listener.
pub struct SubscriptionHandle {
    inner: Weak<Inner>,
    key: Vec<u8>,
    listener: u64,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("listener", &self.listener)
            .field("query_len", &self.key.len())
            .finish()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let engine = {
            let mut entries = inner.subs.entries.lock();
            let Some(entry) = entries.get_mut(&self.key) else {
                return;
            };
            entry.listeners.retain(|(id, _)| *id != self.listener);
            if entry.listeners.is_empty() {
                entries.remove(&self.key).and_then(|e| e.engine)
            } else {
                None
            }
        };
        if engine.is_some() {
            debug!(query_len = self.key.len(), "last listener gone, unsubscribing");
        }
        drop(engine);
    }
}

pub(crate) fn subscribe(inner: &Arc<Inner>, compiled: CompiledQuery, listener: Listener) -> Result<SubscriptionHandle> {
    let registry = &inner.subs;
    let key = compiled.bytes;
    let id = registry.next_listener.fetch_add(1, Ordering::Relaxed);
    let joined = {
        let mut entries = registry.entries.lock();
        match entries.get_mut(&key) {
            Some(entry) => {
                entry.listeners.push((id, listener.clone()));
                Some(entry.last.clone())
            }
            None => {
                entries.insert(
                    key.clone(),
                    Entry {
                        reader: compiled.reader,
                        listeners: vec![(id, listener.clone())],
                        engine: None,
                        last: None,
                    },
                );
                None
            }
        }
    };
    let handle = SubscriptionHandle {
        inner: Arc::downgrade(inner),
        key: key.clone(),
        listener: id,
    };
    if let Some(last) = joined {
        if let Some(result) = last {
            listener(&result);
        }
        return Ok(handle);
    }

    let weak = Arc::downgrade(inner);
    let data_key = key.clone();
    let on_data: DataCallback = Arc::new(move |bytes: &[u8]| {
        if let Some(inner) = weak.upgrade() {
            inner.subs.deliver(&data_key, bytes);
        }
    });
    let on_error: ErrorCallback = Arc::new(|err: &eyre::Report| {
        warn!(error = %err, "subscription failed");
    });
    match inner.hooks.subscribe(&key, on_data, on_error) {
        Ok(sub) => {
            let orphan = match registry.entries.lock().get_mut(&key) {
                Some(entry) => {
                    entry.engine = Some(sub);
                    None
                }
                None => Some(sub),
            };
            drop(orphan);
            debug!(query_len = key.len(), "opened subscription");
            Ok(handle)
        }
        Err(err) => {
            registry.entries.lock().remove(&key);
            Err(err).wrap_err("engine refused the subscription")
        }
    }
}
