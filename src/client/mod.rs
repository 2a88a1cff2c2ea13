//! # Client Module
//!
//! The batch owner that sits between application code and an engine. It owns
//! the installed schema layout, the shared mutation buffer and the
//! subscription registry, and talks to the engine only through
//! [`EngineHooks`].
//!
//! ## Write Path
//!
//! ```text
//! create/update/delete ──> ModifyCtx (one writer at a time)
//!                              │
//!           Full ──────────────┤ flush what is buffered, retry once empty
//!                              │
//! drain() / query().get() ──> flush_modify(batch) ──> FlushReport
//! ```
//!
//! Writes are buffered until [`Client::drain`] or until a read needs them:
//! every query drains first, so a read always observes the writes issued
//! before it. The record driver retries an overflowing record from its own
//! checkpoint; only the client flushes a batch to make room.
//!
//! ## Ids
//!
//! Creates return a provisional id from a per-type counter that follows the
//! highest id the engine has confirmed. The [`FlushReport`] maps provisional
//! ids to final ids using the engine's per-type offsets.
//!
//! ## Thread Safety
//!
//! `Client` is `Send + Sync` and cheap to clone. The mutation buffer sits
//! behind a `parking_lot::Mutex`, so concurrent writers are serialized into
//! one logical sequence.

mod builder;
pub mod hooks;
mod query;
mod subscribe;

use std::sync::Arc;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

pub use builder::ClientBuilder;
pub use hooks::{DataCallback, EngineHooks, ErrorCallback, FlushOffsets, Subscription};
pub use query::Query;
pub use subscribe::SubscriptionHandle;

use crate::decode::QueryResult;
use crate::error::{CodecError, ModifyError, SchemaError};
use crate::modify::{encode_create, encode_delete, encode_update, ModifyCtx, ModifyMode, RecordOutcome};
use crate::query::{compile, CompiledQuery, QueryDef};
use crate::schema::{SchemaDef, SchemaLayout, TypeLayout};
use crate::types::Value;

/// What happened to one write call.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Buffered for the next flush. Creates carry their provisional id.
    Queued(u32),
    /// Safe mode rejected the record; nothing of it was buffered.
    Rejected(Vec<ModifyError>),
}

impl WriteOutcome {
    pub fn id(&self) -> Option<u32> {
        match self {
            WriteOutcome::Queued(id) => Some(*id),
            WriteOutcome::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, WriteOutcome::Rejected(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedId {
    pub type_id: u16,
    pub provisional: u32,
    pub id: u32,
}

/// Outcome of the flushes since the previous report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub resolved: Vec<ResolvedId>,
    /// Validation failures of rejected records and skipped fields.
    pub errors: Vec<ModifyError>,
    /// Number of `flush_modify` calls made.
    pub flushes: usize,
}

impl FlushReport {
    /// Final id of a record created under `provisional`.
    pub fn id_of(&self, type_id: u16, provisional: u32) -> Option<u32> {
        self.resolved
            .iter()
            .rev()
            .find(|r| r.type_id == type_id && r.provisional == provisional)
            .map(|r| r.id)
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

struct Installed {
    layout: Arc<SchemaLayout>,
    engine_hash: u64,
}

struct WriteState {
    ctx: ModifyCtx,
    /// Highest id handed out per type id.
    last_id: HashMap<u16, u32>,
    /// Creates buffered in `ctx`, as (type id, provisional id).
    pending: Vec<(u16, u32)>,
    report: FlushReport,
}

impl WriteState {
    fn next_id(&mut self, type_id: u16) -> u32 {
        let last = self.last_id.entry(type_id).or_insert(0);
        *last += 1;
        *last
    }

    fn release_id(&mut self, type_id: u16, id: u32) {
        if let Some(last) = self.last_id.get_mut(&type_id) {
            if *last == id {
                *last -= 1;
            }
        }
    }
}

pub(crate) struct ClientParts {
    pub hooks: Arc<dyn EngineHooks>,
    pub modify_size: usize,
    pub max_modify_size: usize,
    pub mode: ModifyMode,
    pub compress_threshold: usize,
    pub default_locale: Option<String>,
    pub clock: Option<i64>,
}

pub(crate) struct Inner {
    hooks: Arc<dyn EngineHooks>,
    mode: ModifyMode,
    default_locale: Option<String>,
    schema: RwLock<Option<Installed>>,
    writer: Mutex<WriteState>,
    pub(crate) subs: subscribe::Registry,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("mode", &self.inner.mode)
            .field("schema_hash", &self.schema_hash())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// A client with default settings on top of `hooks`.
    pub fn new<H: EngineHooks + 'static>(hooks: H) -> Result<Self> {
        ClientBuilder::new().hooks(hooks).build()
    }

    pub(crate) fn from_parts(parts: ClientParts) -> Self {
        let mut ctx = ModifyCtx::new(parts.modify_size, parts.max_modify_size);
        ctx.set_compress_threshold(parts.compress_threshold);
        ctx.set_clock(parts.clock);
        Self {
            inner: Arc::new(Inner {
                hooks: parts.hooks,
                mode: parts.mode,
                default_locale: parts.default_locale,
                schema: RwLock::new(None),
                writer: Mutex::new(WriteState {
                    ctx,
                    last_id: HashMap::new(),
                    pending: Vec::new(),
                    report: FlushReport::default(),
                }),
                subs: subscribe::Registry::default(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    /// Compiles `def` against the installed layout, hands the packed
    /// descriptor to the engine and installs it. Returns the engine's hash.
    ///
    /// Buffered writes are flushed first: they were encoded with the old
    /// layout.
    pub fn set_schema(&self, def: &SchemaDef) -> Result<u64> {
        self.drain_silently()?;
        let previous = self.schema();
        let layout = SchemaLayout::compile(def, previous.as_deref()).wrap_err("failed to compile schema")?;
        let engine_hash = self
            .inner
            .hooks
            .set_schema(layout.descriptor())
            .wrap_err("engine rejected the schema")?;

        let default_slot = match &self.inner.default_locale {
            Some(name) => layout
                .locale_slot(name)
                .ok_or_else(|| SchemaError::UnknownLocale(name.clone()))?,
            None => 1,
        };
        {
            let mut state = self.inner.writer.lock();
            state.ctx.set_locales(layout.locales());
            state.ctx.set_default_locale(default_slot);
        }
        debug!(
            types = layout.types().len(),
            hash = layout.hash(),
            engine_hash,
            "installed schema"
        );
        *self.inner.schema.write() = Some(Installed {
            layout: Arc::new(layout),
            engine_hash,
        });
        Ok(engine_hash)
    }

    /// The installed layout, if any.
    pub fn schema(&self) -> Option<Arc<SchemaLayout>> {
        self.inner.schema.read().as_ref().map(|s| s.layout.clone())
    }

    /// The hash the engine returned for the installed schema.
    pub fn schema_hash(&self) -> Option<u64> {
        self.inner.schema.read().as_ref().map(|s| s.engine_hash)
    }

    fn layout(&self) -> Result<Arc<SchemaLayout>> {
        self.schema().ok_or_else(|| CodecError::NoSchema.into())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Buffers a new record. The returned id is provisional until flushed.
    pub fn create(&self, type_name: &str, payload: impl Into<Value>) -> Result<WriteOutcome> {
        let payload = payload.into();
        let schema = self.layout()?;
        let layout = schema.type_layout(type_name)?;
        let mode = self.inner.mode;
        let mut state = self.inner.writer.lock();
        self.write_record(&mut state, layout, None, |ctx, id| {
            encode_create(ctx, layout, id, &payload, mode)
        })
    }

    /// Buffers a partial update of record `id`.
    pub fn update(&self, type_name: &str, id: u32, payload: impl Into<Value>) -> Result<WriteOutcome> {
        let payload = payload.into();
        let schema = self.layout()?;
        let layout = schema.type_layout(type_name)?;
        eyre::ensure!(id > 0, "record ids start at 1");
        let mode = self.inner.mode;
        let mut state = self.inner.writer.lock();
        self.write_record(&mut state, layout, Some(id), |ctx, id| {
            encode_update(ctx, layout, id, &payload, mode)
        })
    }

    pub fn delete(&self, type_name: &str, id: u32) -> Result<WriteOutcome> {
        let schema = self.layout()?;
        let layout = schema.type_layout(type_name)?;
        eyre::ensure!(id > 0, "record ids start at 1");
        let mut state = self.inner.writer.lock();
        self.write_record(&mut state, layout, Some(id), |ctx, id| Ok(encode_delete(ctx, layout, id)))
    }

    /// Encodes one record, flushing the batch once if the buffer is full.
    ///
    /// `target` is the id of an existing record; creates pass `None` and get
    /// a fresh provisional id per attempt.
    fn write_record(
        &self,
        state: &mut WriteState,
        layout: &TypeLayout,
        target: Option<u32>,
        encode: impl Fn(&mut ModifyCtx, u32) -> Result<RecordOutcome, SchemaError>,
    ) -> Result<WriteOutcome> {
        let mut flushed = false;
        loop {
            let id = target.unwrap_or_else(|| state.next_id(layout.id));
            let outcome = match encode(&mut state.ctx, id) {
                Ok(outcome) => outcome,
                Err(err) => {
                    if target.is_none() {
                        state.release_id(layout.id, id);
                    }
                    return Err(err).wrap_err_with(|| format!("failed to encode '{}' record", layout.name));
                }
            };
            match outcome {
                RecordOutcome::Written(skipped) => {
                    if target.is_none() {
                        state.pending.push((layout.id, id));
                    }
                    state.report.errors.extend(skipped);
                    return Ok(WriteOutcome::Queued(id));
                }
                RecordOutcome::Rejected(errors) => {
                    if target.is_none() {
                        state.release_id(layout.id, id);
                    }
                    warn!(type_name = %layout.name, errors = errors.len(), "record rejected");
                    state.report.errors.extend(errors.iter().cloned());
                    return Ok(WriteOutcome::Rejected(errors));
                }
                RecordOutcome::Full => {
                    if target.is_none() {
                        state.release_id(layout.id, id);
                    }
                    if flushed || state.ctx.is_empty() {
                        return Err(CodecError::OutOfSpace {
                            needed: state.ctx.needed(),
                            max: state.ctx.max_capacity(),
                        }
                        .into());
                    }
                    debug!(type_name = %layout.name, "mutation buffer full, flushing");
                    self.flush_locked(state)?;
                    flushed = true;
                }
            }
        }
    }

    /// Sends the buffered batch to the engine and resolves provisional ids.
    fn flush_locked(&self, state: &mut WriteState) -> Result<()> {
        if state.ctx.is_empty() {
            return Ok(());
        }
        let records = state.ctx.records();
        let batch = state.ctx.take();
        match self.inner.hooks.flush_modify(&batch) {
            Ok(offsets) => {
                let offsets = offsets.unwrap_or_default();
                let pending = std::mem::take(&mut state.pending);
                for (type_id, provisional) in pending {
                    let id = offsets.resolve(type_id, provisional);
                    let last = state.last_id.entry(type_id).or_insert(0);
                    *last = (*last).max(id);
                    state.report.resolved.push(ResolvedId {
                        type_id,
                        provisional,
                        id,
                    });
                }
                state.report.flushes += 1;
                debug!(bytes = batch.len(), records, "flushed mutation batch");
                Ok(())
            }
            Err(err) => {
                let pending = std::mem::take(&mut state.pending);
                for (type_id, provisional) in pending {
                    let last = state.last_id.entry(type_id).or_insert(0);
                    *last = (*last).min(provisional - 1);
                }
                Err(err).wrap_err_with(|| format!("failed to flush {records} records"))
            }
        }
    }

    /// Flushes buffered writes and returns everything resolved since the
    /// previous report.
    pub fn drain(&self) -> Result<FlushReport> {
        let mut state = self.inner.writer.lock();
        self.flush_locked(&mut state)?;
        Ok(std::mem::take(&mut state.report))
    }

    /// Flushes buffered writes, keeping the report for the next `drain`.
    fn drain_silently(&self) -> Result<()> {
        let mut state = self.inner.writer.lock();
        self.flush_locked(&mut state)
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.inner.writer.lock().ctx.len()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Starts a query on `type_name`.
    pub fn query(&self, type_name: impl Into<String>) -> Query<'_> {
        Query::new(self, QueryDef::new(type_name))
    }

    pub fn compile(&self, def: &QueryDef) -> Result<CompiledQuery> {
        let schema = self.layout()?;
        compile(def, &schema)
    }

    /// Drains, runs `def` and returns its lazily decoded result.
    pub fn get(&self, def: &QueryDef) -> Result<QueryResult> {
        let compiled = self.compile(def)?;
        self.drain_silently()?;
        let bytes = self
            .inner
            .hooks
            .get_query_buf(&compiled.bytes)
            .wrap_err_with(|| format!("query on '{}' failed", def.type_name()))?;
        let result = QueryResult::new(compiled.reader, bytes)
            .wrap_err_with(|| format!("failed to decode result of query on '{}'", def.type_name()))?;
        Ok(result)
    }

    /// Registers `on_data` for results of `def`. Identical queries share one
    /// engine subscription; it ends when the last handle is dropped.
    pub fn subscribe(
        &self,
        def: &QueryDef,
        on_data: impl Fn(&QueryResult) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle> {
        let compiled = self.compile(def)?;
        self.drain_silently()?;
        subscribe::subscribe(&self.inner, compiled, Arc::new(on_data))
    }

    /// Distinct queries with a live engine subscription.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.subs.len()
    }
}
