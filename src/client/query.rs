//! Fluent queries bound to a client.
//!
//! `Query` wraps a [`QueryDef`] and forwards every builder method to it, so
//! `client.query("user").filter(..).get()` reads the same as building the
//! definition by hand and passing it to [`Client::get`].

use eyre::Result;

use super::{Client, SubscriptionHandle};
use crate::decode::QueryResult;
use crate::query::{CompiledQuery, Filter, IncludeOpts, Operator, Order, QueryDef, VectorFn};
use crate::types::Value;

/// Generates `fn name(self, args) -> Self` forwarding to `QueryDef::name`.
macro_rules! forward {
    ($($(#[$doc:meta])* $name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            $(#[$doc])*
            pub fn $name(mut self, $($arg: $ty),*) -> Self {
                self.def = self.def.$name($($arg),*);
                self
            }
        )*
    };
}

#[derive(Debug, Clone)]
pub struct Query<'c> {
    client: &'c Client,
    def: QueryDef,
}

impl<'c> Query<'c> {
    pub(crate) fn new(client: &'c Client, def: QueryDef) -> Self {
        Self { client, def }
    }

    forward! {
        id(id: u32);
        ids(ids: impl IntoIterator<Item = u32>);
        alias(field: impl Into<String>, value: impl Into<String>);
        filter(field: impl Into<String>, op: Operator, value: impl Into<Value>);
        exists(field: impl Into<String>);
        or(f: impl FnOnce(Filter) -> Filter);
        any(f: impl FnOnce(Filter) -> Filter);
        sort(field: impl Into<String>, order: Order);
        sort_locale(field: impl Into<String>, order: Order, locale: impl Into<String>);
        range(offset: u32, limit: u32);
        include(fields: impl IntoIterator<Item = impl Into<String>>);
        include_with(field: impl Into<String>, opts: IncludeOpts);
        include_locale(field: impl Into<String>, locale: impl Into<String>);
        include_ref(field: impl Into<String>, f: impl FnOnce(QueryDef) -> QueryDef);
        locale(locale: impl Into<String>);
        count();
        sum(fields: impl IntoIterator<Item = impl Into<String>>);
        avg(fields: impl IntoIterator<Item = impl Into<String>>);
        min(fields: impl IntoIterator<Item = impl Into<String>>);
        max(fields: impl IntoIterator<Item = impl Into<String>>);
        stddev(fields: impl IntoIterator<Item = impl Into<String>>);
        var(fields: impl IntoIterator<Item = impl Into<String>>);
        group_by(field: impl Into<String>);
        search_text(query: impl Into<String>, fields: impl IntoIterator<Item = (impl Into<String>, u8)>);
        search_vector(field: impl Into<String>, vector: impl Into<Vec<f32>>, func: VectorFn, threshold: f64);
    }

    pub fn def(&self) -> &QueryDef {
        &self.def
    }

    pub fn into_def(self) -> QueryDef {
        self.def
    }

    pub fn compile(&self) -> Result<CompiledQuery> {
        self.client.compile(&self.def)
    }

    /// Drains buffered writes, runs the query and returns the lazy result.
    pub fn get(&self) -> Result<QueryResult> {
        self.client.get(&self.def)
    }

    pub fn subscribe(&self, on_data: impl Fn(&QueryResult) + Send + Sync + 'static) -> Result<SubscriptionHandle> {
        self.client.subscribe(&self.def, on_data)
    }
}
