//! # Schema Definitions
//!
//! The logical input of the layout compiler. A `SchemaDef` is a list of
//! locales and a list of record types; each `TypeDef` is an ordered list of
//! properties. Property order matters: it is the depth-first traversal order
//! that decides fresh field numbers.
//!
//! Definitions load from JSON through serde:
//!
//! ```json
//! {
//!   "locales": ["en", "de"],
//!   "types": [
//!     { "name": "user", "props": [
//!         { "name": "name", "type": "string", "maxBytes": 40 },
//!         { "name": "bio", "type": "text" },
//!         { "name": "friends", "type": "references", "target": "user", "inverse": "friends" }
//!     ]}
//!   ]
//! }
//! ```
//!
//! Validation predicates and field hooks are closures and only exist on
//! definitions built in code.

use std::fmt;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::types::{TypeTag, Value, VectorBase};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDef {
    #[serde(default)]
    pub locales: Vec<String>,
    #[serde(default)]
    pub types: Vec<TypeDef>,
}

impl SchemaDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).wrap_err("failed to parse schema definition")
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locales.push(locale.into());
        self
    }

    pub fn with_type(mut self, def: TypeDef) -> Self {
        self.types.push(def);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    #[serde(default)]
    pub props: Vec<PropDef>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            props: Vec::new(),
        }
    }

    pub fn prop(mut self, prop: PropDef) -> Self {
        self.props.push(prop);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Deflate,
    None,
}

/// When a timestamp field is stamped automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampHook {
    /// Stamped once, when the record is created.
    Create,
    /// Stamped on create and on every update.
    Update,
}

/// Custom validation run before a field is encoded.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>);

impl Predicate {
    pub fn new(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    #[inline]
    pub fn check(&self, value: &Value) -> bool {
        (self.0)(value)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// Rewrites a field value before encoding. Receives the payload value (if
/// any) and returns the value to write, or `None` to leave the field alone.
#[derive(Clone)]
pub struct FieldHook(Arc<dyn Fn(Option<&Value>) -> Option<Value> + Send + Sync>);

impl FieldHook {
    pub fn new(f: impl Fn(Option<&Value>) -> Option<Value> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    #[inline]
    pub fn apply(&self, value: Option<&Value>) -> Option<Value> {
        (self.0)(value)
    }
}

impl fmt::Debug for FieldHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldHook(..)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TypeTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u16>,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Enum members, in index order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    /// Element count for vectors, byte count for micro-buffers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<VectorBase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
    /// Edge properties of a reference; every name starts with `$`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<PropDef>,
    /// Children of an object property.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub props: Vec<PropDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<TimestampHook>,
    #[serde(skip)]
    pub validation: Option<Predicate>,
    #[serde(skip)]
    pub hook: Option<FieldHook>,
}

impl PropDef {
    pub fn new(name: impl Into<String>, kind: TypeTag) -> Self {
        Self {
            name: name.into(),
            kind,
            max_bytes: None,
            compression: Compression::Deflate,
            default: None,
            min: None,
            max: None,
            values: Vec::new(),
            size: None,
            base: None,
            target: None,
            inverse: None,
            edges: Vec::new(),
            props: Vec::new(),
            on: None,
            validation: None,
            hook: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, TypeTag::String)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, TypeTag::Text)
    }

    pub fn alias(name: impl Into<String>) -> Self {
        Self::new(name, TypeTag::Alias)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, TypeTag::Number)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, TypeTag::Timestamp)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, TypeTag::Boolean)
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, TypeTag::Binary)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, TypeTag::Json)
    }

    pub fn cardinality(name: impl Into<String>) -> Self {
        Self::new(name, TypeTag::Cardinality)
    }

    pub fn enumeration<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        let mut p = Self::new(name, TypeTag::Enum);
        p.values = values.into_iter().map(Into::into).collect();
        p
    }

    pub fn vector(name: impl Into<String>, size: u16, base: VectorBase) -> Self {
        let mut p = Self::new(name, TypeTag::Vector);
        p.size = Some(size);
        p.base = Some(base);
        p
    }

    pub fn colvec(name: impl Into<String>, size: u16, base: VectorBase) -> Self {
        let mut p = Self::vector(name, size, base);
        p.kind = TypeTag::Colvec;
        p
    }

    pub fn micro_buffer(name: impl Into<String>, size: u16) -> Self {
        let mut p = Self::new(name, TypeTag::MicroBuffer);
        p.size = Some(size);
        p
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut p = Self::new(name, TypeTag::Reference);
        p.target = Some(target.into());
        p
    }

    pub fn references(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut p = Self::new(name, TypeTag::References);
        p.target = Some(target.into());
        p
    }

    pub fn object(name: impl Into<String>, props: impl IntoIterator<Item = PropDef>) -> Self {
        let mut p = Self::new(name, TypeTag::Object);
        p.props = props.into_iter().collect();
        p
    }

    pub fn max_bytes(mut self, n: u16) -> Self {
        self.max_bytes = Some(n);
        self
    }

    pub fn uncompressed(mut self) -> Self {
        self.compression = Compression::None;
        self
    }

    pub fn default_value(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    pub fn edge(mut self, prop: PropDef) -> Self {
        self.edges.push(prop);
        self
    }

    pub fn on(mut self, hook: TimestampHook) -> Self {
        self.on = Some(hook);
        self
    }

    pub fn validate(mut self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.validation = Some(Predicate::new(f));
        self
    }

    pub fn hook(
        mut self,
        f: impl Fn(Option<&Value>) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.hook = Some(FieldHook::new(f));
        self
    }
}
