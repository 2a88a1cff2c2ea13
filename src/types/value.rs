//! # Values
//!
//! `Value` is the owned, closed value model shared by the write path (create
//! and update payloads) and the read path (decoded results). Objects use a
//! `BTreeMap` so that walking a payload is deterministic: two equal payloads
//! always encode to the same bytes.
//!
//! Reference operations are plain values as well:
//!
//! ```ignore
//! Value::refs_add([4, 5])             // {"add": [4, 5]}
//! Value::refs_add_at([9], 0)          // {"add": [{"id": 9, "$index": 0}]}
//! Value::edge(7, [("$role", "owner")])  // {"id": 7, "$role": "owner"}
//! Value::increment(3)                 // {"increment": 3}
//! ```

use std::collections::BTreeMap;

use super::TypedVector;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    String(String),
    Binary(Vec<u8>),
    Vector(TypedVector),
    Json(serde_json::Value),
    /// Locale name to string.
    Text(BTreeMap<String, String>),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn object<K, V, I>(entries: I) -> Value
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn list<V: Into<Value>, I: IntoIterator<Item = V>>(items: I) -> Value {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn text<K, V, I>(entries: I) -> Value
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Text(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn reference(id: u32) -> Value {
        Value::Int(id as i64)
    }

    /// A reference element carrying edge properties.
    pub fn edge<K, V, I>(id: u32, props: I) -> Value
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut map: BTreeMap<String, Value> = props
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        map.insert("id".to_string(), Value::reference(id));
        Value::Object(map)
    }

    pub fn refs_add<I: IntoIterator<Item = u32>>(ids: I) -> Value {
        Value::object([("add", Value::list(ids.into_iter().map(Value::reference)))])
    }

    pub fn refs_delete<I: IntoIterator<Item = u32>>(ids: I) -> Value {
        Value::object([("delete", Value::list(ids.into_iter().map(Value::reference)))])
    }

    /// Adds (or moves) `ids` so that they start at position `index`.
    pub fn refs_add_at<I: IntoIterator<Item = u32>>(ids: I, index: i32) -> Value {
        let items = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                Value::object([
                    ("id", Value::reference(id)),
                    ("$index", Value::Int(index as i64 + i as i64)),
                ])
            })
            .collect();
        Value::object([("add", Value::List(items))])
    }

    pub fn increment(by: impl Into<Value>) -> Value {
        Value::object([("increment", by.into())])
    }

    pub fn decrement(by: impl Into<Value>) -> Value {
        Value::object([("decrement", by.into())])
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) | Value::Timestamp(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) | Value::Timestamp(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Object member lookup; `None` for non-objects and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|m| m.get(key))
    }

    /// Follows a dotted path through nested objects.
    pub fn pointer(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |v, key| v.get(key))
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Lossy conversion used for logging and for the json codec.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(v) | Value::Timestamp(v) => J::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v).map_or(J::Null, J::Number),
            Value::String(s) => J::String(s.clone()),
            Value::Binary(b) => J::Array(b.iter().map(|&x| J::from(x)).collect()),
            Value::Vector(v) => J::Array(
                v.to_f64()
                    .into_iter()
                    .map(|x| serde_json::Number::from_f64(x).map_or(J::Null, J::Number))
                    .collect(),
            ),
            Value::Json(j) => j.clone(),
            Value::Text(map) => J::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), J::String(v.clone())))
                    .collect(),
            ),
            Value::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => {
                J::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(v as i64)
                }
            }
        )*
    };
}

from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<TypedVector> for Value {
    fn from(v: TypedVector) -> Self {
        Value::Vector(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_builder_orders_keys() {
        let v = Value::object([("b", 1), ("a", 2)]);
        let keys: Vec<_> = v.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn pointer_walks_nested_objects() {
        let v = Value::object([("address", Value::object([("city", "Oslo")]))]);
        assert_eq!(v.pointer("address.city"), Some(&Value::from("Oslo")));
        assert_eq!(v.pointer("address.zip"), None);
    }

    #[test]
    fn refs_add_at_numbers_consecutive_positions() {
        let v = Value::refs_add_at([7, 8], 2);
        let items = v.get("add").and_then(Value::as_list).unwrap();
        assert_eq!(items[0].get("$index"), Some(&Value::Int(2)));
        assert_eq!(items[1].get("$index"), Some(&Value::Int(3)));
        assert_eq!(items[1].get("id"), Some(&Value::Int(8)));
    }

    #[test]
    fn from_json_prefers_integers() {
        let json: serde_json::Value = serde_json::json!({"a": 1, "b": 1.5, "c": [true, null]});
        let v = Value::from_json(&json);
        assert_eq!(v.get("a"), Some(&Value::Int(1)));
        assert_eq!(v.get("b"), Some(&Value::Float(1.5)));
        assert_eq!(
            v.get("c"),
            Some(&Value::List(vec![Value::Bool(true), Value::Null]))
        );
    }

    #[test]
    fn as_i64_accepts_integral_floats_only() {
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::from("3").as_i64(), None);
    }
}
