//! The tagged-union value tree.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::ser::{SerializeMap, SerializeSeq};

use crate::ValueError;

/// Native function signature callable from expressions.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, ValueError> + Send + Sync;

/// A value flowing between nodes.
///
/// Equality is deep and structural. [`Function`] and [`Capsule`] values
/// compare by identity of their shared allocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Function(Function),
    Capsule(Capsule),
}

impl Value {
    /// An empty object.
    pub fn object() -> Self {
        Value::Object(BTreeMap::new())
    }

    /// Builds an object from key/value pairs.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Capsule(_) => "capsule",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_capsule(&self) -> Option<&Capsule> {
        match self {
            Value::Capsule(c) => Some(c),
            _ => None,
        }
    }

    /// Looks up a key of an object value. Non-objects have no keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Looks up a required object field.
    pub fn field(&self, key: &str) -> Result<&Value, ValueError> {
        match self {
            Value::Object(map) => map.get(key).ok_or_else(|| ValueError::MissingKey {
                path: "arguments".to_string(),
                key: key.to_string(),
            }),
            other => Err(ValueError::type_mismatch(key, "object", other.type_name())),
        }
    }

    /// Looks up a required numeric field.
    pub fn number_field(&self, key: &str) -> Result<f64, ValueError> {
        let value = self.field(key)?;
        value
            .as_f64()
            .ok_or_else(|| ValueError::type_mismatch(key, "number", value.type_name()))
    }

    /// Looks up a required string field.
    pub fn str_field(&self, key: &str) -> Result<&str, ValueError> {
        let value = self.field(key)?;
        value
            .as_str()
            .ok_or_else(|| ValueError::type_mismatch(key, "string", value.type_name()))
    }

    /// Overlays `overlay` onto `self`.
    ///
    /// When both sides are objects the keys are merged one level deep with the
    /// overlay winning. Otherwise the overlay replaces the base entirely.
    #[must_use]
    pub fn merge(self, overlay: Value) -> Value {
        match (self, overlay) {
            (Value::Object(mut base), Value::Object(top)) => {
                base.extend(top);
                Value::Object(base)
            }
            (_, overlay) => overlay,
        }
    }

    /// Converts a JSON document into a value tree.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Renders the value as JSON, with functions and capsules as strings.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(f64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Number(v as f64)
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

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Object(v)
    }
}

impl From<Capsule> for Value {
    fn from(v: Capsule) -> Self {
        Value::Capsule(v)
    }
}

impl From<Function> for Value {
    fn from(v: Function) -> Self {
        Value::Function(v)
    }
}

impl serde::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            Value::Function(func) => serializer.collect_str(func),
            Value::Capsule(capsule) => serializer.collect_str(capsule),
        }
    }
}

// =============================================================================
// Function
// =============================================================================

/// A callable value.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    func: Arc<NativeFn>,
}

impl Function {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ValueError> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, ValueError> {
        (self.func)(args)
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

// =============================================================================
// Capsule
// =============================================================================

/// An opaque native value passed between components by reference.
///
/// Two capsules are equal only when they share the same allocation.
#[derive(Clone)]
pub struct Capsule {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Capsule {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            type_name: short_type_name(std::any::type_name::<T>()),
            inner: value,
        }
    }

    /// Short name of the wrapped type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the wrapped value if it has type `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

impl PartialEq for Capsule {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Capsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capsule({})", self.type_name)
    }
}

impl fmt::Display for Capsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<capsule {}>", self.type_name)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_equality() {
        let a = Value::from_json(json!({"x": [1, 2, {"y": "z"}]}));
        let b = Value::from_json(json!({"x": [1, 2, {"y": "z"}]}));
        let c = Value::from_json(json!({"x": [1, 2, {"y": "w"}]}));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_capsule_identity_equality() {
        let shared = Arc::new(42_u32);
        let a = Capsule::from_arc(Arc::clone(&shared));
        let b = Capsule::from_arc(shared);
        let c = Capsule::new(42_u32);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.downcast::<u32>().as_deref(), Some(&42));
        assert!(a.downcast::<String>().is_none());
    }

    #[test]
    fn test_serialize_special_values() {
        let func = Function::new("concat", |_| Ok(Value::Null));
        let value = Value::from_pairs([
            ("f", Value::Function(func)),
            ("c", Value::Capsule(Capsule::new(String::from("x")))),
            ("n", Value::Number(3.0)),
            ("r", Value::Number(0.5)),
        ]);
        assert_eq!(
            value.to_json(),
            json!({"f": "<function concat>", "c": "<capsule String>", "n": 3, "r": 0.5})
        );
    }

    #[test]
    fn test_merge_overlay_wins() {
        let base = Value::from_json(json!({"a": 1, "b": 2}));
        let top = Value::from_json(json!({"b": 3, "c": 4}));
        assert_eq!(base.merge(top), Value::from_json(json!({"a": 1, "b": 3, "c": 4})));
        assert_eq!(Value::Null.merge(Value::from(1)), Value::from(1));
    }

    #[test]
    fn test_typed_field_access() {
        let value = Value::from_json(json!({"n": 5, "s": "hi"}));
        assert_eq!(value.number_field("n"), Ok(5.0));
        assert_eq!(value.str_field("s"), Ok("hi"));
        assert!(matches!(
            value.number_field("s"),
            Err(ValueError::TypeMismatch { expected: "number", .. })
        ));
        assert!(matches!(value.field("missing"), Err(ValueError::MissingKey { .. })));
    }
}
