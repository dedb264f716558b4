// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Host-side value model for module exports.

use crate::namespace::Namespace;
use crate::plugin::LoaderPlugin;
use bytes::Bytes;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A value exported by a module.
///
/// Values are thread-safe and cheap to clone; objects and functions are
/// shared by reference.
#[derive(Clone, Default)]
pub enum Value {
    /// undefined
    #[default]
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Shared mutable object
    Object(Object),
    /// A module namespace
    Namespace(Namespace),
    /// Callable host function
    Function(Function),
    /// Binary data
    Bytes(Bytes),
    /// A loader plugin exported by a plugin module
    Plugin(Arc<dyn LoaderPlugin>),
    /// Opaque host value
    Native(Arc<dyn Any + Send + Sync>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            // NaN never equals itself
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Namespace(a), Value::Namespace(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Plugin(a), Value::Plugin(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    /// Returns true if this value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns true if this value is nullish (null or undefined).
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Converts the value to a boolean (ToBoolean).
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => !n.is_nan() && *n != 0.0,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Returns the type of this value as a string.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            Value::Null
            | Value::Object(_)
            | Value::Namespace(_)
            | Value::Bytes(_)
            | Value::Plugin(_)
            | Value::Native(_) => "object",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
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

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_namespace(&self) -> Option<&Namespace> {
        match self {
            Value::Namespace(ns) => Some(ns),
            _ => None,
        }
    }

    /// The single probe for "is this export a loader plugin".
    pub fn as_plugin(&self) -> Option<Arc<dyn LoaderPlugin>> {
        match self {
            Value::Plugin(plugin) => Some(plugin.clone()),
            Value::Namespace(ns) => ns.default_export().and_then(|value| value.as_plugin()),
            _ => None,
        }
    }

    /// Read a property of an object or namespace.
    pub fn get(&self, name: &str) -> Option<Value> {
        match self {
            Value::Object(o) => o.get(name),
            Value::Namespace(ns) => ns.get(name),
            _ => None,
        }
    }

    /// Read a dotted member expression (`a.b.c`) through nested objects.
    ///
    /// Missing members read as `Undefined`.
    pub fn member(&self, path: &str) -> Value {
        path.split('.')
            .filter(|part| !part.is_empty())
            .try_fold(self.clone(), |value, part| value.get(part))
            .unwrap_or_default()
    }

    /// Call a function value.
    pub fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        match self {
            Value::Function(f) => f.call(args),
            other => anyhow::bail!("{} is not a function", other.type_of()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(o) => fmt::Debug::fmt(o, f),
            Value::Namespace(ns) => fmt::Debug::fmt(ns, f),
            other => write!(f, "{other}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Object(o) => {
                write!(f, "{{")?;
                for (i, (key, value)) in o.entries().iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    match value {
                        Value::Object(_) => write!(f, "{sep}{key}: [Object]")?,
                        Value::String(s) => write!(f, "{sep}{key}: {s:?}")?,
                        other => write!(f, "{sep}{key}: {other}")?,
                    }
                }
                if o.is_empty() { write!(f, "}}") } else { write!(f, " }}") }
            }
            Value::Namespace(ns) => write!(f, "[Module: {}]", ns.keys().join(", ")),
            Value::Function(_) => write!(f, "[Function]"),
            Value::Bytes(b) => write!(f, "<Bytes {} bytes>", b.len()),
            Value::Plugin(_) => write!(f, "[Plugin]"),
            Value::Native(_) => write!(f, "[Native]"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Namespace> for Value {
    fn from(ns: Namespace) -> Self {
        Value::Namespace(ns)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Arc<dyn LoaderPlugin>> for Value {
    fn from(plugin: Arc<dyn LoaderPlugin>) -> Self {
        Value::Plugin(plugin)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Object(Object::from_entries(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| (i.to_string(), Value::from(item))),
            )),
            serde_json::Value::Object(map) => Value::Object(Object::from_entries(
                map.into_iter().map(|(k, v)| (k, Value::from(v))),
            )),
        }
    }
}

/// A shared, mutable, identity-compared object.
#[derive(Clone, Default)]
pub struct Object {
    props: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let props = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            props: Arc::new(RwLock::new(props)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.props.read().get(key).cloned()
    }

    /// Set a property, returning the previous value
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.props.write().insert(key.into(), value.into())
    }

    pub fn has(&self, key: &str) -> bool {
        self.props.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.props.write().remove(key)
    }

    /// Property names in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.props.read().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.props
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.props.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.read().is_empty()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.props, &other.props)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow: nested objects may be cyclic
        f.debug_set().entries(self.keys()).finish()
    }
}

type NativeFn = dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync;

/// A callable host function.
#[derive(Clone)]
pub struct Function(Arc<NativeFn>);

impl Function {
    pub fn new(f: impl Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[Function]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());
        assert!(!Value::from("").to_boolean());
        assert!(Value::from("0").to_boolean());
        assert!(Value::Object(Object::new()).to_boolean());
    }

    #[test]
    fn test_object_identity() {
        let a = Object::new();
        let b = Object::new();
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
    }

    #[test]
    fn test_member_expression() {
        let inner = Object::from_entries([("c", Value::from(3))]);
        let outer = Object::from_entries([("b", Value::from(inner))]);
        let root = Value::from(Object::from_entries([("a", Value::from(outer))]));

        assert_eq!(root.member("a.b.c"), Value::Number(3.0));
        assert!(root.member("a.x.c").is_undefined());
    }

    #[test]
    fn test_function_call() {
        let double = Value::from(Function::new(|args| {
            let n = args.first().and_then(Value::as_number).unwrap_or_default();
            Ok(Value::Number(n * 2.0))
        }));
        assert_eq!(double.call(&[Value::from(4)]).unwrap(), Value::Number(8.0));
        assert!(Value::Null.call(&[]).is_err());
    }

    #[test]
    fn test_json_conversion() {
        let value = Value::from(serde_json::json!({ "browser": false, "n": 2 }));
        assert_eq!(value.get("browser"), Some(Value::Boolean(false)));
        assert_eq!(value.get("n"), Some(Value::Number(2.0)));
    }
}
