//! Dynamic host values.
//!
//! Everything the host hands to the bridge (trigger payloads, runtime
//! context, bindings) arrives as a [`HostValue`]. Property access follows
//! host semantics: reading a missing property, or a property of a
//! non-object, yields [`HostValue::Undefined`] instead of failing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::HostError;
use crate::headers::Headers;
use crate::promise::Promise;
use crate::stream::{ReadableStream, WritableStream};

static UNDEFINED: HostValue = HostValue::Undefined;

/// A host-native value.
#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Bytes),
    Array(Vec<HostValue>),
    Object(Object),
    Headers(Headers),
    Stream(ReadableStream),
    Writable(WritableStream),
    Promise(Promise),
    Function(HostFunction),
}

impl HostValue {
    /// Property lookup; `Undefined` for missing keys and non-objects.
    pub fn get(&self, key: &str) -> &HostValue {
        match self {
            HostValue::Object(object) => object.get(key),
            _ => &UNDEFINED,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            HostValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            HostValue::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_headers(&self) -> Option<&Headers> {
        match self {
            HostValue::Headers(headers) => Some(headers),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&ReadableStream> {
        match self {
            HostValue::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn as_writable(&self) -> Option<&WritableStream> {
        match self {
            HostValue::Writable(writable) => Some(writable),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            HostValue::Promise(promise) => Some(promise),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            HostValue::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Host-style type tag, used in decode error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Bytes(_) => "Uint8Array",
            HostValue::Array(_) => "Array",
            HostValue::Object(_) => "Object",
            HostValue::Headers(_) => "Headers",
            HostValue::Stream(_) => "ReadableStream",
            HostValue::Writable(_) => "WritableStream",
            HostValue::Promise(_) => "Promise",
            HostValue::Function(_) => "Function",
        }
    }

    /// Convert plain data back into JSON.
    ///
    /// Returns `None` for values with no JSON form (streams, functions, ...).
    /// Non-finite numbers become `null`, as the host's `JSON.stringify` does.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value as Json;
        Some(match self {
            HostValue::Undefined | HostValue::Null => Json::Null,
            HostValue::Bool(b) => Json::Bool(*b),
            HostValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            HostValue::String(s) => Json::String(s.clone()),
            HostValue::Array(items) => Json::Array(
                items
                    .iter()
                    .map(HostValue::to_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            HostValue::Object(object) => {
                let mut map = serde_json::Map::new();
                for (key, value) in object.iter() {
                    map.insert(key.clone(), value.to_json()?);
                }
                Json::Object(map)
            }
            _ => return None,
        })
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => f.write_str("undefined"),
            HostValue::Null => f.write_str("null"),
            HostValue::Bool(b) => write!(f, "{b}"),
            HostValue::Number(n) => write!(f, "{n}"),
            HostValue::String(s) => write!(f, "{s:?}"),
            HostValue::Bytes(b) => write!(f, "Uint8Array({})", b.len()),
            HostValue::Array(items) => f.debug_list().entries(items).finish(),
            HostValue::Object(object) => fmt::Debug::fmt(object, f),
            HostValue::Headers(headers) => fmt::Debug::fmt(headers, f),
            HostValue::Stream(_) => f.write_str("ReadableStream"),
            HostValue::Writable(_) => f.write_str("WritableStream"),
            HostValue::Promise(_) => f.write_str("Promise"),
            HostValue::Function(_) => f.write_str("Function"),
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<u16> for HostValue {
    fn from(n: u16) -> Self {
        HostValue::Number(f64::from(n))
    }
}

impl From<u32> for HostValue {
    fn from(n: u32) -> Self {
        HostValue::Number(f64::from(n))
    }
}

impl From<Bytes> for HostValue {
    fn from(b: Bytes) -> Self {
        HostValue::Bytes(b)
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(b: Vec<u8>) -> Self {
        HostValue::Bytes(Bytes::from(b))
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        HostValue::Array(items)
    }
}

impl From<Object> for HostValue {
    fn from(object: Object) -> Self {
        HostValue::Object(object)
    }
}

impl From<Headers> for HostValue {
    fn from(headers: Headers) -> Self {
        HostValue::Headers(headers)
    }
}

impl From<ReadableStream> for HostValue {
    fn from(stream: ReadableStream) -> Self {
        HostValue::Stream(stream)
    }
}

impl From<WritableStream> for HostValue {
    fn from(writable: WritableStream) -> Self {
        HostValue::Writable(writable)
    }
}

impl From<Promise> for HostValue {
    fn from(promise: Promise) -> Self {
        HostValue::Promise(promise)
    }
}

impl From<HostFunction> for HostValue {
    fn from(function: HostFunction) -> Self {
        HostValue::Function(function)
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => HostValue::Null,
            Json::Bool(b) => HostValue::Bool(b),
            Json::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => HostValue::String(s),
            Json::Array(items) => HostValue::Array(items.into_iter().map(Into::into).collect()),
            Json::Object(map) => HostValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, HostValue::from(value)))
                    .collect(),
            ),
        }
    }
}

/// A plain host object: string keys to host values.
#[derive(Clone, Default)]
pub struct Object {
    props: BTreeMap<String, HostValue>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style property set.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<HostValue>) {
        self.props.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> &HostValue {
        self.props.get(key).unwrap_or(&UNDEFINED)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.props.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.props.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HostValue)> {
        self.props.iter()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.props.iter()).finish()
    }
}

impl FromIterator<(String, HostValue)> for Object {
    fn from_iter<I: IntoIterator<Item = (String, HostValue)>>(iter: I) -> Self {
        Self {
            props: iter.into_iter().collect(),
        }
    }
}

type NativeFn = dyn Fn(Vec<HostValue>) -> Result<HostValue, HostError> + Send + Sync;

/// A callable host function.
///
/// A synchronous throw is modelled as `Err`; asynchronous failures are
/// returned as a rejected [`Promise`] value instead.
#[derive(Clone)]
pub struct HostFunction(Arc<NativeFn>);

impl HostFunction {
    pub fn new(
        f: impl Fn(Vec<HostValue>) -> Result<HostValue, HostError> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: Vec<HostValue>) -> Result<HostValue, HostError> {
        (self.0)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFunction")
    }
}
