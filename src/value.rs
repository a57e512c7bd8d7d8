//! Value marshalling between the scripting layer and the host.
//!
//! The scripting layer works with [`ScriptValue`], a dynamically-typed value
//! that can also carry opaque façade references. The host consumes
//! [`ConfigTree`], its typed tree format for configuration and payloads.
//! [`to_native`] and [`from_native`] convert between the two; conversion is
//! validated eagerly and round-trips losslessly for all supported
//! scalar/list/map shapes.

use crate::error::{CompletionError, MarshalError};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A scripting-facing resource wrapper (server, socket, client, ...).
///
/// Façades are passed to handlers as opaque [`ScriptValue::Facade`] values;
/// they are never marshallable into a [`ConfigTree`].
pub trait Facade: Send + Sync + 'static {
    /// Short kind tag for diagnostics ("net-server", "net-socket", ...)
    fn facade_kind(&self) -> &'static str;

    /// Downcast support for typed access from scripting glue
    fn as_any(&self) -> &dyn Any;
}

/// Shared reference to a façade object
#[derive(Clone)]
pub struct FacadeRef(Arc<dyn Facade>);

impl FacadeRef {
    /// Wrap a façade object
    pub fn new(facade: Arc<dyn Facade>) -> Self {
        Self(facade)
    }

    /// Kind tag of the wrapped façade
    pub fn kind(&self) -> &'static str {
        self.0.facade_kind()
    }

    /// Downcast to a concrete façade type
    pub fn downcast<T: Facade>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl std::fmt::Debug for FacadeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FacadeRef({})", self.kind())
    }
}

impl PartialEq for FacadeRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Scripting-layer dynamic value.
///
/// Integers and floats are distinct variants so that any `i64` survives a
/// round trip through the host exactly; floats keep IEEE-754 double
/// precision. Map keys are arbitrary values until marshalled, at which point
/// non-string keys are rejected.
#[derive(Debug, Clone)]
pub enum ScriptValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (lossless)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Str(String),
    /// Ordered list of values
    List(Vec<ScriptValue>),
    /// Key/value map (insertion-ordered; keys validated at marshal time)
    Map(Vec<(ScriptValue, ScriptValue)>),
    /// Opaque façade reference, never marshallable
    Facade(FacadeRef),
}

impl ScriptValue {
    /// Short kind tag for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Int(_) => "int",
            ScriptValue::Float(_) => "float",
            ScriptValue::Str(_) => "string",
            ScriptValue::List(_) => "list",
            ScriptValue::Map(_) => "map",
            ScriptValue::Facade(_) => "facade",
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, ScriptValue::Null)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ScriptValue::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get as list
    pub fn as_list(&self) -> Option<&[ScriptValue]> {
        match self {
            ScriptValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get as map entries
    pub fn as_map(&self) -> Option<&[(ScriptValue, ScriptValue)]> {
        match self {
            ScriptValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Get as façade reference
    pub fn as_facade(&self) -> Option<&FacadeRef> {
        match self {
            ScriptValue::Facade(facade) => Some(facade),
            _ => None,
        }
    }

    /// Look up a string key in a map value
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.as_map().and_then(|entries| {
            entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v)
        })
    }

    /// Build a map value from string-keyed entries
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<ScriptValue>,
    {
        ScriptValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (ScriptValue::Str(k.into()), v.into()))
                .collect(),
        )
    }

    /// Build an empty map value
    pub fn empty_map() -> Self {
        ScriptValue::Map(Vec::new())
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScriptValue::Null, ScriptValue::Null) => true,
            (ScriptValue::Bool(a), ScriptValue::Bool(b)) => a == b,
            (ScriptValue::Int(a), ScriptValue::Int(b)) => a == b,
            (ScriptValue::Float(a), ScriptValue::Float(b)) => a == b,
            (ScriptValue::Str(a), ScriptValue::Str(b)) => a == b,
            (ScriptValue::List(a), ScriptValue::List(b)) => a == b,
            // Map equality is membership, not entry order: the host does not
            // preserve key order across a round trip.
            (ScriptValue::Map(a), ScriptValue::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.iter().any(|(bk, bv)| bk == k && bv == v))
            }
            (ScriptValue::Facade(a), ScriptValue::Facade(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<i64> for ScriptValue {
    fn from(n: i64) -> Self {
        ScriptValue::Int(n)
    }
}

impl From<i32> for ScriptValue {
    fn from(n: i32) -> Self {
        ScriptValue::Int(n as i64)
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        ScriptValue::Float(n)
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::Str(s)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::Str(s.to_string())
    }
}

impl<T: Into<ScriptValue>> From<Vec<T>> for ScriptValue {
    fn from(v: Vec<T>) -> Self {
        ScriptValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl Default for ScriptValue {
    fn default() -> Self {
        ScriptValue::Null
    }
}

impl From<&CompletionError> for ScriptValue {
    fn from(err: &CompletionError) -> Self {
        ScriptValue::map([
            ("code", ScriptValue::Str(err.code.to_string())),
            ("message", ScriptValue::Str(err.message.clone())),
        ])
    }
}

/// The host's typed tree value format.
///
/// Immutable once constructed; configuration trees may be read concurrently
/// by multiple completion handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigTree {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Ordered array of values
    Array(Vec<ConfigTree>),
    /// String-keyed object (keys unique)
    Object(BTreeMap<String, ConfigTree>),
}

impl ConfigTree {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, ConfigTree::Null)
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&BTreeMap<String, ConfigTree>> {
        match self {
            ConfigTree::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&[ConfigTree]> {
        match self {
            ConfigTree::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigTree::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigTree::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Build an empty object
    pub fn empty_object() -> Self {
        ConfigTree::Object(BTreeMap::new())
    }
}

/// Convert a scripting-layer value into the host's typed tree format.
///
/// Map keys must be strings; a later duplicate key overwrites an earlier one,
/// matching scripting-layer map semantics. Façade references have no host
/// representation and are rejected.
pub fn to_native(value: &ScriptValue) -> Result<ConfigTree, MarshalError> {
    match value {
        ScriptValue::Null => Ok(ConfigTree::Null),
        ScriptValue::Bool(b) => Ok(ConfigTree::Bool(*b)),
        ScriptValue::Int(n) => Ok(ConfigTree::Int(*n)),
        ScriptValue::Float(n) => Ok(ConfigTree::Float(*n)),
        ScriptValue::Str(s) => Ok(ConfigTree::String(s.clone())),
        ScriptValue::List(items) => Ok(ConfigTree::Array(
            items.iter().map(to_native).collect::<Result<_, _>>()?,
        )),
        ScriptValue::Map(entries) => {
            let mut object = BTreeMap::new();
            for (key, val) in entries {
                let key = match key {
                    ScriptValue::Str(s) => s.clone(),
                    other => {
                        return Err(MarshalError::NonStringKey { kind: other.kind() });
                    }
                };
                object.insert(key, to_native(val)?);
            }
            Ok(ConfigTree::Object(object))
        }
        ScriptValue::Facade(_) => Err(MarshalError::Unsupported { kind: "facade" }),
    }
}

/// Convert a host tree value back into the scripting-layer representation.
///
/// Total: every tree shape has a scripting representation. Object key order
/// is not preserved, only membership.
pub fn from_native(tree: &ConfigTree) -> ScriptValue {
    match tree {
        ConfigTree::Null => ScriptValue::Null,
        ConfigTree::Bool(b) => ScriptValue::Bool(*b),
        ConfigTree::Int(n) => ScriptValue::Int(*n),
        ConfigTree::Float(n) => ScriptValue::Float(*n),
        ConfigTree::String(s) => ScriptValue::Str(s.clone()),
        ConfigTree::Array(items) => ScriptValue::List(items.iter().map(from_native).collect()),
        ConfigTree::Object(map) => ScriptValue::Map(
            map.iter()
                .map(|(k, v)| (ScriptValue::Str(k.clone()), from_native(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: ScriptValue) {
        let tree = to_native(&value).unwrap();
        assert_eq!(from_native(&tree), value);
    }

    #[test]
    fn test_scalar_roundtrip() {
        roundtrip(ScriptValue::Null);
        roundtrip(ScriptValue::Bool(true));
        roundtrip(ScriptValue::Int(0));
        roundtrip(ScriptValue::Int(i64::MAX));
        roundtrip(ScriptValue::Int(i64::MIN));
        roundtrip(ScriptValue::Float(3.141592653589793));
        roundtrip(ScriptValue::Str("hello".into()));
    }

    #[test]
    fn test_list_roundtrip_preserves_order() {
        roundtrip(ScriptValue::List(vec![
            ScriptValue::Int(3),
            ScriptValue::Int(1),
            ScriptValue::Int(2),
            ScriptValue::Str("x".into()),
        ]));
    }

    #[test]
    fn test_nested_map_roundtrip() {
        roundtrip(ScriptValue::map([
            ("b", ScriptValue::Int(2)),
            ("a", ScriptValue::map([("inner", ScriptValue::Bool(false))])),
            (
                "list",
                ScriptValue::List(vec![ScriptValue::Null, ScriptValue::Float(1.5)]),
            ),
        ]));
    }

    #[test]
    fn test_map_equality_ignores_order() {
        let a = ScriptValue::map([("x", 1i64), ("y", 2i64)]);
        let b = ScriptValue::map([("y", 2i64), ("x", 1i64)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_string_key_rejected() {
        let value = ScriptValue::Map(vec![(ScriptValue::Int(1), ScriptValue::Bool(true))]);
        let err = to_native(&value).unwrap_err();
        assert!(matches!(err, MarshalError::NonStringKey { kind: "int" }));
    }

    #[test]
    fn test_nested_non_string_key_rejected() {
        let value = ScriptValue::map([(
            "outer",
            ScriptValue::Map(vec![(ScriptValue::Null, ScriptValue::Null)]),
        )]);
        assert!(to_native(&value).is_err());
    }

    #[test]
    fn test_int_and_float_stay_distinct() {
        assert_eq!(to_native(&ScriptValue::Int(1)).unwrap(), ConfigTree::Int(1));
        assert_eq!(
            to_native(&ScriptValue::Float(1.0)).unwrap(),
            ConfigTree::Float(1.0)
        );
        assert_ne!(ScriptValue::Int(1), ScriptValue::Float(1.0));
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let value = ScriptValue::Map(vec![
            (ScriptValue::Str("k".into()), ScriptValue::Int(1)),
            (ScriptValue::Str("k".into()), ScriptValue::Int(2)),
        ]);
        let tree = to_native(&value).unwrap();
        assert_eq!(tree.as_object().unwrap()["k"], ConfigTree::Int(2));
    }

    #[test]
    fn test_empty_map_is_not_null() {
        let tree = to_native(&ScriptValue::empty_map()).unwrap();
        assert_eq!(tree, ConfigTree::empty_object());
        assert!(!tree.is_null());
    }

    #[test]
    fn test_completion_error_to_script_value() {
        let err = CompletionError::unit_not_found("mod-x");
        let value = ScriptValue::from(&err);
        assert_eq!(
            value.get("code").and_then(|v| v.as_str()),
            Some("UNIT_NOT_FOUND")
        );
        assert!(value
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap()
            .contains("mod-x"));
    }

    #[test]
    fn test_config_tree_serialization() {
        let tree = ConfigTree::Object(BTreeMap::from([
            ("port".to_string(), ConfigTree::Int(8080)),
            ("host".to_string(), ConfigTree::String("0.0.0.0".into())),
        ]));
        let json = serde_json::to_string(&tree).unwrap();
        assert!(json.contains("8080"));
        let parsed: ConfigTree = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tree);
    }
}
