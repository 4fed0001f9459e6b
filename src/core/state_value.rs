//! State values: the serializable shape of an active configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The active configuration of a machine, as nested keys.
///
/// A compound state whose active child is atomic contributes the child key;
/// parallel states contribute one entry per region.
///
/// # Example
///
/// ```rust
/// use statecraft::core::StateValue;
///
/// let value: StateValue = serde_json::from_str(r#"{"door": "open", "light": "on"}"#).unwrap();
///
/// assert!(value.matches(&StateValue::from("door.open")));
/// assert!(value.matches(&StateValue::from("light")));
/// assert!(!value.matches(&StateValue::from("door.closed")));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Leaf(String),
    Branch(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Build a value from a path of keys: `["a", "b"]` becomes `{"a": "b"}`.
    pub fn from_path<S: AsRef<str>>(path: &[S]) -> Self {
        match path {
            [] => Self::Branch(BTreeMap::new()),
            [leaf] => Self::Leaf(leaf.as_ref().to_string()),
            [head, rest @ ..] => {
                let mut map = BTreeMap::new();
                map.insert(head.as_ref().to_string(), Self::from_path(rest));
                Self::Branch(map)
            }
        }
    }

    /// Whether this value is within the configuration described by `pattern`.
    pub fn matches(&self, pattern: &StateValue) -> bool {
        match (pattern, self) {
            (Self::Leaf(expected), Self::Leaf(actual)) => expected == actual,
            (Self::Leaf(expected), Self::Branch(actual)) => actual.contains_key(expected),
            (Self::Branch(_), Self::Leaf(_)) => false,
            (Self::Branch(expected), Self::Branch(actual)) => {
                expected.iter().all(|(key, sub)| {
                    actual
                        .get(key)
                        .is_some_and(|actual_sub| actual_sub.matches(sub))
                })
            }
        }
    }

    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            Self::Leaf(key) => Some(key),
            Self::Branch(_) => None,
        }
    }
}

impl From<&str> for StateValue {
    /// Parses a dotted path such as `"door.open"`.
    fn from(path: &str) -> Self {
        let keys: Vec<&str> = path.split('.').filter(|key| !key.is_empty()).collect();
        Self::from_path(&keys)
    }
}

impl From<String> for StateValue {
    fn from(path: String) -> Self {
        Self::from(path.as_str())
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}
