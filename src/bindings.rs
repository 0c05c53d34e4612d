//! Variables handed to template scripts

use crate::error::Result;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// Name that can never be bound, it belongs to the engine configuration
pub const RESERVED_KEY: &str = "__config";

/// Insertion-ordered name/value bindings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: IndexMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind one name, returns false for the reserved key
    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<Value>) -> bool {
        let name = name.into();
        if name == RESERVED_KEY {
            log::debug!("Ignoring assignment to reserved name {}", RESERVED_KEY);
            return false;
        }
        self.values.insert(name, value.into());
        true
    }

    /// Merge name/value pairs, silently skipping the reserved key
    pub fn assign_map<I, K, V>(&mut self, pairs: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in pairs {
            self.assign(name, value);
        }
        true
    }

    /// Merge the public fields of a serializable value
    ///
    /// Returns `Ok(false)` when the value does not serialize to an object.
    pub fn assign_from<T: Serialize + ?Sized>(&mut self, source: &T) -> Result<bool> {
        match serde_json::to_value(source)? {
            Value::Object(fields) => Ok(self.assign_map(fields)),
            _ => Ok(false),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.shift_remove(name)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All bindings as one JSON object
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
