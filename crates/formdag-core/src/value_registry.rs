//! Value-type registry: maps stored type tags to value constructors.
//!
//! Stored instances carry answers as `(type tag, text)` pairs. Whoever
//! restores them passes a registry explicitly; there is no process-wide
//! table of known types.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::CoreError;
use crate::value::{DataType, Value};

/// Builds a value from its stored text.
pub type ValueConstructor = fn(&str) -> Result<Value, CoreError>;

/// Registry of answer value types, keyed by tag.
#[derive(Clone, Default)]
pub struct ValueTypeRegistry {
    constructors: BTreeMap<String, ValueConstructor>,
}

impl ValueTypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry knowing every built-in [`DataType`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DataType::Unspecified.tag(), |s| {
            Value::parse(DataType::Unspecified, s)
        });
        registry.register(DataType::Text.tag(), |s| Value::parse(DataType::Text, s));
        registry.register(DataType::Int.tag(), |s| Value::parse(DataType::Int, s));
        registry.register(DataType::Decimal.tag(), |s| Value::parse(DataType::Decimal, s));
        registry.register(DataType::Boolean.tag(), |s| Value::parse(DataType::Boolean, s));
        registry.register(DataType::Date.tag(), |s| Value::parse(DataType::Date, s));
        registry.register(DataType::Time.tag(), |s| Value::parse(DataType::Time, s));
        registry.register(DataType::DateTime.tag(), |s| Value::parse(DataType::DateTime, s));
        registry
    }

    /// Register (or replace) the constructor for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, constructor: ValueConstructor) {
        self.constructors.insert(tag.into(), constructor);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Rebuild a value from its tag and stored text.
    pub fn construct(&self, tag: &str, text: &str) -> Result<Value, CoreError> {
        let constructor = self
            .constructors
            .get(tag)
            .ok_or_else(|| CoreError::UnknownValueType(tag.to_string()))?;
        constructor(text)
    }
}

impl fmt::Debug for ValueTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueTypeRegistry")
            .field("tags", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
