//! Resolved package properties

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{MetadataError, Result};

/// Declaration of a single package property.
///
/// A property carries an optional default and may be marked required, in
/// which case resolution fails unless a non-null value is present after
/// applying overrides.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    /// Property name
    pub name: String,
    /// Default value, if any
    pub default: Option<Value>,
    /// Whether resolution must produce a non-null value
    pub required: bool,
}

impl PropertySpec {
    /// Declare a property with no default
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            required: false,
        }
    }

    /// Set the default value
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Mark the property as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Immutable resolved properties of a package.
///
/// Cloning is cheap; the underlying map is shared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    values: Arc<FxHashMap<String, Value>>,
}

impl Properties {
    /// Wrap an already-resolved value map
    pub fn new(values: FxHashMap<String, Value>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    /// An empty property set
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get a property value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Get a property as a string
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Get a property as a boolean
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Get a property as a signed integer
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    /// Get a property as a float
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    /// Whether the property is present
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Number of resolved properties
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no properties are resolved
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over all resolved properties
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// Merge declared property defaults with application overrides.
///
/// Overrides may only target declared properties. Every property marked
/// required must end up with a non-null value.
pub fn resolve_properties(
    package: &str,
    specs: &[PropertySpec],
    overrides: &FxHashMap<String, Value>,
) -> Result<Properties> {
    let mut values = FxHashMap::default();

    for spec in specs {
        if let Some(default) = &spec.default {
            values.insert(spec.name.clone(), default.clone());
        }
    }

    for (name, value) in overrides {
        if !specs.iter().any(|s| &s.name == name) {
            return Err(MetadataError::UnknownProperty {
                package: package.to_string(),
                property: name.clone(),
            });
        }
        values.insert(name.clone(), value.clone());
    }

    for spec in specs {
        let missing = match values.get(&spec.name) {
            None | Some(Value::Null) => true,
            Some(_) => false,
        };
        if spec.required && missing {
            return Err(MetadataError::MissingProperty {
                package: package.to_string(),
                property: spec.name.clone(),
            });
        }
    }

    Ok(Properties::new(values))
}
