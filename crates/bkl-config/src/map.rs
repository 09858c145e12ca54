//! Config maps
//!
//! Ordered container of config values keyed by name, as held by entities,
//! locations and adjuncts.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::key::ConfigKey;
use crate::value::ConfigValue;

/// Ordered map of config values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigMap {
    values: IndexMap<String, ConfigValue>,
}

impl ConfigMap {
    /// Create empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from YAML mapping
    ///
    /// # Errors
    /// Returns error if YAML is invalid or not a mapping
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::InvalidYaml(e.to_string()))
    }

    /// Parse from JSON object
    ///
    /// # Errors
    /// Returns error if JSON is invalid or not an object
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidJson(e.to_string()))
    }

    /// Set a value under a declared key, validating its type
    ///
    /// # Errors
    /// Returns [`ConfigError::TypeMismatch`] if the key rejects the value
    pub fn set(&mut self, key: &ConfigKey, value: ConfigValue) -> ConfigResult<Option<ConfigValue>> {
        key.validate(&value)?;
        Ok(self.values.insert(key.name.clone(), value))
    }

    /// Set a value by name without validation
    pub fn set_raw(&mut self, name: impl Into<String>, value: ConfigValue) -> Option<ConfigValue> {
        self.values.insert(name.into(), value)
    }

    /// Explicitly set value, ignoring defaults and ancestors
    #[inline]
    #[must_use]
    pub fn get_local(&self, name: &str) -> Option<&ConfigValue> {
        self.values.get(name)
    }

    /// Check whether a value is explicitly set
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Deserialize a value into a concrete type
    ///
    /// # Errors
    /// Returns error if the value cannot be converted
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> ConfigResult<Option<T>> {
        self.values
            .get(name)
            .map(|value| {
                let json = value.to_json()?;
                serde_json::from_value(json).map_err(|e| ConfigError::Serialization(e.to_string()))
            })
            .transpose()
    }

    /// Remove a value, preserving the order of the rest
    pub fn remove(&mut self, name: &str) -> Option<ConfigValue> {
        self.values.shift_remove(name)
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names in insertion order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    /// Number of values
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, ConfigValue)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (String, ConfigValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ConfigMap {
    type Item = (&'a String, &'a ConfigValue);
    type IntoIter = indexmap::map::Iter<'a, String, ConfigValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ValueType;

    #[test]
    fn from_yaml_keeps_order() {
        let map = ConfigMap::from_yaml("zeta: 1\nalpha: two\n").unwrap();
        assert_eq!(map.names(), vec!["zeta", "alpha"]);
        assert_eq!(map.get_local("alpha"), Some(&ConfigValue::from("two")));
    }

    #[test]
    fn from_yaml_rejects_scalar() {
        assert!(matches!(
            ConfigMap::from_yaml("just a string"),
            Err(ConfigError::InvalidYaml(_))
        ));
    }

    #[test]
    fn set_validates() {
        let key = ConfigKey::new("flag").with_type(ValueType::Boolean);
        let mut map = ConfigMap::new();
        assert!(map.set(&key, ConfigValue::from(true)).is_ok());
        assert!(map.set(&key, ConfigValue::from("yes")).is_err());
        assert_eq!(map.get_as::<bool>("flag").unwrap(), Some(true));
    }

    #[test]
    fn remove_preserves_order() {
        let mut map = ConfigMap::from_json(r#"{"a":1,"b":2,"c":3}"#).unwrap();
        map.remove("b");
        assert_eq!(map.names(), vec!["a", "c"]);
    }
}
