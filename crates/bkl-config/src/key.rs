//! Config keys
//!
//! A [`ConfigKey`] names a config slot and carries its declared type, default
//! and per-context inheritance.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::inheritance::ConfigInheritance;
use crate::value::ConfigValue;

/// Context in which inheritance is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigInheritanceContext {
    /// Between a type and its super-types
    TypeDefinition,
    /// Between a runtime container and its parent container
    RuntimeManagement,
}

/// Declared value type of a config key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Anything
    #[default]
    Any,
    /// Strings
    String,
    /// Integral numbers
    Integer,
    /// Any number
    Number,
    /// Booleans
    Boolean,
    /// Maps
    Map,
    /// Lists (sets accepted)
    List,
    /// Sets (lists accepted)
    Set,
}

impl ValueType {
    /// Check whether a value is acceptable for this type
    ///
    /// Null and task values are always accepted; tasks are checked once they
    /// complete.
    #[must_use]
    pub fn accepts(self, value: &ConfigValue) -> bool {
        match (self, value) {
            (Self::Any, _) | (_, ConfigValue::Null | ConfigValue::Task(_)) => true,
            (_, ConfigValue::Shared(shared)) => self.accepts(&shared.get()),
            (Self::String, ConfigValue::String(_))
            | (Self::Number, ConfigValue::Number(_))
            | (Self::Boolean, ConfigValue::Bool(_))
            | (Self::Map, ConfigValue::Map(_))
            | (Self::List | Self::Set, ConfigValue::List(_) | ConfigValue::Set(_)) => true,
            (Self::Integer, ConfigValue::Number(n)) => n.is_i64() || n.is_u64(),
            _ => false,
        }
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Map => "map",
            Self::List => "list",
            Self::Set => "set",
        }
    }
}

/// Named config slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigKey {
    /// Key name
    pub name: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Declared value type
    #[serde(default, rename = "type")]
    pub value_type: ValueType,

    /// Default used when no value is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<ConfigValue>,

    /// Inheritance between runtime containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_inheritance: Option<ConfigInheritance>,

    /// Inheritance between type definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_inheritance: Option<ConfigInheritance>,

    /// Whether the value may change after the container is managed
    #[serde(default)]
    pub reconfigurable: bool,
}

impl ConfigKey {
    /// Create key accepting any value
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            value_type: ValueType::Any,
            default_value: None,
            runtime_inheritance: None,
            type_inheritance: None,
            reconfigurable: false,
        }
    }

    /// Set description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set value type
    #[inline]
    #[must_use]
    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    /// Set default value
    #[inline]
    #[must_use]
    pub fn with_default(mut self, value: impl Into<ConfigValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Set runtime inheritance
    #[inline]
    #[must_use]
    pub fn with_runtime_inheritance(mut self, inheritance: ConfigInheritance) -> Self {
        self.runtime_inheritance = Some(inheritance);
        self
    }

    /// Set type-definition inheritance
    #[inline]
    #[must_use]
    pub fn with_type_inheritance(mut self, inheritance: ConfigInheritance) -> Self {
        self.type_inheritance = Some(inheritance);
        self
    }

    /// Mark as reconfigurable
    #[inline]
    #[must_use]
    pub fn reconfigurable(mut self) -> Self {
        self.reconfigurable = true;
        self
    }

    /// Inheritance declared for a context, if any
    #[inline]
    #[must_use]
    pub fn inheritance_by_context(
        &self,
        context: ConfigInheritanceContext,
    ) -> Option<&ConfigInheritance> {
        match context {
            ConfigInheritanceContext::TypeDefinition => self.type_inheritance.as_ref(),
            ConfigInheritanceContext::RuntimeManagement => self.runtime_inheritance.as_ref(),
        }
    }

    /// Validate a value against the declared type
    ///
    /// # Errors
    /// Returns [`ConfigError::TypeMismatch`] if the value is not acceptable
    pub fn validate(&self, value: &ConfigValue) -> ConfigResult<()> {
        if self.value_type.accepts(value) {
            Ok(())
        } else {
            Err(ConfigError::TypeMismatch {
                key: self.name.clone(),
                expected: self.value_type.as_str().to_string(),
                actual: value.type_label().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_rejects_strings_and_floats() {
        let key = ConfigKey::new("port").with_type(ValueType::Integer);
        assert!(key.validate(&ConfigValue::from(8080)).is_ok());
        assert!(key.validate(&ConfigValue::from(1.5)).is_err());
        let err = key.validate(&ConfigValue::from("8080")).unwrap_err();
        assert_eq!(
            err,
            ConfigError::TypeMismatch {
                key: "port".into(),
                expected: "integer".into(),
                actual: "string".into(),
            }
        );
    }

    #[test]
    fn null_and_tasks_always_accepted() {
        let key = ConfigKey::new("m").with_type(ValueType::Map);
        assert!(key.validate(&ConfigValue::Null).is_ok());
        let task = crate::value::TaskHandle::pending("later");
        assert!(key.validate(&ConfigValue::Task(task)).is_ok());
    }

    #[test]
    fn inheritance_by_context_selects_slot() {
        let key = ConfigKey::new("k")
            .with_runtime_inheritance(ConfigInheritance::DeepMerge)
            .with_type_inheritance(ConfigInheritance::Overwrite);
        assert_eq!(
            key.inheritance_by_context(ConfigInheritanceContext::RuntimeManagement),
            Some(&ConfigInheritance::DeepMerge)
        );
        assert_eq!(
            key.inheritance_by_context(ConfigInheritanceContext::TypeDefinition),
            Some(&ConfigInheritance::Overwrite)
        );
    }

    #[test]
    fn key_serde_camel_case() {
        let key = ConfigKey::new("a.b")
            .with_default(3)
            .with_runtime_inheritance(ConfigInheritance::NotReinherited);
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["defaultValue"], serde_json::json!(3));
        assert_eq!(json["runtimeInheritance"], serde_json::json!("not_reinherited"));
        let back: ConfigKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, key);
    }
}
