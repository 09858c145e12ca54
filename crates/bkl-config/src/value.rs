//! Config values
//!
//! Dynamically-typed values held in config maps, attributes and tags. JSON is
//! the canonical wire form; YAML is accepted on input.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::error::ConfigError;

/// Ordered, string-keyed map of config values
pub type ConfigValueMap = IndexMap<String, ConfigValue>;

/// A config value
///
/// `Shared` holds a live, mutable reference which may be aliased (and may
/// form cycles). `Task` holds a computation that might not have finished yet.
#[derive(Clone)]
pub enum ConfigValue {
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// Number
    Number(serde_json::Number),
    /// String
    String(String),
    /// Ordered sequence
    List(Vec<ConfigValue>),
    /// Sequence without duplicates
    Set(Vec<ConfigValue>),
    /// Ordered mapping
    Map(ConfigValueMap),
    /// Live shared reference
    Shared(SharedValue),
    /// Deferred computation
    Task(TaskHandle),
}

impl ConfigValue {
    /// Build a map value
    #[must_use]
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<ConfigValue>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a list value
    #[must_use]
    pub fn list<V: Into<ConfigValue>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a set value, dropping duplicates
    #[must_use]
    pub fn set<V: Into<ConfigValue>>(items: impl IntoIterator<Item = V>) -> Self {
        let mut out: Vec<ConfigValue> = Vec::new();
        for item in items {
            let item = item.into();
            if !out.contains(&item) {
                out.push(item);
            }
        }
        Self::Set(out)
    }

    /// Wrap a value in a new shared reference
    #[must_use]
    pub fn shared(value: ConfigValue) -> Self {
        Self::Shared(SharedValue::new(value))
    }

    /// Parse from JSON string
    ///
    /// # Errors
    /// Returns error if JSON is invalid
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: JsonValue =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidJson(e.to_string()))?;
        Ok(Self::from(value))
    }

    /// Parse from YAML string
    ///
    /// # Errors
    /// Returns error if YAML is invalid
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let value: JsonValue =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::InvalidYaml(e.to_string()))?;
        Ok(Self::from(value))
    }

    /// Convert to JSON
    ///
    /// Sets become arrays, shared values are inlined and tasks become their
    /// result (or null when not successfully completed).
    ///
    /// # Errors
    /// Returns [`ConfigError::RecursiveSelfReference`] if a shared value is
    /// reachable from itself
    pub fn to_json(&self) -> Result<JsonValue, ConfigError> {
        let mut path = Vec::new();
        self.to_json_inner(&mut path)
    }

    fn to_json_inner(&self, path: &mut Vec<usize>) -> Result<JsonValue, ConfigError> {
        Ok(match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Number(n) => JsonValue::Number(n.clone()),
            Self::String(s) => JsonValue::String(s.clone()),
            Self::List(items) | Self::Set(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|v| v.to_json_inner(path))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json_inner(path)?);
                }
                JsonValue::Object(out)
            }
            Self::Shared(shared) => {
                let id = shared.identity();
                if path.contains(&id) {
                    return Err(ConfigError::RecursiveSelfReference(
                        "shared config value".to_string(),
                    ));
                }
                path.push(id);
                let json = shared.get().to_json_inner(path);
                path.pop();
                json?
            }
            Self::Task(task) => match task.state() {
                TaskState::Succeeded(v) => v.to_json_inner(path)?,
                TaskState::Pending | TaskState::Failed(_) => JsonValue::Null,
            },
        })
    }

    /// Check for explicit null
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check for a deferred computation
    #[inline]
    #[must_use]
    pub fn is_task(&self) -> bool {
        matches!(self, Self::Task(_))
    }

    /// Get string content
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get boolean content
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get integer content
    #[inline]
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Get map content
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&ConfigValueMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get list or set content
    #[inline]
    #[must_use]
    pub fn as_items(&self) -> Option<&[ConfigValue]> {
        match self {
            Self::List(items) | Self::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of this value's kind, for diagnostics
    #[must_use]
    pub fn type_label(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Shared(_) => "shared",
            Self::Task(_) => "task",
        }
    }

    /// Scalars can never contain a reference back to a container
    #[inline]
    #[must_use]
    pub fn is_trivially_immutable(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_)
        )
    }

    /// Empty list, set or map
    #[inline]
    #[must_use]
    pub fn is_empty_container(&self) -> bool {
        match self {
            Self::List(items) | Self::Set(items) => items.is_empty(),
            Self::Map(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl PartialEq for ConfigValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => a.len() == b.len() && a.iter().all(|v| b.contains(v)),
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Shared(a), Self::Shared(b)) => a.ptr_eq(b),
            (Self::Task(a), Self::Task(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Set(items) => f.debug_tuple("Set").field(items).finish(),
            Self::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Self::Shared(shared) => write!(f, "Shared({:#x})", shared.identity()),
            Self::Task(task) => write!(f, "{task:?}"),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            other => match other.to_json() {
                Ok(json) => write!(f, "{json}"),
                Err(_) => f.write_str("<recursive>"),
            },
        }
    }
}

impl Serialize for ConfigValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConfigValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(Self::from)
    }
}

impl From<JsonValue> for ConfigValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => Self::Number(n),
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            JsonValue::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for ConfigValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl From<ConfigValueMap> for ConfigValue {
    fn from(value: ConfigValueMap) -> Self {
        Self::Map(value)
    }
}

impl From<Vec<ConfigValue>> for ConfigValue {
    fn from(value: Vec<ConfigValue>) -> Self {
        Self::List(value)
    }
}

impl From<TaskHandle> for ConfigValue {
    fn from(value: TaskHandle) -> Self {
        Self::Task(value)
    }
}

/// Live, aliasable reference to a config value
#[derive(Clone)]
pub struct SharedValue(Arc<RwLock<ConfigValue>>);

impl SharedValue {
    /// Create new shared reference
    #[must_use]
    pub fn new(value: ConfigValue) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Snapshot of the current value
    #[must_use]
    pub fn get(&self) -> ConfigValue {
        self.0.read().clone()
    }

    /// Replace the current value
    pub fn set(&self, value: ConfigValue) {
        *self.0.write() = value;
    }

    /// Identity of the referenced cell
    #[inline]
    #[must_use]
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Check if both handles reference the same cell
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedValue({:#x})", self.identity())
    }
}

/// State of a deferred computation
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    /// Not finished
    Pending,
    /// Finished with a result
    Succeeded(ConfigValue),
    /// Finished with an error
    Failed(String),
}

/// Handle on a computation whose result is used as a config value
#[derive(Clone)]
pub struct TaskHandle {
    name: Arc<str>,
    state: Arc<Mutex<TaskState>>,
}

impl TaskHandle {
    /// Create a task that has not completed
    #[must_use]
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            state: Arc::new(Mutex::new(TaskState::Pending)),
        }
    }

    /// Create an already completed task
    #[must_use]
    pub fn succeeded(name: impl Into<String>, value: ConfigValue) -> Self {
        let task = Self::pending(name);
        task.complete(value);
        task
    }

    /// Record a successful result
    pub fn complete(&self, value: ConfigValue) {
        *self.state.lock() = TaskState::Succeeded(value);
    }

    /// Record a failure
    pub fn fail(&self, message: impl Into<String>) {
        *self.state.lock() = TaskState::Failed(message.into());
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state.lock().clone()
    }

    /// Task display name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if both handles track the same computation
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &*self.state.lock() {
            TaskState::Pending => "pending",
            TaskState::Succeeded(_) => "succeeded",
            TaskState::Failed(_) => "failed",
        };
        write!(f, "Task({}, {status})", self.name)
    }
}
