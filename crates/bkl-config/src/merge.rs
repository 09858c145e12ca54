//! Structural deep merge of config maps
//!
//! [`CollectionMerger`] combines two maps key by key. Conflicting leaves keep
//! the first value unless configured otherwise. Shared values are followed by
//! snapshot, and a value reachable from itself is rejected.

use crate::error::{ConfigError, ConfigResult};
use crate::value::{ConfigValue, ConfigValueMap, SharedValue};

/// Deep merge settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionMerger {
    depth: usize,
    merge_nested_lists: bool,
    merge_nested_sets: bool,
    prefer_second: bool,
}

impl Default for CollectionMerger {
    fn default() -> Self {
        Self {
            depth: usize::MAX,
            merge_nested_lists: false,
            merge_nested_sets: false,
            prefer_second: false,
        }
    }
}

impl CollectionMerger {
    /// Unbounded merger keeping first values on conflict
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit how many map levels are merged
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidMergeDepth`] for a depth of 0
    pub fn with_depth(mut self, depth: usize) -> ConfigResult<Self> {
        if depth == 0 {
            return Err(ConfigError::InvalidMergeDepth(depth));
        }
        self.depth = depth;
        Ok(self)
    }

    /// Append nested lists instead of treating them as leaves
    #[inline]
    #[must_use]
    pub fn merge_nested_lists(mut self, enabled: bool) -> Self {
        self.merge_nested_lists = enabled;
        self
    }

    /// Union nested sets instead of treating them as leaves
    #[inline]
    #[must_use]
    pub fn merge_nested_sets(mut self, enabled: bool) -> Self {
        self.merge_nested_sets = enabled;
        self
    }

    /// Keep the second value on leaf conflicts
    #[inline]
    #[must_use]
    pub fn prefer_second(mut self, enabled: bool) -> Self {
        self.prefer_second = enabled;
        self
    }

    /// Configured depth
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Merge two maps
    ///
    /// Key order follows `first`, with keys only present in `second` appended.
    ///
    /// # Errors
    /// Returns [`ConfigError::RecursiveSelfReference`] if either side contains
    /// a shared value reachable from itself
    pub fn merge(
        &self,
        first: &ConfigValueMap,
        second: &ConfigValueMap,
    ) -> ConfigResult<ConfigValueMap> {
        let mut paths = WalkPaths::default();
        self.merge_maps(first, second, self.depth, &mut paths)
    }

    /// Merge two values when both are mappings
    ///
    /// Returns `None` when either side (after following shared references)
    /// is not a map.
    ///
    /// # Errors
    /// Returns [`ConfigError::RecursiveSelfReference`] on cyclic input
    pub fn merge_if_mappings(
        &self,
        first: &ConfigValue,
        second: &ConfigValue,
    ) -> ConfigResult<Option<ConfigValue>> {
        let (Some(a), Some(b)) = (mapping_snapshot(first), mapping_snapshot(second)) else {
            return Ok(None);
        };
        let mut paths = WalkPaths::default();
        if let ConfigValue::Shared(shared) = first {
            paths.enter(Side::First, shared)?;
        }
        if let ConfigValue::Shared(shared) = second {
            paths.enter(Side::Second, shared)?;
        }
        let merged = self.merge_maps(&a, &b, self.depth, &mut paths)?;
        Ok(Some(ConfigValue::Map(merged)))
    }

    fn merge_maps(
        &self,
        first: &ConfigValueMap,
        second: &ConfigValueMap,
        depth: usize,
        paths: &mut WalkPaths,
    ) -> ConfigResult<ConfigValueMap> {
        let mut out = ConfigValueMap::with_capacity(first.len() + second.len());
        for (key, a) in first {
            let merged = match second.get(key) {
                Some(b) => self.merge_values(a, b, depth, paths)?,
                None => {
                    check_acyclic(a, &mut paths.first)?;
                    a.clone()
                }
            };
            out.insert(key.clone(), merged);
        }
        for (key, b) in second {
            if !first.contains_key(key) {
                check_acyclic(b, &mut paths.second)?;
                out.insert(key.clone(), b.clone());
            }
        }
        Ok(out)
    }

    fn merge_values(
        &self,
        first: &ConfigValue,
        second: &ConfigValue,
        depth: usize,
        paths: &mut WalkPaths,
    ) -> ConfigResult<ConfigValue> {
        if let ConfigValue::Shared(shared) = first {
            paths.enter(Side::First, shared)?;
            let result = self.merge_values(&shared.get(), second, depth, paths);
            paths.leave(Side::First);
            return result;
        }
        if let ConfigValue::Shared(shared) = second {
            paths.enter(Side::Second, shared)?;
            let result = self.merge_values(first, &shared.get(), depth, paths);
            paths.leave(Side::Second);
            return result;
        }

        match (first, second) {
            (ConfigValue::Map(a), ConfigValue::Map(b)) if depth > 1 => {
                Ok(ConfigValue::Map(self.merge_maps(a, b, depth - 1, paths)?))
            }
            (ConfigValue::List(a), ConfigValue::List(b)) if self.merge_nested_lists => {
                check_acyclic(first, &mut paths.first)?;
                check_acyclic(second, &mut paths.second)?;
                Ok(ConfigValue::List(a.iter().chain(b).cloned().collect()))
            }
            (ConfigValue::Set(a), ConfigValue::Set(b)) if self.merge_nested_sets => {
                check_acyclic(first, &mut paths.first)?;
                check_acyclic(second, &mut paths.second)?;
                let mut union = a.clone();
                for item in b {
                    if !union.contains(item) {
                        union.push(item.clone());
                    }
                }
                Ok(ConfigValue::Set(union))
            }
            _ => {
                if self.prefer_second {
                    check_acyclic(second, &mut paths.second)?;
                    Ok(second.clone())
                } else {
                    check_acyclic(first, &mut paths.first)?;
                    Ok(first.clone())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    First,
    Second,
}

/// Shared-value identities on the current walk path, one stack per side
#[derive(Debug, Default)]
struct WalkPaths {
    first: Vec<usize>,
    second: Vec<usize>,
}

impl WalkPaths {
    fn stack(&mut self, side: Side) -> &mut Vec<usize> {
        match side {
            Side::First => &mut self.first,
            Side::Second => &mut self.second,
        }
    }

    fn enter(&mut self, side: Side, shared: &SharedValue) -> ConfigResult<()> {
        push_identity(self.stack(side), shared)
    }

    fn leave(&mut self, side: Side) {
        self.stack(side).pop();
    }
}

fn push_identity(path: &mut Vec<usize>, shared: &SharedValue) -> ConfigResult<()> {
    let id = shared.identity();
    if path.contains(&id) {
        return Err(ConfigError::RecursiveSelfReference(
            "collection merge".to_string(),
        ));
    }
    path.push(id);
    Ok(())
}

fn check_acyclic(value: &ConfigValue, path: &mut Vec<usize>) -> ConfigResult<()> {
    if value.is_trivially_immutable() || value.is_empty_container() {
        return Ok(());
    }
    match value {
        ConfigValue::Shared(shared) => {
            push_identity(path, shared)?;
            let result = check_acyclic(&shared.get(), path);
            path.pop();
            result
        }
        ConfigValue::List(items) | ConfigValue::Set(items) => {
            items.iter().try_for_each(|item| check_acyclic(item, path))
        }
        ConfigValue::Map(map) => map.values().try_for_each(|item| check_acyclic(item, path)),
        _ => Ok(()),
    }
}

fn mapping_snapshot(value: &ConfigValue) -> Option<ConfigValueMap> {
    match value {
        ConfigValue::Map(map) => Some(map.clone()),
        ConfigValue::Shared(shared) => match shared.get() {
            ConfigValue::Map(map) => Some(map),
            _ => None,
        },
        _ => None,
    }
}
