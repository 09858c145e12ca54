use bkl_config::{
    CollectionMerger, ConfigError, ConfigInheritance, ConfigKey, ConfigResolver, ConfigValue,
    ConfigValueAtContainer, ConfigValueMap, ConflictStrategy, InheritanceSpec, SharedValue,
};
use proptest::prelude::*;
use std::collections::HashSet;

fn spec_strategy() -> impl Strategy<Value = InheritanceSpec> {
    (
        any::<bool>(),
        prop_oneof![
            Just(ConflictStrategy::Overwrite),
            Just(ConflictStrategy::DeepMerge),
            "[a-z]{3,8}".prop_map(ConflictStrategy::Custom),
        ],
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(reinherited, strategy, local, ancestor)| InheritanceSpec {
            reinherited,
            strategy,
            local_default_resolves_with_ancestor_value: local,
            ancestor_default_inheritable: ancestor,
        })
}

fn flat_map() -> impl Strategy<Value = ConfigValueMap> {
    prop::collection::btree_map("[a-e]", 0i64..100, 0..5).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(k, v)| (k, ConfigValue::from(v)))
            .collect()
    })
}

fn chain(
    key: &ConfigKey,
    local: Option<ConfigValue>,
    parent: Option<ConfigValue>,
) -> (
    ConfigValueAtContainer<&'static str>,
    [ConfigValueAtContainer<&'static str>; 1],
) {
    (
        ConfigValueAtContainer::new("child", Some(key.clone()), local),
        [ConfigValueAtContainer::new("parent", Some(key.clone()), parent)],
    )
}

proptest! {
    #[test]
    fn prop_canonicalize_is_idempotent(spec in spec_strategy()) {
        let inheritance = ConfigInheritance::from_spec(spec.clone());
        let once = inheritance.canonicalize();
        let twice = once.canonicalize();
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.canonical_name(), twice.canonical_name());
        prop_assert_eq!(&ConfigInheritance::Custom(spec), &inheritance);
    }

    #[test]
    fn prop_equal_specs_hash_equal(spec in spec_strategy()) {
        let mut set = HashSet::new();
        set.insert(ConfigInheritance::Custom(spec.clone()));
        prop_assert!(set.contains(&ConfigInheritance::from_spec(spec)));
    }

    #[test]
    fn prop_overwrite_prefers_local(local in 0i64..1000, parent in 0i64..1000) {
        let key = ConfigKey::new("k").with_runtime_inheritance(ConfigInheritance::Overwrite);
        let (local, ancestors) = chain(&key, Some(local.into()), Some(parent.into()));
        let expected = local.as_maybe().cloned();
        let resolved = ConfigResolver::shared_default()
            .resolve_value(&local, ancestors, &key)
            .unwrap();
        prop_assert_eq!(resolved.into_value(), expected);
    }

    #[test]
    fn prop_overwrite_inherits_when_local_unset(parent in 0i64..1000) {
        let key = ConfigKey::new("k").with_runtime_inheritance(ConfigInheritance::Overwrite);
        let (local, ancestors) = chain(&key, None, Some(parent.into()));
        let resolved = ConfigResolver::shared_default()
            .resolve_value(&local, ancestors, &key)
            .unwrap();
        prop_assert_eq!(resolved.into_value(), Some(ConfigValue::from(parent)));
    }

    #[test]
    fn prop_deep_merge_is_union_with_local_precedence(a in flat_map(), b in flat_map()) {
        let key = ConfigKey::new("k").with_runtime_inheritance(ConfigInheritance::DeepMerge);
        let (local, ancestors) = chain(&key, Some(ConfigValue::Map(a.clone())), Some(ConfigValue::Map(b.clone())));
        let resolved = ConfigResolver::shared_default()
            .resolve_value(&local, ancestors, &key)
            .unwrap();
        prop_assert!(!resolved.has_error());
        let merged = resolved.into_value().unwrap();
        let merged = merged.as_map().unwrap();
        for (k, v) in &a {
            prop_assert_eq!(merged.get(k), Some(v));
        }
        for (k, v) in &b {
            if !a.contains_key(k) {
                prop_assert_eq!(merged.get(k), Some(v));
            }
        }
        prop_assert_eq!(merged.len(), a.keys().chain(b.keys()).collect::<HashSet<_>>().len());
    }

    #[test]
    fn prop_local_null_blocks_deep_merge(b in flat_map()) {
        let key = ConfigKey::new("k").with_runtime_inheritance(ConfigInheritance::DeepMerge);
        let (local, ancestors) = chain(&key, Some(ConfigValue::Null), Some(ConfigValue::Map(b)));
        let resolved = ConfigResolver::shared_default()
            .resolve_value(&local, ancestors, &key)
            .unwrap();
        prop_assert_eq!(resolved.into_value(), Some(ConfigValue::Null));
    }
}

#[test]
fn deep_merge_example() {
    let key = ConfigKey::new("k").with_runtime_inheritance(ConfigInheritance::DeepMerge);
    let (local, ancestors) = chain(
        &key,
        Some(ConfigValue::map([("a", 1), ("b", 2)])),
        Some(ConfigValue::map([("b", 3), ("c", 4)])),
    );
    let resolved = ConfigResolver::shared_default()
        .resolve_value(&local, ancestors, &key)
        .unwrap();
    assert_eq!(
        resolved.into_value(),
        Some(ConfigValue::map([("a", 1), ("b", 2), ("c", 4)]))
    );
}

#[test]
fn merge_of_self_referencing_value_fails() {
    let cell = SharedValue::new(ConfigValue::Null);
    cell.set(ConfigValue::map([("me", ConfigValue::Shared(cell.clone()))]));
    let mut first = ConfigValueMap::new();
    first.insert("root".into(), ConfigValue::Shared(cell));
    let mut second = ConfigValueMap::new();
    second.insert("root".into(), ConfigValue::map([("other", 1)]));

    let err = CollectionMerger::new().merge(&first, &second).unwrap_err();
    assert!(matches!(err, ConfigError::RecursiveSelfReference(_)));
}

#[test]
fn not_reinherited_boundary() {
    let query = ConfigKey::new("k");
    let declared = ConfigKey::new("k").with_runtime_inheritance(ConfigInheritance::NotReinherited);
    let a = ConfigValueAtContainer::new("A", None, Some(ConfigValue::from("v")));
    let child = ConfigValueAtContainer::new("child", Some(declared), None);
    let grandchild = ConfigValueAtContainer::new("grandchild", None, None);

    let resolver = ConfigResolver::shared_default();
    let seen_by_child = resolver
        .resolve_value(&child, [a.clone()], &query)
        .unwrap();
    assert_eq!(seen_by_child.into_value(), Some(ConfigValue::from("v")));

    let seen_by_grandchild = resolver
        .resolve_value(&grandchild, [child, a], &query)
        .unwrap();
    assert_eq!(seen_by_grandchild.into_value(), None);
}

#[test]
fn legacy_record_migrates_to_never_inherited() {
    let inheritance: ConfigInheritance = serde_json::from_str(
        r#"{"isReinherited":false,"conflictResolutionStrategy":"overwrite","useLocalDefaultValue":true,"ancestorDefaultInheritable":false}"#,
    )
    .unwrap();
    assert!(matches!(inheritance, ConfigInheritance::NeverInherited));
}
