//! Helpers over the nested mapping behind the store

use serde_json::{Map, Value};

pub(crate) type Mapping = Map<String, Value>;

/// Follow `segments` from `root`. Non-mappings along the way read as absent.
pub(crate) fn lookup<'a>(root: &'a Mapping, segments: &[String]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = root.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Walk to the mapping at `segments`, creating or replacing whatever is in the way
pub(crate) fn materialize<'a>(map: &'a mut Mapping, segments: &[String]) -> &'a mut Mapping {
    let Some((first, rest)) = segments.split_first() else {
        return map;
    };
    let slot = map
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Mapping::new()));
    materialize(ensure_mapping(slot), rest)
}

/// Mutable mapping at `segments`, without creating anything
pub(crate) fn lookup_mapping_mut<'a>(map: &'a mut Mapping, segments: &[String]) -> Option<&'a mut Mapping> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(map);
    };
    lookup_mapping_mut(map.get_mut(first)?.as_object_mut()?, rest)
}

/// Replace `slot` with an empty mapping unless it already is one
pub(crate) fn ensure_mapping(slot: &mut Value) -> &mut Mapping {
    if !slot.is_object() {
        *slot = Value::Object(Mapping::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("slot was just replaced with a mapping"),
    }
}

/// Write `value` at `parent` + `leaf`, returning the previous value
pub(crate) fn insert(root: &mut Mapping, parent: &[String], leaf: &str, value: Value) -> Option<Value> {
    materialize(root, parent).insert(leaf.to_string(), value)
}

/// Remove `parent` + `leaf`, leaving the (possibly empty) parent mapping in place
pub(crate) fn remove(root: &mut Mapping, parent: &[String], leaf: &str) -> Option<Value> {
    lookup_mapping_mut(root, parent)?.remove(leaf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segs(path: &str) -> Vec<String> {
        path.split('.').map(str::to_string).collect()
    }

    fn mapping(value: Value) -> Mapping {
        match value {
            Value::Object(map) => map,
            _ => panic!("not a mapping"),
        }
    }

    #[test]
    fn test_lookup() {
        let root = mapping(json!({"player": {"stats": {"health": 100}, "tags": [1, 2]}}));
        assert_eq!(lookup(&root, &segs("player.stats.health")), Some(&json!(100)));
        assert_eq!(lookup(&root, &segs("player.stats")), Some(&json!({"health": 100})));
        assert_eq!(lookup(&root, &segs("player.missing.health")), None);
        // Arrays are leaves
        assert_eq!(lookup(&root, &segs("player.tags.0")), None);
        assert_eq!(lookup(&root, &[]), None);
    }

    #[test]
    fn test_insert_materializes_intermediates() {
        let mut root = Mapping::new();
        let old = insert(&mut root, &segs("a.b"), "c", json!(1));
        assert_eq!(old, None);
        assert_eq!(Value::Object(root), json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_insert_replaces_scalar_in_the_way() {
        let mut root = mapping(json!({"a": 5}));
        insert(&mut root, &segs("a"), "b", json!(true));
        assert_eq!(Value::Object(root), json!({"a": {"b": true}}));
    }

    #[test]
    fn test_insert_returns_previous() {
        let mut root = mapping(json!({"a": {"b": 1}}));
        let old = insert(&mut root, &segs("a"), "b", json!(2));
        assert_eq!(old, Some(json!(1)));
    }

    #[test]
    fn test_remove() {
        let mut root = mapping(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(remove(&mut root, &segs("a"), "b"), Some(json!(1)));
        assert_eq!(remove(&mut root, &segs("a"), "b"), None);
        assert_eq!(remove(&mut root, &segs("x.y"), "z"), None);
        assert_eq!(Value::Object(root), json!({"a": {"c": 2}}));
    }
}
