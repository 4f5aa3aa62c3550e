use serde_json::{Map, Value};

use crate::db::ServerTimestamp;

pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub(crate) fn get_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for seg in path {
        node = node.as_object()?.get(*seg)?;
    }
    Some(node).filter(|v| !v.is_null())
}

/// Writes `value` at `path`. Null removes the node and prunes parents left empty.
pub(crate) fn set_at(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = normalize(value);
        return;
    };

    if value.is_null() {
        remove_at(root, parents, last);
        return;
    }

    let mut node = root;
    for seg in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(seg.to_string()).or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let value = normalize(value);
        if value.is_null() {
            map.remove(*last);
        } else {
            map.insert(last.to_string(), value);
        }
    }
}

fn remove_at(node: &mut Value, parents: &[&str], last: &str) -> bool {
    let Value::Object(map) = node else {
        return false;
    };
    match parents.split_first() {
        None => {
            map.remove(last);
        }
        Some((head, rest)) => {
            if let Some(child) = map.get_mut(*head) {
                if remove_at(child, rest, last) {
                    map.remove(*head);
                }
            }
        }
    }
    map.is_empty()
}

/// Drops null leaves and empty objects, the way the backend never stores them.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if map.is_empty() { Value::Null } else { Value::Object(map) }
        }
        other => other,
    }
}

/// Replaces every server-timestamp placeholder with `now`.
pub(crate) fn resolve_server_values(value: &mut Value, now: i64) {
    if ServerTimestamp::is_placeholder(value) {
        *value = Value::from(now);
        return;
    }
    match value {
        Value::Object(map) => map.values_mut().for_each(|v| resolve_server_values(v, now)),
        Value::Array(items) => items.iter_mut().for_each(|v| resolve_server_values(v, now)),
        _ => {}
    }
}

/// Whether a write at `written` can change what a listener at `listening` sees.
pub(crate) fn overlaps(written: &[&str], listening: &[&str]) -> bool {
    written.iter().zip(listening).all(|(a, b)| a == b)
}
