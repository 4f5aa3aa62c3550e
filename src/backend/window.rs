use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;

use super::{ChildEvent, Query, Snapshot};

/// Orders children the way the backend does for `orderByChild`: missing or
/// null values first, then booleans, numbers, strings, objects; ties by key.
pub(crate) fn compare_children(order_by: Option<&str>, a: (&str, &Value), b: (&str, &Value)) -> Ordering {
    let Some(child) = order_by else {
        return compare_keys(a.0, b.0);
    };
    let va = a.1.get(child).unwrap_or(&Value::Null);
    let vb = b.1.get(child).unwrap_or(&Value::Null);
    compare_values(va, vb).then_with(|| compare_keys(a.0, b.0))
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) | Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Integer-looking keys sort numerically ahead of the rest.
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// The children a listener currently sees, diffed against each new state of
/// the location it listens to.
#[derive(Debug)]
pub(crate) struct Window {
    order_by: Option<String>,
    limit: Option<usize>,
    visible: BTreeMap<String, Value>,
}

impl Window {
    pub(crate) fn new(query: &Query) -> Self {
        Window {
            order_by: query.order_by.clone(),
            limit: query.limit_to_last,
            visible: BTreeMap::new(),
        }
    }

    /// Recomputes the visible set from `location` and returns what changed:
    /// removals first, then additions and changes in query order.
    pub(crate) fn update(&mut self, location: Option<&Value>) -> Vec<ChildEvent> {
        let mut children: Vec<(&String, &Value)> = location
            .and_then(Value::as_object)
            .map(|map| map.iter().filter(|(_, v)| !v.is_null()).collect())
            .unwrap_or_default();
        children.sort_by(|a, b| compare_children(self.order_by.as_deref(), (a.0, a.1), (b.0, b.1)));
        if let Some(limit) = self.limit {
            let skip = children.len().saturating_sub(limit);
            children.drain(..skip);
        }

        let mut events = Vec::new();
        let next: BTreeMap<String, Value> = children
            .iter()
            .map(|(k, v)| ((*k).clone(), (*v).clone()))
            .collect();

        for key in self.visible.keys() {
            if !next.contains_key(key) {
                events.push(ChildEvent::Removed(key.clone()));
            }
        }
        for (key, value) in children {
            let snapshot = Snapshot { key: key.clone(), value: value.clone() };
            match self.visible.get(key) {
                None => events.push(ChildEvent::Added(snapshot)),
                Some(old) if old != value => events.push(ChildEvent::Changed(snapshot)),
                Some(_) => {}
            }
        }

        self.visible = next;
        events
    }
}
