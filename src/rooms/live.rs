use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::{
    backend::{window::compare_children, ChildEvent, Snapshot, Subscription},
    db::Record,
    AbortOnDrop, AppResult, ChatError,
};

/// A keyed collection kept in query order as child events arrive.
#[derive(Debug, Default)]
pub(crate) struct ChildList {
    order_by: Option<String>,
    entries: Vec<Snapshot>,
}

impl ChildList {
    pub(crate) fn new(order_by: Option<String>) -> Self {
        ChildList { order_by, entries: Vec::new() }
    }

    /// Returns true for the marker that ends the initial load.
    pub(crate) fn apply(&mut self, event: ChildEvent) -> bool {
        match event {
            ChildEvent::Added(snapshot) | ChildEvent::Changed(snapshot) => {
                self.entries.retain(|s| s.key != snapshot.key);
                let order_by = self.order_by.as_deref();
                let at = self.entries.partition_point(|s| {
                    compare_children(order_by, (&s.key, &s.value), (&snapshot.key, &snapshot.value)).is_lt()
                });
                self.entries.insert(at, snapshot);
                false
            }
            ChildEvent::Removed(key) => {
                self.entries.retain(|s| s.key != key);
                false
            }
            ChildEvent::Ready => true,
        }
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|s| s.key.as_str())
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|s| s.key == key)
    }

    pub(crate) fn records<T: Record>(&self) -> Vec<T> {
        self.entries
            .iter()
            .filter_map(|s| match serde_json::from_value::<T>(s.value.clone()) {
                Ok(record) => Some(record.with_key(&s.key)),
                Err(e) => {
                    warn!(key = %s.key, "skipping malformed record: {e}");
                    None
                }
            })
            .collect()
    }
}

/// A live, ordered view of a backend collection. Dropping it (or calling
/// [`LiveList::dispose`]) detaches every listener behind it.
#[derive(Debug)]
pub struct LiveList<T> {
    items: watch::Receiver<Vec<T>>,
    loaded: watch::Receiver<bool>,
    _task: AbortOnDrop,
}

impl<T: Record> LiveList<T> {
    pub(crate) fn from_parts(items: watch::Receiver<Vec<T>>, loaded: watch::Receiver<bool>, task: AbortOnDrop) -> Self {
        LiveList { items, loaded, _task: task }
    }

    /// Follows `sub`, republishing the whole list after each burst of events.
    pub(crate) fn follow(mut sub: Subscription, order_by: Option<String>) -> Self {
        let (items_tx, items) = watch::channel(Vec::new());
        let (loaded_tx, loaded) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut list = ChildList::new(order_by);
            while let Some(event) = sub.next().await {
                let mut ready = list.apply(event);
                while let Some(event) = sub.try_next() {
                    ready |= list.apply(event);
                }
                items_tx.send_replace(list.records());
                if ready {
                    loaded_tx.send_replace(true);
                }
            }
        });
        Self::from_parts(items, loaded, AbortOnDrop(task))
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.borrow().clone()
    }

    /// A receiver that wakes on every change, for binding to a view.
    pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
        self.items.clone()
    }

    /// Waits until the initial set has been delivered.
    pub async fn loaded(&self) -> AppResult<()> {
        let mut loaded = self.loaded.clone();
        loaded
            .wait_for(|loaded| *loaded)
            .await
            .map_err(|_| ChatError::Unavailable("listener ended before loading".to_owned()))?;
        Ok(())
    }

    /// Waits until the list satisfies `pred` and returns it.
    pub async fn wait_for(&self, mut pred: impl FnMut(&[T]) -> bool) -> AppResult<Vec<T>> {
        let mut items = self.items.clone();
        let matched = items
            .wait_for(|items: &Vec<T>| pred(items))
            .await
            .map_err(|_| ChatError::Unavailable("listener ended".to_owned()))?
            .clone();
        Ok(matched)
    }

    pub fn dispose(self) {}
}

pub(crate) fn content_of(value: &Value) -> Option<String> {
    value.get("content").and_then(Value::as_str).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::Message;

    fn added(key: &str, value: Value) -> ChildEvent {
        ChildEvent::Added(Snapshot { key: key.to_owned(), value })
    }

    #[test]
    fn child_list_keeps_query_order_through_changes() {
        let mut list = ChildList::new(Some("createdAt".to_owned()));
        list.apply(added("b", json!({ "content": "second", "createdAt": 2 })));
        list.apply(added("a", json!({ "content": "first", "createdAt": 1 })));
        list.apply(added("c", json!({ "content": "third", "createdAt": 3 })));
        assert!(list.apply(ChildEvent::Ready));
        assert_eq!(list.keys().collect::<Vec<_>>(), ["a", "b", "c"]);

        list.apply(ChildEvent::Changed(Snapshot { key: "a".to_owned(), value: json!({ "content": "moved", "createdAt": 4 }) }));
        list.apply(ChildEvent::Removed("b".to_owned()));
        let messages: Vec<Message> = list.records();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["third", "moved"]);
        assert_eq!(messages[1].id, "a");
    }

    #[test]
    fn malformed_records_are_skipped() {
        let mut list = ChildList::new(None);
        list.apply(added("ok", json!({ "content": "fine" })));
        list.apply(added("bad", json!({ "content": 12 })));
        let messages: Vec<Message> = list.records();
        assert_eq!(messages.len(), 1);
        assert!(list.contains("bad"));
    }
}
