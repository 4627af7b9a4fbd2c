use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures_util::stream::{self, StreamExt};
use log::trace;
use peercall_core::store::{Result, SignalingStore, StoreError, WatchStream};
use serde_json::Value;
use tokio::sync::watch;

/// In-process signaling store.
///
/// Each key is a `watch` channel, so subscribers always see the latest value
/// and intermediate writes may collapse. Keys are never removed from the map;
/// deleting stores `None` so that existing watches keep working.
#[derive(Default)]
pub struct InMemorySignalingStore {
    entries: DashMap<String, watch::Sender<Option<Value>>>,
    rejected: DashSet<String>,
}

impl InMemorySignalingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every later write to keys starting with `prefix`.
    pub fn reject_writes(&self, prefix: impl Into<String>) {
        self.rejected.insert(prefix.into());
    }

    pub fn allow_writes(&self, prefix: &str) {
        self.rejected.remove(prefix);
    }

    /// Keys currently holding a value, sorted.
    pub fn live_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().borrow().is_some())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn sender(&self, key: &str) -> watch::Sender<Option<Value>> {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.rejected.iter().any(|prefix| key.starts_with(prefix.as_str())) {
            return Err(StoreError::Rejected(key.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingStore for InMemorySignalingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .entries
            .get(key)
            .and_then(|sender| sender.borrow().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check_writable(key)?;
        trace!("set {}", key);
        self.sender(key).send_replace(Some(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        if let Some(sender) = self.entries.get(key) {
            trace!("delete {}", key);
            sender.send_if_modified(|v| v.take().is_some());
        }
        Ok(())
    }

    async fn append(&self, key: &str, entry: Value) -> Result<()> {
        self.check_writable(key)?;
        let mut outcome = Ok(());
        self.sender(key).send_if_modified(|current| match current {
            Some(Value::Array(entries)) => {
                entries.push(entry);
                true
            }
            None => {
                *current = Some(Value::Array(vec![entry]));
                true
            }
            Some(_) => {
                outcome = Err(StoreError::NotACollection(key.to_string()));
                false
            }
        });
        outcome
    }

    async fn watch(&self, key: &str) -> Result<WatchStream> {
        let mut rx = self.sender(key).subscribe();
        let initial = rx.borrow_and_update().clone();
        let updates = stream::unfold(rx, |mut rx| async move {
            rx.changed().await.ok()?;
            let value = rx.borrow_and_update().clone();
            Some((value, rx))
        });
        Ok(stream::once(async move { initial }).chain(updates).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemorySignalingStore::new();
        assert_eq!(store.get("calls/s/status").await.unwrap(), None);

        store.set("calls/s/status", json!("active")).await.unwrap();
        assert_eq!(
            store.get("calls/s/status").await.unwrap(),
            Some(json!("active"))
        );

        store.delete("calls/s/status").await.unwrap();
        store.delete("calls/s/status").await.unwrap();
        store.delete("never/written").await.unwrap();
        assert_eq!(store.get("calls/s/status").await.unwrap(), None);
        assert!(store.live_keys().is_empty());
    }

    #[tokio::test]
    async fn test_watch_starts_with_current_value() {
        let store = InMemorySignalingStore::new();
        store.set("k", json!(1)).await.unwrap();

        let mut watch = store.watch("k").await.unwrap();
        assert_eq!(watch.next().await, Some(Some(json!(1))));

        store.set("k", json!(2)).await.unwrap();
        assert_eq!(watch.next().await, Some(Some(json!(2))));

        store.delete("k").await.unwrap();
        assert_eq!(watch.next().await, Some(None));
    }

    #[tokio::test]
    async fn test_watch_collapses_to_latest() {
        let store = InMemorySignalingStore::new();
        let mut watch = store.watch("k").await.unwrap();
        assert_eq!(watch.next().await, Some(None));

        store.set("k", json!("a")).await.unwrap();
        store.set("k", json!("b")).await.unwrap();
        assert_eq!(watch.next().await, Some(Some(json!("b"))));
    }

    #[tokio::test]
    async fn test_append_builds_collection() {
        let store = InMemorySignalingStore::new();
        store.append("c", json!({"n": 1})).await.unwrap();
        store.append("c", json!({"n": 2})).await.unwrap();
        assert_eq!(
            store.get("c").await.unwrap(),
            Some(json!([{"n": 1}, {"n": 2}]))
        );

        store.set("scalar", json!("x")).await.unwrap();
        assert!(matches!(
            store.append("scalar", json!(1)).await,
            Err(StoreError::NotACollection(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_prefix() {
        let store = InMemorySignalingStore::new();
        store.reject_writes("users/");
        assert!(matches!(
            store.set("users/bob/incomingCall", json!({})).await,
            Err(StoreError::Rejected(_))
        ));
        store.set("calls/s/status", json!("active")).await.unwrap();

        store.allow_writes("users/");
        store.set("users/bob/incomingCall", json!({})).await.unwrap();
        assert_eq!(
            store.live_keys(),
            vec!["calls/s/status", "users/bob/incomingCall"]
        );
    }
}
