//! In-memory item store shared between pages.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Items kept for the lifetime of the service, keyed by item id.
///
/// Forum pages use it to remember report statuses per post
/// (`{timestamp, status}`) so later page loads can show indicators.
#[derive(Debug, Default)]
pub struct ListStore {
    items: RwLock<HashMap<String, Value>>,
}

impl ListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an item, replacing any previous value.
    pub async fn put(&self, item_id: impl Into<String>, item: Value) {
        self.items.write().await.insert(item_id.into(), item);
    }

    pub async fn get(&self, item_id: &str) -> Option<Value> {
        self.items.read().await.get(item_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_replaces_existing_item() {
        let store = ListStore::new();
        assert!(store.is_empty().await);

        store.put("123", json!({"status": "Unhandled"})).await;
        store.put("123", json!({"status": "Good"})).await;

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("123").await, Some(json!({"status": "Good"})));
        assert_eq!(store.get("456").await, None);
    }
}
