//! In-process relay store
//!
//! A process-local key/value tree with the same observable semantics the
//! engine expects from a hosted realtime database: value subscriptions
//! replay the current value on attach, child subscriptions replay existing
//! children in insertion-id order, and `remove` deletes a whole subtree.
//!
//! Backs the demo binary and the integration tests. Delivery is
//! at-least-once and in order per key: a slow subscriber backpressures
//! the writer rather than losing updates; a closed one is pruned.

use crate::domain::relay::RelayStore;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

const SUBSCRIPTION_BUFFER: usize = 32;

#[derive(Default)]
struct RelayInner {
    /// Full path -> raw value. BTreeMap keeps child replay ordered.
    values: BTreeMap<String, String>,
    value_subs: HashMap<String, Vec<mpsc::Sender<String>>>,
    child_subs: HashMap<String, Vec<mpsc::Sender<String>>>,
}

#[derive(Default)]
pub struct InMemoryRelay {
    inner: Mutex<RelayInner>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored under `path` (the key itself plus
    /// its subtree). Used by tests to check teardown.
    pub async fn key_count(&self, path: &str) -> usize {
        let prefix = format!("{path}/");
        let inner = self.inner.lock().await;
        inner
            .values
            .keys()
            .filter(|k| *k == path || k.starts_with(&prefix))
            .count()
    }

    /// Prune closed subscribers and hand back live senders so delivery
    /// can await channel capacity without holding the store lock.
    fn live_senders(subs: &mut Vec<mpsc::Sender<String>>) -> Vec<mpsc::Sender<String>> {
        subs.retain(|tx| !tx.is_closed());
        subs.clone()
    }
}

#[async_trait]
impl RelayStore for InMemoryRelay {
    async fn set(&self, path: &str, value: String) -> Result<()> {
        let senders = {
            let mut inner = self.inner.lock().await;
            inner.values.insert(path.to_string(), value.clone());
            match inner.value_subs.get_mut(path) {
                Some(subs) => Self::live_senders(subs),
                None => Vec::new(),
            }
        };
        for tx in senders {
            let _ = tx.send(value.clone()).await;
        }
        Ok(())
    }

    async fn push(&self, path: &str, value: String) -> Result<()> {
        let child = format!("{path}/{}", Uuid::new_v4());
        let senders = {
            let mut inner = self.inner.lock().await;
            inner.values.insert(child, value.clone());
            match inner.child_subs.get_mut(path) {
                Some(subs) => Self::live_senders(subs),
                None => Vec::new(),
            }
        };
        for tx in senders {
            let _ = tx.send(value.clone()).await;
        }
        Ok(())
    }

    async fn subscribe_value(&self, path: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.values.get(path) {
            let _ = tx.try_send(existing.clone());
        }
        inner
            .value_subs
            .entry(path.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn subscribe_children(&self, path: &str) -> Result<mpsc::Receiver<String>> {
        let prefix = format!("{path}/");
        let mut inner = self.inner.lock().await;
        let existing: Vec<String> = inner
            .values
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect();
        // the replay must fit the channel whole, the snapshot would be
        // torn otherwise
        let (tx, rx) = mpsc::channel(existing.len().max(SUBSCRIPTION_BUFFER));
        for value in existing {
            let _ = tx.try_send(value);
        }
        inner
            .child_subs
            .entry(path.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let prefix = format!("{path}/");
        let mut inner = self.inner.lock().await;
        inner
            .values
            .retain(|k, _| k != path && !k.starts_with(&prefix));
        Ok(())
    }
}
