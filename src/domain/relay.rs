//! Relay store port
//!
//! A hierarchical key-value publish/subscribe service used purely as a
//! signaling transport. Keys form a `/`-separated tree; a key either holds
//! a single value (last-write-wins) or a set of pushed children
//! (append-only).

use crate::domain::shared::result::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Relay store port.
///
/// Subscriptions are continuous: an initial snapshot is delivered
/// immediately when data already exists, followed by one notification per
/// change (values) or per new child (lists). Delivery is at-least-once and
/// in order per key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Overwrite the single value at `path`.
    async fn set(&self, path: &str, value: String) -> Result<()>;

    /// Append a child with an auto-generated id under `path`.
    async fn push(&self, path: &str, value: String) -> Result<()>;

    /// Subscribe to the single value at `path`.
    async fn subscribe_value(&self, path: &str) -> Result<mpsc::Receiver<String>>;

    /// Subscribe to the children of `path`: every existing child once,
    /// then every new child.
    async fn subscribe_children(&self, path: &str) -> Result<mpsc::Receiver<String>>;

    /// Delete `path` and its entire subtree. Best-effort.
    async fn remove(&self, path: &str) -> Result<()>;
}
