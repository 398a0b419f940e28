//! Drift kubehub: the cluster client seam and current-state fetching.
//!
//! The reconciler never talks to a cluster directly; it goes through
//! [`ClusterClient`]. [`KubeClusterClient`] is the kube-rs implementation,
//! [`MockCluster`] an in-memory one for tests and dry runs.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value as Json;

mod client;
mod fetch;
mod mock;

pub use client::{KubeClusterClient, FIELD_MANAGER};
pub use fetch::{fetch_concurrency, fetch_current_state, populate_current_state, CurrentStateSpec};
pub use mock::{MockCall, MockCluster};

/// Operations the reconciler needs from one cluster.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Whether the cluster serves `kind` (`Kind` or `Kind.group`).
    async fn is_kind_supported(&self, kind: &str) -> Result<bool>;

    /// Objects of `kind` in `namespace`, restricted to `names` when given.
    async fn list_items(&self, kind: &str, namespace: &str, names: Option<&[String]>) -> Result<Vec<Json>>;

    async fn apply(&self, namespace: &str, body: &Json) -> Result<()>;

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<()>;
}

/// Split `Kind.group` into its kind and optional group.
pub fn split_kind(kind: &str) -> (&str, Option<&str>) {
    match kind.split_once('.') {
        Some((k, g)) => (k, Some(g)),
        None => (kind, None),
    }
}

/// Clients per cluster, with an optional privileged client for admin applies.
#[derive(Clone, Default)]
pub struct ClusterMap {
    clients: HashMap<String, Arc<dyn ClusterClient>>,
    privileged: HashMap<String, Arc<dyn ClusterClient>>,
}

impl std::fmt::Debug for ClusterMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterMap")
            .field("clusters", &self.clients.keys().collect::<Vec<_>>())
            .field("privileged", &self.privileged.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ClusterMap {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, cluster: impl Into<String>, client: Arc<dyn ClusterClient>) {
        self.clients.insert(cluster.into(), client);
    }

    pub fn insert_privileged(&mut self, cluster: impl Into<String>, client: Arc<dyn ClusterClient>) {
        self.privileged.insert(cluster.into(), client);
    }

    /// Privileged lookups never fall back to the regular client.
    pub fn get(&self, cluster: &str, privileged: bool) -> Option<Arc<dyn ClusterClient>> {
        let map = if privileged { &self.privileged } else { &self.clients };
        map.get(cluster).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_kind_handles_dotted_groups() {
        assert_eq!(split_kind("Kind.fully.qualified"), ("Kind", Some("fully.qualified")));
        assert_eq!(split_kind("Secret"), ("Secret", None));
    }

    #[test]
    fn privileged_lookup_does_not_fall_back() {
        let mut map = ClusterMap::new();
        map.insert("c1", Arc::new(MockCluster::new()));
        assert!(map.get("c1", false).is_some());
        assert!(map.get("c1", true).is_none());
        map.insert_privileged("c1", Arc::new(MockCluster::new()));
        assert!(map.get("c1", true).is_some());
        assert!(map.get("c2", false).is_none());
    }
}
