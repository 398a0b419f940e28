//! Populate the inventory's current state from clusters.

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::Result;
use drift_core::Resource;
use drift_store::ResourceInventory;
use futures::StreamExt;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{ClusterClient, ClusterMap};

/// One (cluster, namespace, kind) slot to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentStateSpec {
    pub cluster: String,
    pub namespace: String,
    pub kind: String,
    #[serde(default)]
    pub resource_names: Option<Vec<String>>,
    #[serde(default)]
    pub privileged: bool,
}

pub fn fetch_concurrency() -> usize {
    std::env::var("DRIFT_FETCH_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(10)
}

/// Read one slot into the inventory. Returns how many objects were added.
pub async fn populate_current_state(
    spec: &CurrentStateSpec,
    ri: &ResourceInventory,
    client: &dyn ClusterClient,
    integration: &str,
    integration_version: &str,
) -> Result<usize> {
    if !client.is_kind_supported(&spec.kind).await? {
        warn!(cluster = %spec.cluster, kind = %spec.kind, "kind not served; skipping");
        return Ok(0);
    }
    let items = client.list_items(&spec.kind, &spec.namespace, spec.resource_names.as_deref()).await?;
    let mut added = 0;
    for item in items {
        let resource = Resource::new_unchecked(item, integration, integration_version);
        let name = resource.name().to_string();
        ri.add_current(&spec.cluster, &spec.namespace, &spec.kind, &name, resource)?;
        added += 1;
    }
    debug!(cluster = %spec.cluster, namespace = %spec.namespace, kind = %spec.kind, added, "current state populated");
    Ok(added)
}

/// Run every spec through a pool of at most `concurrency` tasks.
/// A failing slot registers an error for its cluster; the rest carry on.
pub async fn fetch_current_state(
    specs: Vec<CurrentStateSpec>,
    ri: &ResourceInventory,
    clusters: &ClusterMap,
    integration: &str,
    integration_version: &str,
    concurrency: usize,
) {
    let t0 = Instant::now();
    let total = specs.len();
    futures::stream::iter(specs)
        .for_each_concurrent(concurrency.max(1), |spec| async move {
            let Some(client) = clusters.get(&spec.cluster, spec.privileged) else {
                warn!(cluster = %spec.cluster, privileged = spec.privileged, "no client for cluster");
                ri.register_error(Some(&spec.cluster));
                return;
            };
            let started = Instant::now();
            match populate_current_state(&spec, ri, client.as_ref(), integration, integration_version).await {
                Ok(_) => {
                    histogram!("drift_fetch_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
                }
                Err(e) => {
                    warn!(cluster = %spec.cluster, namespace = %spec.namespace, kind = %spec.kind, error = %e, "fetch failed");
                    counter!("drift_fetch_errors_total", 1u64);
                    ri.register_error(Some(&spec.cluster));
                }
            }
        })
        .await;
    info!(slots = total, took_ms = %t0.elapsed().as_millis(), "current state fetched");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockCluster;
    use serde_json::json;
    use std::sync::Arc;

    fn spec(cluster: &str, kind: &str) -> CurrentStateSpec {
        CurrentStateSpec { cluster: cluster.into(), namespace: "ns".into(), kind: kind.into(), resource_names: None, privileged: false }
    }

    #[tokio::test]
    async fn unsupported_kind_is_skipped_without_listing() {
        let ri = ResourceInventory::new();
        ri.initialize_resource_type("c1", "ns", "Route", None);
        let mock = MockCluster::new().with_unsupported_kind("Route");
        let added = populate_current_state(&spec("c1", "Route"), &ri, &mock, "t", "1.0.0").await.unwrap();
        assert_eq!(added, 0);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn names_restrict_the_fetch() {
        let ri = ResourceInventory::new();
        ri.initialize_resource_type("c1", "ns", "ConfigMap", None);
        let mock = MockCluster::new()
            .with_object("ns", json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}}))
            .with_object("ns", json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "b"}}));
        let mut s = spec("c1", "ConfigMap");
        s.resource_names = Some(vec!["b".into()]);
        populate_current_state(&s, &ri, &mock, "t", "1.0.0").await.unwrap();
        assert!(ri.get_current("c1", "ns", "ConfigMap", "b").is_some());
        assert!(ri.get_current("c1", "ns", "ConfigMap", "a").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_are_isolated_per_cluster() {
        let ri = ResourceInventory::new();
        for c in ["good", "bad", "absent"] {
            ri.initialize_resource_type(c, "ns", "ConfigMap", None);
        }
        let mut clusters = ClusterMap::new();
        clusters.insert(
            "good",
            Arc::new(MockCluster::new().with_object("ns", json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}}))),
        );
        clusters.insert("bad", Arc::new(MockCluster::new().with_failing_list()));
        let specs = vec![spec("good", "ConfigMap"), spec("bad", "ConfigMap"), spec("absent", "ConfigMap")];
        fetch_current_state(specs, &ri, &clusters, "t", "1.0.0", 2).await;
        assert!(ri.get_current("good", "ns", "ConfigMap", "a").is_some());
        assert!(!ri.has_error_registered(Some("good")));
        assert!(ri.has_error_registered(Some("bad")));
        assert!(ri.has_error_registered(Some("absent")));
    }
}
