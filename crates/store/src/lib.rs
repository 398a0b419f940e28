//! Drift store: the per-run resource inventory.
//!
//! Buckets are keyed by (cluster, namespace, resource type) and hold the
//! current and desired resources for that slot. Writers and point reads go
//! through a single mutex; iteration works on an immutable snapshot that is
//! published on demand.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use drift_core::Resource;
use indexmap::IndexMap;
use metrics::gauge;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub cluster: String,
    pub namespace: String,
    pub resource_type: String,
}

impl BucketKey {
    pub fn new(cluster: impl Into<String>, namespace: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self { cluster: cluster.into(), namespace: namespace.into(), resource_type: resource_type.into() }
    }

    pub fn resource(&self, name: impl Into<String>) -> ResourceKey {
        ResourceKey { bucket: self.clone(), name: name.into() }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.cluster, self.namespace, self.resource_type)
    }
}

/// Uniquely identifies one slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub bucket: BucketKey,
    pub name: String,
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}/{}", self.bucket, self.name) }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("resource {0} already registered as desired")]
    KeyExists(String),
    #[error("resource {0} is not in the managed names of its type")]
    NotManaged(String),
    #[error("resource type {0} was never initialized")]
    UnknownResourceType(BucketKey),
}

#[derive(Debug, Clone, Default)]
pub struct ResourceBucket {
    pub current: IndexMap<String, Arc<Resource>>,
    pub desired: IndexMap<String, Arc<Resource>>,
    /// Per-name privileged-apply flag.
    pub privileged: FxHashMap<String, bool>,
    pub managed_names: Option<FxHashSet<String>>,
}

impl ResourceBucket {
    pub fn is_privileged(&self, name: &str) -> bool { self.privileged.get(name).copied().unwrap_or(false) }
}

/// Immutable point-in-time view of an inventory.
#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    buckets: IndexMap<BucketKey, Arc<ResourceBucket>>,
    error_registered: bool,
    error_clusters: FxHashSet<String>,
}

impl InventorySnapshot {
    pub fn len(&self) -> usize { self.buckets.len() }
    pub fn is_empty(&self) -> bool { self.buckets.is_empty() }
    pub fn bucket(&self, key: &BucketKey) -> Option<&Arc<ResourceBucket>> { self.buckets.get(key) }

    /// Buckets in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&BucketKey, &Arc<ResourceBucket>)> { self.buckets.iter() }

    /// A bucket is copied only while a published snapshot still shares it.
    fn bucket_mut(&mut self, key: &BucketKey) -> Result<&mut ResourceBucket, InventoryError> {
        self.buckets
            .get_mut(key)
            .map(Arc::make_mut)
            .ok_or_else(|| InventoryError::UnknownResourceType(key.clone()))
    }
}

/// One-shot iterator over the buckets of a snapshot taken when it was created.
pub struct Buckets {
    snap: Arc<InventorySnapshot>,
    pos: usize,
}

impl Iterator for Buckets {
    type Item = (BucketKey, Arc<ResourceBucket>);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, bucket) = self.snap.buckets.get_index(self.pos)?;
        self.pos += 1;
        Some((key.clone(), Arc::clone(bucket)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.snap.buckets.len().saturating_sub(self.pos);
        (rem, Some(rem))
    }
}

/// Concurrent-safe inventory of current and desired state for one run.
///
/// Writers edit the live state in place under one mutex. Readers load the
/// last published snapshot; the first read after a write republishes it.
pub struct ResourceInventory {
    live: Mutex<InventorySnapshot>,
    published: ArcSwap<InventorySnapshot>,
    stale: AtomicBool,
}

impl Default for ResourceInventory {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for ResourceInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceInventory").field("buckets", &self.lock().len()).finish()
    }
}

impl ResourceInventory {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(InventorySnapshot::default()),
            published: ArcSwap::from_pointee(InventorySnapshot::default()),
            stale: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InventorySnapshot> { self.live.lock().unwrap_or_else(PoisonError::into_inner) }

    /// In-place update of the live state; marks the published snapshot stale on success.
    fn mutate<T>(&self, f: impl FnOnce(&mut InventorySnapshot) -> Result<T, InventoryError>) -> Result<T, InventoryError> {
        let mut live = self.lock();
        let out = f(&mut live)?;
        self.stale.store(true, Ordering::Release);
        Ok(out)
    }

    /// Create the bucket if absent; an existing bucket (and its managed names) is left alone.
    pub fn initialize_resource_type(&self, cluster: &str, namespace: &str, resource_type: &str, managed_names: Option<Vec<String>>) {
        let key = BucketKey::new(cluster, namespace, resource_type);
        let _ = self.mutate(|snap| {
            snap.buckets.entry(key).or_insert_with(|| {
                Arc::new(ResourceBucket {
                    managed_names: managed_names.map(|names| names.into_iter().collect()),
                    ..ResourceBucket::default()
                })
            });
            Ok(())
        });
    }

    pub fn is_cluster_present(&self, cluster: &str) -> bool {
        self.lock().buckets.keys().any(|k| k.cluster == cluster)
    }

    pub fn add_desired(
        &self,
        cluster: &str,
        namespace: &str,
        resource_type: &str,
        name: &str,
        resource: Resource,
        privileged: bool,
    ) -> Result<(), InventoryError> {
        let key = BucketKey::new(cluster, namespace, resource_type);
        self.mutate(|snap| {
            let bucket = snap.bucket_mut(&key)?;
            if let Some(managed) = &bucket.managed_names {
                if !managed.contains(name) {
                    return Err(InventoryError::NotManaged(name.to_string()));
                }
            }
            if bucket.desired.contains_key(name) {
                return Err(InventoryError::KeyExists(name.to_string()));
            }
            bucket.desired.insert(name.to_string(), Arc::new(resource));
            bucket.privileged.insert(name.to_string(), privileged);
            Ok(())
        })?;
        debug!(%key, name, "desired resource registered");
        Ok(())
    }

    /// Register under `Kind.group` when that bucket exists, else under the bare kind.
    pub fn add_desired_resource(&self, cluster: &str, namespace: &str, resource: Resource, privileged: bool) -> Result<(), InventoryError> {
        let qualified = resource.kind_and_group();
        let key = BucketKey::new(cluster, namespace, qualified.as_str());
        let resource_type = if self.lock().buckets.contains_key(&key) { qualified } else { resource.kind().to_string() };
        let name = resource.name().to_string();
        self.add_desired(cluster, namespace, &resource_type, &name, resource, privileged)
    }

    /// Upsert into `current`.
    pub fn add_current(&self, cluster: &str, namespace: &str, resource_type: &str, name: &str, resource: Resource) -> Result<(), InventoryError> {
        let key = BucketKey::new(cluster, namespace, resource_type);
        self.mutate(|snap| {
            snap.bucket_mut(&key)?.current.insert(name.to_string(), Arc::new(resource));
            Ok(())
        })
    }

    pub fn get_desired(&self, cluster: &str, namespace: &str, resource_type: &str, name: &str) -> Option<Arc<Resource>> {
        let key = BucketKey::new(cluster, namespace, resource_type);
        self.lock().buckets.get(&key).and_then(|b| b.desired.get(name).cloned())
    }

    pub fn get_desired_by_type(&self, cluster: &str, namespace: &str, resource_type: &str) -> Option<IndexMap<String, Arc<Resource>>> {
        let key = BucketKey::new(cluster, namespace, resource_type);
        self.lock().buckets.get(&key).map(|b| b.desired.clone())
    }

    pub fn get_current(&self, cluster: &str, namespace: &str, resource_type: &str, name: &str) -> Option<Arc<Resource>> {
        let key = BucketKey::new(cluster, namespace, resource_type);
        self.lock().buckets.get(&key).and_then(|b| b.current.get(name).cloned())
    }

    /// Lock-free unless writes happened since the last publish.
    pub fn snapshot(&self) -> Arc<InventorySnapshot> {
        if self.stale.load(Ordering::Acquire) {
            let live = self.lock();
            if self.stale.swap(false, Ordering::AcqRel) {
                self.published.store(Arc::new(live.clone()));
            }
        }
        self.published.load_full()
    }

    /// Lazily walk every initialized bucket in registration order.
    pub fn iter(&self) -> Buckets { Buckets { snap: self.snapshot(), pos: 0 } }

    pub fn register_error(&self, cluster: Option<&str>) {
        let _ = self.mutate(|snap| {
            snap.error_registered = true;
            if let Some(cluster) = cluster {
                snap.error_clusters.insert(cluster.to_string());
            }
            Ok(())
        });
    }

    pub fn has_error_registered(&self, cluster: Option<&str>) -> bool {
        let snap = self.lock();
        match cluster {
            Some(cluster) => snap.error_clusters.contains(cluster),
            None => snap.error_registered,
        }
    }

    /// Emit one gauge per bucket and state with the number of resources held.
    pub fn publish_gauges(&self, integration: &str) {
        for (key, bucket) in self.iter() {
            for (state, count) in [("current", bucket.current.len()), ("desired", bucket.desired.len())] {
                gauge!(
                    "drift_resource_inventory",
                    count as f64,
                    "integration" => integration.to_string(),
                    "cluster" => key.cluster.clone(),
                    "namespace" => key.namespace.clone(),
                    "kind" => key.resource_type.clone(),
                    "state" => state
                );
            }
        }
    }
}

impl<'a> IntoIterator for &'a ResourceInventory {
    type Item = (BucketKey, Arc<ResourceBucket>);
    type IntoIter = Buckets;

    fn into_iter(self) -> Buckets { self.iter() }
}
