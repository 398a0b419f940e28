//! In-memory [`ClusterClient`] for tests and offline planning.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use serde_json::Value as Json;

use crate::{split_kind, ClusterClient};

/// A recorded call against a [`MockCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    List { kind: String, namespace: String },
    Apply { kind: String, namespace: String, name: String },
    Delete { kind: String, namespace: String, name: String },
}

/// Objects keyed by (bare kind, namespace, name). Applies upsert, deletes remove.
/// Objects with only `generateName` get a fresh name on every apply.
#[derive(Debug, Default)]
pub struct MockCluster {
    objects: Mutex<BTreeMap<(String, String, String), Json>>,
    calls: Mutex<Vec<MockCall>>,
    generated: AtomicUsize,
    unsupported: HashSet<String>,
    failing: HashSet<String>,
    fail_list: bool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

fn bare(kind: &str) -> String { split_kind(kind).0.to_string() }

impl MockCluster {
    pub fn new() -> Self { Self::default() }

    /// Seed an object; kind and name are read from the document.
    pub fn with_object(self, namespace: &str, body: Json) -> Self {
        self.put(namespace, body);
        self
    }

    pub fn with_unsupported_kind(mut self, kind: &str) -> Self {
        self.unsupported.insert(bare(kind));
        self
    }

    /// Applies and deletes of `name` fail.
    pub fn with_failing_name(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn with_failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> { lock(&self.calls).clone() }

    pub fn object(&self, kind: &str, namespace: &str, name: &str) -> Option<Json> {
        lock(&self.objects).get(&(bare(kind), namespace.to_string(), name.to_string())).cloned()
    }

    pub fn len(&self) -> usize { lock(&self.objects).len() }
    pub fn is_empty(&self) -> bool { lock(&self.objects).is_empty() }

    fn put(&self, namespace: &str, body: Json) -> Option<(String, String)> {
        let kind = body.get("kind").and_then(Json::as_str)?.to_string();
        let name = body.pointer("/metadata/name").and_then(Json::as_str)?.to_string();
        lock(&self.objects).insert((kind.clone(), namespace.to_string(), name.clone()), body);
        Some((kind, name))
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockCluster {
    async fn is_kind_supported(&self, kind: &str) -> Result<bool> { Ok(!self.unsupported.contains(&bare(kind))) }

    async fn list_items(&self, kind: &str, namespace: &str, names: Option<&[String]>) -> Result<Vec<Json>> {
        lock(&self.calls).push(MockCall::List { kind: kind.to_string(), namespace: namespace.to_string() });
        if self.fail_list {
            return Err(anyhow!("listing {} in {} failed", kind, namespace));
        }
        let kind = bare(kind);
        let objects = lock(&self.objects);
        Ok(objects
            .iter()
            .filter(|((k, ns, name), _)| *k == kind && ns == namespace && names.map_or(true, |n| n.contains(name)))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn apply(&self, namespace: &str, body: &Json) -> Result<()> {
        let mut body = body.clone();
        let kind = body.get("kind").and_then(Json::as_str).unwrap_or("").to_string();
        let name = match body.pointer("/metadata/name").and_then(Json::as_str) {
            Some(name) => name.to_string(),
            None => match body.pointer("/metadata/generateName").and_then(Json::as_str) {
                Some(prefix) => {
                    let name = format!("{}{:05x}", prefix, self.generated.fetch_add(1, Ordering::Relaxed));
                    body["metadata"]["name"] = Json::String(name.clone());
                    name
                }
                None => String::new(),
            },
        };
        lock(&self.calls).push(MockCall::Apply { kind: kind.clone(), namespace: namespace.to_string(), name: name.clone() });
        if self.failing.contains(&name) {
            return Err(anyhow!("apply of {} {}/{} rejected", kind, namespace, name));
        }
        self.put(namespace, body).ok_or_else(|| anyhow!("object missing kind or metadata.name"))?;
        Ok(())
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<()> {
        lock(&self.calls).push(MockCall::Delete { kind: kind.to_string(), namespace: namespace.to_string(), name: name.to_string() });
        if self.failing.contains(name) {
            return Err(anyhow!("delete of {} {}/{} rejected", kind, namespace, name));
        }
        lock(&self.objects).remove(&(bare(kind), namespace.to_string(), name.to_string()));
        Ok(())
    }
}
