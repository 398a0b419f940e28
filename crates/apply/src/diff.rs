//! Classification of one bucket into add / change / identical / delete.

#![forbid(unsafe_code)]

use std::sync::Arc;

use drift_core::prelude::*;
use drift_store::ResourceBucket;

use crate::options::DiffStrategy;

#[derive(Debug, Clone)]
pub struct DiffPair {
    pub current: Arc<Resource>,
    pub desired: Arc<Resource>,
}

/// Names keep the bucket's registration order.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub add: Vec<(String, Arc<Resource>)>,
    pub change: Vec<(String, DiffPair)>,
    pub identical: Vec<(String, DiffPair)>,
    pub delete: Vec<(String, Arc<Resource>)>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.change.is_empty() && self.delete.is_empty()
    }
}

pub fn is_identical(desired: &Resource, current: &Resource, strategy: DiffStrategy) -> bool {
    match strategy {
        DiffStrategy::Semantic => desired.semantically_eq(current),
        DiffStrategy::ThreeWayDigest => {
            current.annotation(annotations::SHA256SUM) == Some(desired.sha256sum().as_str()) && current.has_valid_sha256sum()
        }
    }
}

pub fn diff_bucket(bucket: &ResourceBucket, strategy: DiffStrategy) -> DiffResult {
    let mut out = DiffResult::default();
    for (name, desired) in &bucket.desired {
        match bucket.current.get(name) {
            None => out.add.push((name.clone(), Arc::clone(desired))),
            Some(current) => {
                let pair = DiffPair { current: Arc::clone(current), desired: Arc::clone(desired) };
                if is_identical(desired, current, strategy) {
                    out.identical.push((name.clone(), pair));
                } else {
                    out.change.push((name.clone(), pair));
                }
            }
        }
    }
    for (name, current) in &bucket.current {
        if !bucket.desired.contains_key(name) {
            out.delete.push((name.clone(), Arc::clone(current)));
        }
    }
    out
}
