//! Ownership policy and action planning.

#![forbid(unsafe_code)]

use std::sync::Arc;

use drift_core::Resource;
use drift_store::{BucketKey, ResourceBucket, ResourceInventory, ResourceKey};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::diff::{diff_bucket, DiffPair};
use crate::options::ReconcileOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    New,
    Changed,
    /// Content unchanged; ownership annotations are rewritten.
    Adopted,
    Obsolete,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "verb", rename_all = "lowercase")]
pub enum ActionPayload {
    /// The resource is already annotated for this run.
    Apply { resource: Arc<Resource> },
    Delete { name: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub cluster: String,
    pub namespace: String,
    pub resource_type: String,
    #[serde(flatten)]
    pub payload: ActionPayload,
    pub privileged: bool,
    pub reason: Reason,
}

impl Action {
    pub fn verb(&self) -> &'static str {
        match self.payload {
            ActionPayload::Apply { .. } => "apply",
            ActionPayload::Delete { .. } => "delete",
        }
    }

    pub fn name(&self) -> &str {
        match &self.payload {
            ActionPayload::Apply { resource } => resource.name(),
            ActionPayload::Delete { name } => name,
        }
    }

    pub fn key(&self) -> ResourceKey {
        BucketKey::new(self.cluster.as_str(), self.namespace.as_str(), self.resource_type.as_str()).resource(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Ownership {
    /// No owner recorded, or owned by this caller.
    Ours,
    Retired,
    TakeOver,
    Conflict(String),
}

/// Turns inventory buckets into actions under one set of options.
#[derive(Debug)]
pub struct Planner<'a> {
    ri: &'a ResourceInventory,
    options: &'a ReconcileOptions,
    deletion_enabled: bool,
}

impl<'a> Planner<'a> {
    /// Deletion is decided here: errors registered before planning disable it unless overridden.
    pub fn new(ri: &'a ResourceInventory, options: &'a ReconcileOptions) -> Self {
        let deletion_enabled =
            options.override_enable_deletion || (options.enable_deletion && !ri.has_error_registered(None));
        if options.enable_deletion && !deletion_enabled {
            warn!("delete actions are disabled due to previous errors");
        }
        Self { ri, options, deletion_enabled }
    }

    pub fn deletion_enabled(&self) -> bool { self.deletion_enabled }

    /// Actions for every bucket, in bucket registration order.
    pub fn plan(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        for (key, bucket) in self.ri.iter() {
            actions.extend(self.plan_bucket(&key, &bucket));
        }
        actions
    }

    /// Order within a bucket: adds, changes, adoptions, deletes.
    pub fn plan_bucket(&self, key: &BucketKey, bucket: &ResourceBucket) -> Vec<Action> {
        let diff = diff_bucket(bucket, self.options.strategy);
        let mut actions = Vec::new();

        for (name, desired) in &diff.add {
            actions.push(self.apply(key, bucket, name, desired, Reason::New));
        }
        for (name, DiffPair { current, desired }) in &diff.change {
            match self.ownership(current) {
                Ownership::Conflict(owner) => self.conflict(key, name, &owner),
                _ => actions.push(self.apply(key, bucket, name, desired, Reason::Changed)),
            }
        }
        for (name, DiffPair { current, desired }) in &diff.identical {
            match self.ownership(current) {
                Ownership::Ours => {}
                Ownership::Conflict(owner) => self.conflict(key, name, &owner),
                Ownership::Retired | Ownership::TakeOver => {
                    actions.push(self.apply(key, bucket, name, desired, Reason::Adopted))
                }
            }
        }
        for (name, current) in &diff.delete {
            if self.may_delete(key, name, current) {
                info!(action = ?["delete", key.cluster.as_str(), key.namespace.as_str(), key.resource_type.as_str(), name.as_str()], "planned");
                actions.push(Action {
                    cluster: key.cluster.clone(),
                    namespace: key.namespace.clone(),
                    resource_type: key.resource_type.clone(),
                    payload: ActionPayload::Delete { name: name.clone() },
                    privileged: self.is_privileged(bucket, name),
                    reason: Reason::Obsolete,
                });
            }
        }
        actions
    }

    fn is_privileged(&self, bucket: &ResourceBucket, name: &str) -> bool {
        self.options.privileged || bucket.is_privileged(name)
    }

    fn apply(&self, key: &BucketKey, bucket: &ResourceBucket, name: &str, desired: &Resource, reason: Reason) -> Action {
        let annotated = if desired.caller_name().is_none() && self.options.caller.is_some() {
            desired.clone().with_caller(self.options.caller.clone()).annotate()
        } else {
            desired.annotate()
        };
        info!(action = ?["apply", key.cluster.as_str(), key.namespace.as_str(), key.resource_type.as_str(), name], reason = ?reason, "planned");
        Action {
            cluster: key.cluster.clone(),
            namespace: key.namespace.clone(),
            resource_type: key.resource_type.clone(),
            payload: ActionPayload::Apply { resource: Arc::new(annotated) },
            privileged: self.is_privileged(bucket, name),
            reason,
        }
    }

    fn ownership(&self, current: &Resource) -> Ownership {
        let Some(owner) = current.caller() else { return Ownership::Ours };
        if self.options.caller.as_deref() == Some(owner) {
            Ownership::Ours
        } else if self.options.take_over {
            Ownership::TakeOver
        } else if self.options.is_active_caller(owner) {
            Ownership::Conflict(owner.to_string())
        } else {
            Ownership::Retired
        }
    }

    fn conflict(&self, key: &BucketKey, name: &str, owner: &str) {
        error!(
            cluster = %key.cluster,
            namespace = %key.namespace,
            kind = %key.resource_type,
            name,
            owner,
            caller = ?self.options.caller,
            "resource is owned by another active caller; skipping"
        );
        counter!("drift_conflicts_total", 1u64);
        self.ri.register_error(Some(&key.cluster));
    }

    fn may_delete(&self, key: &BucketKey, name: &str, current: &Resource) -> bool {
        if !self.deletion_enabled {
            debug!(%key, name, "deletion disabled; skipping");
            return false;
        }
        if current.has_owner_reference() {
            debug!(%key, name, "has ownerReferences; skipping delete");
            return false;
        }
        if !current.has_reconciler_annotations() && !self.options.is_authoritative(&key.resource_type) {
            debug!(%key, name, "not owned by this integration; skipping delete");
            return false;
        }
        if let Some(caller) = self.options.caller.as_deref() {
            if current.caller() != Some(caller) {
                warn!(%key, name, owner = ?current.caller(), caller, "owned by another caller; skipping delete");
                return false;
            }
        }
        true
    }
}
