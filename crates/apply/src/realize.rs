//! Execute planned actions against clusters.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Result};
use drift_kubehub::ClusterMap;
use drift_store::ResourceInventory;
use metrics::counter;
use serde::Serialize;
use tracing::{error, info};

use crate::options::ReconcileOptions;
use crate::plan::{Action, ActionPayload, Planner};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RealizeReport {
    pub dry_run: bool,
    pub deletion_enabled: bool,
    pub actions: Vec<Action>,
    pub applied: usize,
    pub deleted: usize,
    pub failed: usize,
}

async fn execute(action: &Action, clusters: &ClusterMap) -> Result<()> {
    let client = clusters
        .get(&action.cluster, action.privileged)
        .ok_or_else(|| anyhow!("no client for cluster {} (privileged: {})", action.cluster, action.privileged))?;
    match &action.payload {
        ActionPayload::Apply { resource } => client.apply(&action.namespace, resource.body()).await,
        ActionPayload::Delete { name } => client.delete(&action.resource_type, &action.namespace, name).await,
    }
}

/// Plan every bucket, then run the actions in order unless `dry_run`.
/// A failed action registers an error for its cluster and the rest still run.
pub async fn realize(ri: &ResourceInventory, options: &ReconcileOptions, clusters: &ClusterMap) -> RealizeReport {
    let planner = Planner::new(ri, options);
    let actions = planner.plan();
    let mut report = RealizeReport {
        dry_run: options.dry_run,
        deletion_enabled: planner.deletion_enabled(),
        ..RealizeReport::default()
    };
    for action in &actions {
        counter!("drift_actions_total", 1u64, "verb" => action.verb());
    }
    if options.dry_run {
        info!(actions = actions.len(), "dry run; nothing executed");
        report.actions = actions;
        return report;
    }

    for action in &actions {
        match execute(action, clusters).await {
            Ok(()) => match action.payload {
                ActionPayload::Apply { .. } => report.applied += 1,
                ActionPayload::Delete { .. } => report.deleted += 1,
            },
            Err(e) => {
                error!(verb = action.verb(), resource = %action.key(), error = %e, "action failed");
                counter!("drift_action_errors_total", 1u64, "verb" => action.verb());
                ri.register_error(Some(&action.cluster));
                report.failed += 1;
            }
        }
    }
    info!(applied = report.applied, deleted = report.deleted, failed = report.failed, "realized");
    report.actions = actions;
    report
}
