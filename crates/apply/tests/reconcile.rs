#![forbid(unsafe_code)]

use std::sync::Arc;

use base64::Engine as _;
use drift_apply::{realize, ActionPayload, ReconcileOptions};
use drift_core::{build_secret, tables::annotations, Resource};
use drift_kubehub::{fetch_current_state, ClusterMap, CurrentStateSpec, MockCall, MockCluster};
use drift_store::ResourceInventory;
use serde_json::json;

const INTEGRATION: &str = "drift-test";
const VERSION: &str = "1.2.3";

fn secret(caller: Option<&str>) -> Resource {
    build_secret("s1", INTEGRATION, VERSION, [("k", "v")], caller.map(str::to_string), None).unwrap()
}

fn inventory() -> ResourceInventory {
    let ri = ResourceInventory::new();
    ri.initialize_resource_type("c1", "ns", "Secret", None);
    ri
}

fn spec() -> CurrentStateSpec {
    CurrentStateSpec { cluster: "c1".into(), namespace: "ns".into(), kind: "Secret".into(), resource_names: None, privileged: false }
}

fn clusters(mock: Arc<MockCluster>) -> ClusterMap {
    let mut map = ClusterMap::new();
    map.insert("c1", mock);
    map
}

#[tokio::test]
async fn new_secret_is_applied_with_encoded_data_and_own_digest() {
    let ri = inventory();
    ri.add_desired_resource("c1", "ns", secret(None), false).unwrap();
    let mock = Arc::new(MockCluster::new());
    let opts = ReconcileOptions { dry_run: false, ..ReconcileOptions::default() };

    let report = realize(&ri, &opts, &clusters(Arc::clone(&mock))).await;

    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.applied, 1);
    let ActionPayload::Apply { resource } = &report.actions[0].payload else { panic!("expected apply") };
    let encoded = base64::engine::general_purpose::STANDARD.encode("v");
    assert_eq!(resource.body()["data"]["k"], json!(encoded));
    assert_eq!(resource.annotation(annotations::SHA256SUM), Some(resource.sha256sum().as_str()));
    assert!(mock.object("Secret", "ns", "s1").is_some());
    assert!(!ri.has_error_registered(None));
}

#[tokio::test]
async fn identical_owned_secret_needs_no_action() {
    let applied = secret(Some("x")).annotate();
    let mock = Arc::new(MockCluster::new().with_object("ns", applied.into_body()));
    let map = clusters(Arc::clone(&mock));
    let ri = inventory();
    fetch_current_state(vec![spec()], &ri, &map, INTEGRATION, VERSION, 4).await;
    ri.add_desired_resource("c1", "ns", secret(Some("x")), false).unwrap();

    let opts = ReconcileOptions { dry_run: false, caller: Some("x".into()), all_callers: vec!["x".into()], ..ReconcileOptions::default() };
    let report = realize(&ri, &opts, &map).await;

    assert!(report.actions.is_empty());
    assert!(!ri.has_error_registered(None));
    assert_eq!(mock.calls(), vec![MockCall::List { kind: "Secret".into(), namespace: "ns".into() }]);
}

#[tokio::test]
async fn owned_leftover_is_deleted() {
    let leftover = secret(None).annotate();
    let mock = Arc::new(MockCluster::new().with_object("ns", leftover.into_body()));
    let map = clusters(Arc::clone(&mock));
    let ri = inventory();
    fetch_current_state(vec![spec()], &ri, &map, INTEGRATION, VERSION, 1).await;

    let opts = ReconcileOptions { dry_run: false, enable_deletion: true, ..ReconcileOptions::default() };
    let report = realize(&ri, &opts, &map).await;

    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].verb(), "delete");
    assert_eq!(report.actions[0].name(), "s1");
    assert_eq!(report.deleted, 1);
    assert!(mock.is_empty());
}

#[tokio::test]
async fn dry_run_plans_without_touching_the_cluster() {
    let ri = inventory();
    ri.add_desired_resource("c1", "ns", secret(None), false).unwrap();
    let mock = Arc::new(MockCluster::new());

    let report = realize(&ri, &ReconcileOptions::default(), &clusters(Arc::clone(&mock))).await;

    assert!(report.dry_run);
    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.applied, 0);
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn failed_apply_is_recorded_and_others_continue() {
    let ri = ResourceInventory::new();
    ri.initialize_resource_type("c1", "ns", "ConfigMap", None);
    for name in ["bad", "good"] {
        let cm = Resource::new(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": name}}), INTEGRATION, VERSION).unwrap();
        ri.add_desired("c1", "ns", "ConfigMap", name, cm, false).unwrap();
    }
    let mock = Arc::new(MockCluster::new().with_failing_name("bad"));
    let opts = ReconcileOptions { dry_run: false, ..ReconcileOptions::default() };

    let report = realize(&ri, &opts, &clusters(Arc::clone(&mock))).await;

    assert_eq!((report.applied, report.failed), (1, 1));
    assert!(ri.has_error_registered(Some("c1")));
    assert!(mock.object("ConfigMap", "ns", "good").is_some());
}

#[tokio::test]
async fn privileged_actions_need_a_privileged_client() {
    let ri = inventory();
    ri.add_desired_resource("c1", "ns", secret(None), true).unwrap();
    let mock = Arc::new(MockCluster::new());
    let opts = ReconcileOptions { dry_run: false, ..ReconcileOptions::default() };

    let report = realize(&ri, &opts, &clusters(Arc::clone(&mock))).await;
    assert_eq!(report.failed, 1);
    assert!(mock.calls().is_empty());

    let ri = inventory();
    ri.add_desired_resource("c1", "ns", secret(None), true).unwrap();
    let mut map = ClusterMap::new();
    map.insert_privileged("c1", Arc::clone(&mock) as Arc<dyn drift_kubehub::ClusterClient>);
    let report = realize(&ri, &opts, &map).await;
    assert_eq!(report.applied, 1);
}

#[tokio::test]
async fn generated_name_resources_are_created() {
    let ri = ResourceInventory::new();
    ri.initialize_resource_type("c1", "ns", "PipelineRun.tekton.dev", None);
    let run = Resource::new(
        json!({"apiVersion": "tekton.dev/v1", "kind": "PipelineRun", "metadata": {"generateName": "build-"}, "spec": {"pipelineRef": {"name": "build"}}}),
        INTEGRATION,
        VERSION,
    )
    .unwrap();
    ri.add_desired_resource("c1", "ns", run, false).unwrap();
    let mock = Arc::new(MockCluster::new());
    let opts = ReconcileOptions { dry_run: false, ..ReconcileOptions::default() };

    let report = realize(&ri, &opts, &clusters(Arc::clone(&mock))).await;

    assert_eq!((report.actions.len(), report.applied, report.failed), (1, 1, 0));
    assert!(!ri.has_error_registered(None));
    let calls = mock.calls();
    let [MockCall::Apply { name, .. }] = calls.as_slice() else { panic!("expected one apply") };
    assert!(name.starts_with("build-"), "{}", name);
    let created = mock.object("PipelineRun", "ns", name).unwrap();
    assert_eq!(created["metadata"]["generateName"], "build-");
    assert_eq!(created["metadata"]["annotations"][annotations::INTEGRATION], INTEGRATION);
}
