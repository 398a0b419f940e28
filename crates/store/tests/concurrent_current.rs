#![forbid(unsafe_code)]

use std::sync::Arc;

use drift_core::Resource;
use drift_store::{InventoryError, ResourceInventory};

fn cm(name: &str) -> Resource {
    Resource::new(
        serde_json::json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": name}}),
        "test",
        "1.0.0",
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_fetchers_populate_every_bucket() {
    let ri = Arc::new(ResourceInventory::new());
    let clusters = ["c1", "c2", "c3", "c4"];
    let namespaces = ["ns1", "ns2", "ns3"];
    for c in clusters {
        for ns in namespaces {
            ri.initialize_resource_type(c, ns, "ConfigMap", None);
        }
    }

    let mut handles = Vec::new();
    for c in clusters {
        for ns in namespaces {
            let ri = Arc::clone(&ri);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let name = format!("cm-{}", i);
                    ri.add_current(c, ns, "ConfigMap", &name, cm(&name)).unwrap();
                }
            }));
        }
    }
    for h in handles {
        h.await.unwrap();
    }

    let mut buckets = 0;
    for (_key, bucket) in ri.iter() {
        assert_eq!(bucket.current.len(), 50);
        buckets += 1;
    }
    assert_eq!(buckets, clusters.len() * namespaces.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_desired_registrations_admit_exactly_one() {
    let ri = Arc::new(ResourceInventory::new());
    ri.initialize_resource_type("c", "ns", "ConfigMap", None);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let ri = Arc::clone(&ri);
        handles.push(tokio::spawn(async move { ri.add_desired("c", "ns", "ConfigMap", "same", cm("same"), false) }));
    }
    let mut ok = 0;
    let mut exists = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => ok += 1,
            Err(InventoryError::KeyExists(name)) => {
                assert_eq!(name, "same");
                exists += 1;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!((ok, exists), (1, 15));
}
