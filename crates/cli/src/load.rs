//! Desired-state loading from multi-document YAML.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use drift_core::{Json, Resource};
use drift_kubehub::CurrentStateSpec;
use drift_store::ResourceInventory;
use serde::Deserialize;
use tracing::{debug, error};

fn max_yaml_bytes() -> usize {
    std::env::var("DRIFT_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(4_000_000)
}

/// Parse every non-empty document in `text`.
pub fn parse_documents(text: &str) -> Result<Vec<Json>> {
    if text.len() > max_yaml_bytes() {
        return Err(anyhow!("YAML too large: {} bytes (max {})", text.len(), max_yaml_bytes()));
    }
    let mut docs = Vec::new();
    for (i, de) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Json::deserialize(de).with_context(|| format!("parsing YAML document {}", i + 1))?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Register `docs` as desired state for `cluster` and return one fetch slot per bucket.
///
/// Invalid documents are logged and counted as an error for the cluster;
/// duplicate or unmanaged registrations abort.
pub fn register_desired(
    ri: &ResourceInventory,
    cluster: &str,
    default_namespace: &str,
    docs: Vec<Json>,
    integration: &str,
    integration_version: &str,
    caller: Option<&str>,
) -> Result<Vec<CurrentStateSpec>> {
    let mut specs: Vec<CurrentStateSpec> = Vec::new();
    for (i, doc) in docs.into_iter().enumerate() {
        let namespace = doc
            .pointer("/metadata/namespace")
            .and_then(Json::as_str)
            .unwrap_or(default_namespace)
            .to_string();
        let resource = match Resource::new(doc, integration, integration_version) {
            Ok(r) => r.with_error_details(format!("document {}", i + 1)).with_caller(caller.map(str::to_string)),
            Err(e) => {
                error!(cluster, namespace = %namespace, document = i + 1, error = %e, "skipping invalid document");
                ri.register_error(Some(cluster));
                continue;
            }
        };
        let resource_type = resource.kind_and_group();
        ri.initialize_resource_type(cluster, &namespace, &resource_type, None);
        let name = resource.name().to_string();
        ri.add_desired(cluster, &namespace, &resource_type, &name, resource, false)
            .with_context(|| format!("registering {} {}/{}", resource_type, namespace, name))?;
        debug!(cluster, namespace = %namespace, kind = %resource_type, name = %name, "desired");
        if !specs.iter().any(|s| s.namespace == namespace && s.kind == resource_type) {
            specs.push(CurrentStateSpec {
                cluster: cluster.to_string(),
                namespace,
                kind: resource_type,
                resource_names: None,
                privileged: false,
            });
        }
    }
    Ok(specs)
}
