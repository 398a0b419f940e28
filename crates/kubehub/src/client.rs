//! kube-rs backed [`ClusterClient`].

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::{debug, info};

use crate::{split_kind, ClusterClient};

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "drift";

/// Talks to one cluster. Discovery runs once at construction.
pub struct KubeClusterClient {
    client: Client,
    resources: Vec<(ApiResource, bool)>,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").field("resources", &self.resources.len()).finish()
    }
}

impl KubeClusterClient {
    /// Connect using the ambient kubeconfig or in-cluster config.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Self::from_client(client).await
    }

    pub async fn from_client(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await.context("running API discovery")?;
        let mut resources = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                resources.push((ar, namespaced));
            }
        }
        info!(resources = resources.len(), "discovery complete");
        Ok(Self { client, resources })
    }

    fn resolve(&self, kind: &str) -> Option<&(ApiResource, bool)> { resolve_kind(&self.resources, kind) }

    fn api(&self, kind: &str, namespace: &str) -> Result<(Api<DynamicObject>, &ApiResource)> {
        let (ar, namespaced) = self.resolve(kind).ok_or_else(|| anyhow!("kind {} is not served by the cluster", kind))?;
        let api = if *namespaced {
            Api::namespaced_with(self.client.clone(), namespace, ar)
        } else {
            Api::all_with(self.client.clone(), ar)
        };
        Ok((api, ar))
    }
}

/// Resolve `Kind` or `Kind.group`. A bare kind prefers the core group and
/// falls back to the first group serving it.
fn resolve_kind<'a>(resources: &'a [(ApiResource, bool)], kind: &str) -> Option<&'a (ApiResource, bool)> {
    let (kind, group) = split_kind(kind);
    let mut served = resources.iter().filter(|(ar, _)| ar.kind == kind);
    match group {
        Some(g) => served.find(|(ar, _)| ar.group == g),
        None => {
            let first = served.clone().next();
            served.find(|(ar, _)| ar.group.is_empty()).or(first)
        }
    }
}

fn to_document(obj: DynamicObject, ar: &ApiResource) -> Result<Json> {
    let mut v = serde_json::to_value(&obj).context("serializing DynamicObject")?;
    if let Some(map) = v.as_object_mut() {
        map.entry("apiVersion").or_insert_with(|| Json::String(ar.api_version.clone()));
        map.entry("kind").or_insert_with(|| Json::String(ar.kind.clone()));
    }
    Ok(v)
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn is_kind_supported(&self, kind: &str) -> Result<bool> { Ok(self.resolve(kind).is_some()) }

    async fn list_items(&self, kind: &str, namespace: &str, names: Option<&[String]>) -> Result<Vec<Json>> {
        let t0 = std::time::Instant::now();
        let (api, ar) = self.api(kind, namespace)?;
        let objs = match names {
            Some(names) => {
                let mut out = Vec::with_capacity(names.len());
                for name in names {
                    if let Some(obj) = api.get_opt(name).await.with_context(|| format!("getting {} {}/{}", kind, namespace, name))? {
                        out.push(obj);
                    }
                }
                out
            }
            None => api.list(&ListParams::default()).await.with_context(|| format!("listing {} in {}", kind, namespace))?.items,
        };
        histogram!("drift_list_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(kind, namespace, items = objs.len(), "listed");
        objs.into_iter().map(|o| to_document(o, ar)).collect()
    }

    async fn apply(&self, namespace: &str, body: &Json) -> Result<()> {
        let kind = body.get("kind").and_then(Json::as_str).unwrap_or("");
        let api_version = body.get("apiVersion").and_then(Json::as_str).unwrap_or("");
        let (api, _) = self.api(&drift_core::fully_qualified_kind(kind, api_version), namespace)?;
        let Some(name) = body.pointer("/metadata/name").and_then(Json::as_str) else {
            // SSA needs a name; generateName objects are created instead.
            if body.pointer("/metadata/generateName").and_then(Json::as_str).is_none() {
                return Err(anyhow!("object missing metadata.name and metadata.generateName"));
            }
            let obj: DynamicObject = serde_json::from_value(body.clone()).context("decoding object")?;
            let pp = PostParams { field_manager: Some(FIELD_MANAGER.to_string()), ..PostParams::default() };
            return match api.create(&pp, &obj).await {
                Ok(created) => {
                    debug!(kind, namespace, name = ?created.metadata.name, "created from generateName");
                    Ok(())
                }
                Err(e) => {
                    counter!("drift_create_errors_total", 1u64);
                    Err(anyhow!("creating {} in {} failed: {}", kind, namespace, e))
                }
            };
        };
        let pp = PatchParams::apply(FIELD_MANAGER).force();
        match api.patch(name, &pp, &Patch::Apply(body)).await {
            Ok(_) => Ok(()),
            Err(e) => {
                counter!("drift_ssa_errors_total", 1u64);
                Err(anyhow!("server-side apply of {} {}/{} failed: {}", kind, namespace, name, e))
            }
        }
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<()> {
        let (api, _) = self.api(kind, namespace)?;
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(kind, namespace, name, "already gone");
                Ok(())
            }
            Err(e) => Err(anyhow!("deleting {} {}/{} failed: {}", kind, namespace, name, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;

    fn served(group: &str, version: &str, kind: &str) -> (ApiResource, bool) {
        (ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind)), true)
    }

    #[test]
    fn bare_kind_prefers_the_core_group() {
        let resources = vec![served("example.com", "v1", "Secret"), served("", "v1", "Secret"), served("apps", "v1", "Deployment")];
        assert_eq!(resolve_kind(&resources, "Secret").map(|(ar, _)| ar.group.as_str()), Some(""));
        assert_eq!(resolve_kind(&resources, "Secret.example.com").map(|(ar, _)| ar.group.as_str()), Some("example.com"));
        assert_eq!(resolve_kind(&resources, "Deployment").map(|(ar, _)| ar.group.as_str()), Some("apps"));
        assert!(resolve_kind(&resources, "Deployment.extensions").is_none());
        assert!(resolve_kind(&resources, "Route").is_none());
    }
}
