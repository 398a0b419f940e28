//! The [`Resource`] value object and its construction-time validation.

#![forbid(unsafe_code)]

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Map;

use crate::tables::{annotations, RBAC_KINDS};
use crate::{Json, ResourceError};

pub const DNS_SUBDOMAIN_MAX_LENGTH: usize = 253;
pub const DNS_LABEL_MAX_LENGTH: usize = 63;
const DNS_NAMES_URL: &str = "https://kubernetes.io/docs/concepts/overview/working-with-objects/names/";

static DNS_SUBDOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("static DNS-1123 subdomain regex")
});
static DNS_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static DNS-1123 label regex"));

pub fn is_dns_subdomain(name: &str) -> bool {
    name.len() <= DNS_SUBDOMAIN_MAX_LENGTH && DNS_SUBDOMAIN_RE.is_match(name)
}

pub fn is_dns_label(name: &str) -> bool {
    name.len() <= DNS_LABEL_MAX_LENGTH && DNS_LABEL_RE.is_match(name)
}

/// `Kind.group` when `api_version` carries a group, otherwise the bare kind.
pub fn fully_qualified_kind(kind: &str, api_version: &str) -> String {
    match api_version.split_once('/') {
        Some((group, _)) => format!("{}.{}", kind, group),
        None => kind.to_string(),
    }
}

/// One cluster object plus the identity of the integration handling it.
///
/// Resources are immutable once built: [`Resource::annotate`] and
/// [`crate::canonicalize`] hand back new values.
#[derive(Debug, Clone)]
pub struct Resource {
    body: Json,
    integration: String,
    integration_version: String,
    error_details: String,
    caller_name: Option<String>,
}

impl Resource {
    /// Build and validate.
    pub fn new(body: Json, integration: impl Into<String>, integration_version: impl Into<String>) -> Result<Self, ResourceError> {
        Self::new_unchecked(body, integration, integration_version).validated()
    }

    /// Build without validating names; used for objects read back from a cluster in trusted paths.
    pub fn new_unchecked(body: Json, integration: impl Into<String>, integration_version: impl Into<String>) -> Self {
        Self {
            body,
            integration: integration.into(),
            integration_version: integration_version.into(),
            error_details: String::new(),
            caller_name: None,
        }
    }

    pub fn with_caller(mut self, caller: Option<String>) -> Self {
        self.caller_name = caller.filter(|c| !c.is_empty());
        self
    }

    pub fn with_error_details(mut self, details: impl Into<String>) -> Self {
        self.error_details = details.into();
        self
    }

    pub fn validated(self) -> Result<Self, ResourceError> {
        self.validate()?;
        Ok(self)
    }

    pub fn body(&self) -> &Json { &self.body }
    pub fn into_body(self) -> Json { self.body }
    pub fn integration(&self) -> &str { &self.integration }
    pub fn integration_version(&self) -> &str { &self.integration_version }
    pub fn error_details(&self) -> &str { &self.error_details }
    pub fn caller_name(&self) -> Option<&str> { self.caller_name.as_deref() }

    pub(crate) fn with_body(&self, body: Json) -> Self {
        Self {
            body,
            integration: self.integration.clone(),
            integration_version: self.integration_version.clone(),
            error_details: self.error_details.clone(),
            caller_name: self.caller_name.clone(),
        }
    }

    pub fn metadata(&self) -> Option<&Map<String, Json>> {
        self.body.get("metadata").and_then(Json::as_object)
    }

    /// `metadata.name`, or `metadata.generateName` without its trailing separator.
    pub fn name(&self) -> &str {
        let Some(meta) = self.metadata() else { return "" };
        if let Some(name) = meta.get("name").and_then(Json::as_str) {
            return name;
        }
        meta.get("generateName")
            .and_then(Json::as_str)
            .map(|g| g.strip_suffix('-').unwrap_or(g))
            .unwrap_or("")
    }

    pub fn kind(&self) -> &str { self.body.get("kind").and_then(Json::as_str).unwrap_or("") }

    pub fn api_version(&self) -> &str { self.body.get("apiVersion").and_then(Json::as_str).unwrap_or("") }

    pub fn kind_and_group(&self) -> String { fully_qualified_kind(self.kind(), self.api_version()) }

    pub fn annotations(&self) -> Option<&Map<String, Json>> {
        self.metadata().and_then(|m| m.get("annotations")).and_then(Json::as_object)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations().and_then(|a| a.get(key)).and_then(Json::as_str)
    }

    /// Caller identity given at construction, else the one recorded on the object.
    pub fn caller(&self) -> Option<&str> {
        self.caller_name().or_else(|| self.annotation(annotations::CALLER_NAME).filter(|c| !c.is_empty()))
    }

    pub fn has_owner_reference(&self) -> bool {
        self.metadata()
            .and_then(|m| m.get("ownerReferences"))
            .and_then(Json::as_array)
            .map(|refs| !refs.is_empty())
            .unwrap_or(false)
    }

    pub fn validate(&self) -> Result<(), ResourceError> {
        let name = self.name();
        let kind = self.kind();
        if name.is_empty() || kind.is_empty() {
            return Err(ResourceError::Construction(format!(
                "resource invalid data (missing name or kind). details: {}",
                self.error_details
            )));
        }

        if !RBAC_KINDS.contains(&kind) && !is_dns_subdomain(name) {
            return Err(ResourceError::Construction(format!(
                "The {kind} \"{name}\" is invalid: metadata.name: Invalid value: \"{name}\". \
                 This field must adhere to DNS-1123 subdomain names spec. More info can be found at {DNS_NAMES_URL}."
            )));
        }

        let Some(containers) = self.body.pointer("/spec/template/spec/containers") else { return Ok(()) };
        let Some(containers) = containers.as_array() else {
            return Err(ResourceError::Construction(format!(
                "The {kind} \"{name}\" is invalid: spec.template.spec.containers is not a list"
            )));
        };
        for container in containers {
            let Some(cname) = container.get("name").and_then(Json::as_str) else {
                return Err(ResourceError::Construction(format!(
                    "The {kind} \"{name}\" is invalid: an item in spec.template.spec.containers \
                     was found without a required name field"
                )));
            };
            if !is_dns_label(cname) {
                return Err(ResourceError::Construction(format!(
                    "The {kind} \"{name}\" is invalid: a container in spec.template.spec.containers \
                     was found with an invalid name ({cname}). More info at {DNS_NAMES_URL}."
                )));
            }
        }
        Ok(())
    }

    /// Directional semantic comparison: `self` is the desired side.
    pub fn semantically_eq(&self, current: &Resource) -> bool {
        crate::equality::semantically_equal(&self.body, &current.body)
    }

    pub fn to_json(&self) -> String { crate::digest::serialize(&self.body) }
}

impl serde::Serialize for Resource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn res(body: Json) -> Result<Resource, ResourceError> { Resource::new(body, "test", "1.0.0") }

    #[test]
    fn derives_name_kind_and_group() {
        let r = res(json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web"}})).unwrap();
        assert_eq!(r.name(), "web");
        assert_eq!(r.kind(), "Deployment");
        assert_eq!(r.kind_and_group(), "Deployment.apps");
        let core = res(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "c"}})).unwrap();
        assert_eq!(core.kind_and_group(), "ConfigMap");
    }

    #[test]
    fn generate_name_is_used_when_name_absent() {
        let r = res(json!({"apiVersion": "tekton.dev/v1", "kind": "PipelineRun", "metadata": {"generateName": "build-"}})).unwrap();
        assert_eq!(r.name(), "build");
    }

    #[test]
    fn rejects_missing_name_or_kind() {
        let err = Resource::new_unchecked(json!({"kind": "ConfigMap", "metadata": {}}), "t", "1.0.0")
            .with_error_details("file.yaml")
            .validated()
            .unwrap_err();
        assert!(err.to_string().contains("file.yaml"), "{}", err);
        assert!(res(json!({"metadata": {"name": "x"}})).is_err());
        assert!(res(json!({"kind": "ConfigMap"})).is_err());
    }

    #[test]
    fn enforces_dns_subdomain_except_rbac_kinds() {
        assert!(res(json!({"kind": "ConfigMap", "metadata": {"name": "Bad_Name"}})).is_err());
        assert!(res(json!({"kind": "ConfigMap", "metadata": {"name": "a".repeat(254)}})).is_err());
        assert!(res(json!({"kind": "ConfigMap", "metadata": {"name": "ok.name-1"}})).is_ok());
        assert!(res(json!({"kind": "ClusterRole", "metadata": {"name": "system:Admin"}})).is_ok());
    }

    #[test]
    fn validates_container_names() {
        let deploy = |containers: Json| {
            res(json!({
                "kind": "Deployment",
                "metadata": {"name": "web"},
                "spec": {"template": {"spec": {"containers": containers}}}
            }))
        };
        assert!(deploy(json!([{"name": "app"}])).is_ok());
        assert!(deploy(json!([{"image": "x"}])).is_err());
        assert!(deploy(json!([{"name": "App_1"}])).is_err());
        assert!(deploy(json!([{"name": "a".repeat(64)}])).is_err());
        assert!(deploy(json!({"name": "app"})).is_err());
    }

    #[test]
    fn caller_falls_back_to_annotation() {
        let body = json!({"kind": "Secret", "metadata": {"name": "s", "annotations": {"qontract.caller_name": "saas-a"}}});
        let r = res(body.clone()).unwrap();
        assert_eq!(r.caller(), Some("saas-a"));
        let r = res(body).unwrap().with_caller(Some("saas-b".into()));
        assert_eq!(r.caller(), Some("saas-b"));
    }

    #[test]
    fn owner_references_are_detected() {
        let r = res(json!({"kind": "Pod", "metadata": {"name": "p", "ownerReferences": [{"kind": "ReplicaSet"}]}})).unwrap();
        assert!(r.has_owner_reference());
        let r = res(json!({"kind": "Pod", "metadata": {"name": "p", "ownerReferences": []}})).unwrap();
        assert!(!r.has_owner_reference());
    }
}
