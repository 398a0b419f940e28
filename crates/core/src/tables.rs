//! Static configuration tables consulted by canonicalization and equality.
//!
//! Extending the reconciler to a new controller-managed label or a new
//! bookkeeping annotation is a table edit; comparison logic stays untouched.

#![forbid(unsafe_code)]

use once_cell::sync::Lazy;
use regex::Regex;

/// Annotation keys written by [`crate::Resource::annotate`].
pub mod annotations {
    pub const INTEGRATION: &str = "qontract.integration";
    pub const INTEGRATION_VERSION: &str = "qontract.integration_version";
    pub const SHA256SUM: &str = "qontract.sha256sum";
    pub const UPDATE: &str = "qontract.update";
    pub const CALLER_NAME: &str = "qontract.caller_name";

    pub const OWNED: [&str; 5] = [INTEGRATION, INTEGRATION_VERSION, SHA256SUM, UPDATE, CALLER_NAME];

    /// Written by the external-resources integration for optimistic locking.
    pub const SECRET_UPDATED_AT: &str = "external-resources/updated_at";
    pub const LAST_APPLIED_CONFIGURATION: &str = "kubectl.kubernetes.io/last-applied-configuration";
    pub const DEPLOYMENT_REVISION: &str = "deployment.kubernetes.io/revision";
    pub const OLM_PROVIDED_APIS: &str = "olm.providedAPIs";
    pub const TLS_ACME: &str = "kubernetes.io/tls-acme";
    pub const TLS_ACME_AWAITING_OWNER: &str = "kubernetes.io/tls-acme-awaiting-authorization-owner";
    pub const TLS_ACME_AWAITING_URL: &str = "kubernetes.io/tls-acme-awaiting-authorization-at-url";
}

/// Metadata fields populated by the API server.
pub const SERVER_METADATA_FIELDS: [&str; 7] = [
    "creationTimestamp",
    "resourceVersion",
    "generation",
    "selfLink",
    "uid",
    "namespace",
    "managedFields",
];

/// Keys of `data`/`matchLabels` the platform may inject into the live copy.
pub const IGNORABLE_DATA_FIELDS: [&str; 1] = ["service-ca.crt"];

/// Image pull secrets whose name contains this marker are generated by the platform.
pub const GENERATED_PULL_SECRET_MARKER: &str = "-dockercfg-";

/// Kinds whose names are not held to DNS-1123 subdomain rules.
pub const RBAC_KINDS: [&str; 4] = ["Role", "RoleBinding", "ClusterRole", "ClusterRoleBinding"];

#[derive(Debug, Clone, Copy)]
pub enum LabelMatcher {
    Exact(&'static str),
    Pattern(&'static str),
}

/// Labels whose presence and value are owned by a controller on the cluster.
pub const CONTROLLER_MANAGED_LABELS: &[(&str, &[LabelMatcher])] = &[(
    "ManagedCluster",
    &[
        LabelMatcher::Exact("clusterID"),
        LabelMatcher::Exact("managed-by"),
        LabelMatcher::Exact("openshiftVersion"),
        LabelMatcher::Pattern(r"feature.open-cluster-management.io/.*"),
    ],
)];

enum CompiledMatcher {
    Exact(&'static str),
    Pattern(Regex),
}

static COMPILED_LABELS: Lazy<Vec<(&'static str, Vec<CompiledMatcher>)>> = Lazy::new(|| {
    CONTROLLER_MANAGED_LABELS
        .iter()
        .map(|(kind, matchers)| {
            let compiled = matchers
                .iter()
                .filter_map(|m| match m {
                    LabelMatcher::Exact(s) => Some(CompiledMatcher::Exact(*s)),
                    LabelMatcher::Pattern(p) => match Regex::new(p) {
                        Ok(re) => Some(CompiledMatcher::Pattern(re)),
                        Err(e) => {
                            tracing::warn!(pattern = %p, error = %e, "invalid controller-managed label pattern");
                            None
                        }
                    },
                })
                .collect();
            (*kind, compiled)
        })
        .collect()
});

pub fn is_controller_managed_label(kind: &str, label: &str) -> bool {
    COMPILED_LABELS
        .iter()
        .filter(|(k, _)| *k == kind)
        .flat_map(|(_, ms)| ms.iter())
        .any(|m| match m {
            CompiledMatcher::Exact(s) => *s == label,
            CompiledMatcher::Pattern(re) => re.is_match(label),
        })
}
