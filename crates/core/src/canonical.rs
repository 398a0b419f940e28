//! Canonical form of a resource body.
//!
//! Canonicalization strips server-populated noise, controller-managed labels
//! and reconciler bookkeeping, then applies the normalization registered for
//! the object's kind. The result is what gets hashed into the content digest.
//! Applying it twice yields the same document as applying it once.

#![forbid(unsafe_code)]

use serde_json::Map;

use crate::secret::base64_encode_secret_field_value;
use crate::tables::{annotations, is_controller_managed_label, GENERATED_PULL_SECRET_MARKER, SERVER_METADATA_FIELDS};
use crate::Json;

type Object = Map<String, Json>;

/// A kind-specific normalization over the top-level object.
pub type KindRule = fn(&mut Object);

/// Registry of per-kind normalizations. Unlisted kinds keep their body as-is.
pub const KIND_RULES: &[(&str, KindRule)] = &[
    ("ConfigMap", drop_opaque_type),
    ("Secret", canonicalize_secret),
    ("Deployment", canonicalize_deployment),
    ("Route", canonicalize_route),
    ("ServiceAccount", canonicalize_service_account),
    ("Role", canonicalize_role),
    ("OperatorGroup", canonicalize_operator_group),
    ("RoleBinding", canonicalize_binding),
    ("ClusterRoleBinding", canonicalize_binding),
    ("Service", canonicalize_service),
];

fn identity(_: &mut Object) {}

pub fn kind_rule(kind: &str) -> KindRule {
    KIND_RULES.iter().find(|(k, _)| *k == kind).map(|(_, rule)| *rule).unwrap_or(identity)
}

/// Python-style truthiness; used for "empty means absent" checks.
pub(crate) fn is_falsy(v: &Json) -> bool {
    match v {
        Json::Null => true,
        Json::Bool(b) => !b,
        Json::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        Json::String(s) => s.is_empty(),
        Json::Array(a) => a.is_empty(),
        Json::Object(o) => o.is_empty(),
    }
}

fn object_mut<'a>(obj: &'a mut Object, key: &str) -> Option<&'a mut Object> {
    obj.get_mut(key).and_then(Json::as_object_mut)
}

/// Annotations map under `metadata`, created when missing or null.
fn annotations_mut(obj: &mut Object) -> Option<&mut Object> {
    let meta = object_mut(obj, "metadata")?;
    let slot = meta.entry("annotations").or_insert_with(|| Json::Object(Object::new()));
    if !slot.is_object() {
        *slot = Json::Object(Object::new());
    }
    slot.as_object_mut()
}

pub fn canonicalize(body: &Json) -> Json {
    let mut body = body.clone();
    let Some(obj) = body.as_object_mut() else { return body };
    let kind = obj.get("kind").and_then(Json::as_str).unwrap_or("").to_string();

    if let Some(meta) = object_mut(obj, "metadata") {
        for field in SERVER_METADATA_FIELDS {
            meta.remove(field);
        }
        if let Some(labels) = object_mut(meta, "labels") {
            labels.retain(|label, _| !is_controller_managed_label(&kind, label));
        }
    }
    if let Some(annos) = annotations_mut(obj) {
        annos.remove(annotations::LAST_APPLIED_CONFIGURATION);
    }
    obj.remove("status");

    kind_rule(&kind)(obj);

    if let Some(annos) = annotations_mut(obj) {
        for key in annotations::OWNED {
            annos.remove(key);
        }
        annos.remove(annotations::SECRET_UPDATED_AT);
    }
    body
}

/// `type: Opaque` is the platform default for ConfigMaps and Secrets.
fn drop_opaque_type(obj: &mut Object) {
    if obj.get("type").and_then(Json::as_str) == Some("Opaque") {
        obj.remove("type");
    }
}

fn canonicalize_secret(obj: &mut Object) {
    drop_opaque_type(obj);
    let Some(string_data) = obj.remove("stringData") else { return };
    let Json::Object(entries) = string_data else { return };
    if entries.is_empty() {
        return;
    }
    let data = obj.entry("data").or_insert_with(|| Json::Object(Object::new()));
    if !data.is_object() {
        *data = Json::Object(Object::new());
    }
    if let Some(data) = data.as_object_mut() {
        for (k, v) in entries {
            let raw = match v {
                Json::String(s) => s,
                other => other.to_string(),
            };
            data.insert(k, Json::String(base64_encode_secret_field_value(&raw)));
        }
    }
}

fn canonicalize_deployment(obj: &mut Object) {
    if let Some(annos) = annotations_mut(obj) {
        annos.remove(annotations::DEPLOYMENT_REVISION);
    }
}

fn canonicalize_route(obj: &mut Object) {
    let acme = annotations_mut(obj)
        .map(|annos| {
            let acme = annos.contains_key(annotations::TLS_ACME);
            if acme {
                annos.remove(annotations::TLS_ACME_AWAITING_OWNER);
                annos.remove(annotations::TLS_ACME_AWAITING_URL);
            }
            acme
        })
        .unwrap_or(false);
    let Some(spec) = object_mut(obj, "spec") else { return };
    if spec.get("wildcardPolicy").and_then(Json::as_str) == Some("None") {
        spec.remove("wildcardPolicy");
    }
    if acme {
        if let Some(tls) = object_mut(spec, "tls") {
            tls.remove("key");
            tls.remove("certificate");
        }
    }
    if spec.get("subdomain").map(is_falsy).unwrap_or(false) {
        spec.remove("subdomain");
    }
}

fn is_generated_pull_secret(entry: &Json) -> bool {
    entry
        .get("name")
        .and_then(Json::as_str)
        .map(|n| n.contains(GENERATED_PULL_SECRET_MARKER))
        .unwrap_or(false)
}

fn canonicalize_service_account(obj: &mut Object) {
    if let Some(Json::Array(secrets)) = obj.remove("imagePullSecrets") {
        let kept: Vec<Json> = secrets.into_iter().filter(|s| !is_generated_pull_secret(s)).collect();
        if !kept.is_empty() {
            obj.insert("imagePullSecrets".into(), Json::Array(kept));
        }
    }
    obj.remove("secrets");
}

fn sort_strings(v: &mut Json) {
    if let Some(items) = v.as_array_mut() {
        items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    }
}

fn canonicalize_role(obj: &mut Object) {
    let Some(rules) = obj.get_mut("rules").and_then(Json::as_array_mut) else { return };
    for rule in rules.iter_mut().filter_map(Json::as_object_mut) {
        if let Some(resources) = rule.get_mut("resources") {
            sort_strings(resources);
        }
        if let Some(verbs) = rule.get_mut("verbs") {
            sort_strings(verbs);
        }
        if rule.get("attributeRestrictions").map(is_falsy).unwrap_or(false) {
            rule.remove("attributeRestrictions");
        }
    }
}

fn canonicalize_operator_group(obj: &mut Object) {
    if let Some(annos) = annotations_mut(obj) {
        annos.remove(annotations::OLM_PROVIDED_APIS);
    }
}

/// Shared by RoleBinding and ClusterRoleBinding.
fn canonicalize_binding(obj: &mut Object) {
    obj.remove("groupNames");
    obj.remove("userNames");
    let api_version = obj.get("apiVersion").and_then(Json::as_str).unwrap_or("").to_string();
    let implied = |group: Option<&Json>| -> bool {
        match group {
            Some(Json::String(g)) => api_version.contains(g.as_str()),
            Some(Json::Null) => true,
            _ => false,
        }
    };

    if let Some(role_ref) = object_mut(obj, "roleRef") {
        role_ref.remove("namespace");
        if implied(role_ref.get("apiGroup")) {
            role_ref.remove("apiGroup");
        }
        role_ref.remove("kind");
    }
    if let Some(subjects) = obj.get_mut("subjects").and_then(Json::as_array_mut) {
        for subject in subjects.iter_mut().filter_map(Json::as_object_mut) {
            subject.remove("namespace");
            if implied(subject.get("apiGroup")) {
                subject.remove("apiGroup");
            }
        }
    }
}

fn canonicalize_service(obj: &mut Object) {
    let Some(spec) = object_mut(obj, "spec") else { return };
    if spec.get("sessionAffinity").and_then(Json::as_str) == Some("None") {
        spec.remove("sessionAffinity");
    }
    if spec.get("type").and_then(Json::as_str) == Some("ClusterIP") {
        spec.remove("clusterIP");
    }
}
