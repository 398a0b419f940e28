//! Content digest and ownership annotations.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde_json::Map;
use sha2::{Digest, Sha256};

use crate::canonical::canonicalize;
use crate::tables::annotations;
use crate::version::IntegrationVersion;
use crate::{Json, Resource};

fn sorted(v: &Json) -> Json {
    match v {
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::with_capacity(map.len());
            for k in keys {
                out.insert(k.clone(), sorted(&map[k]));
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with keys sorted at every level, independent of map ordering features.
pub fn serialize(body: &Json) -> String {
    sorted(body).to_string()
}

pub fn calculate_sha256sum(serialized: &str) -> String {
    format!("{:x}", Sha256::digest(serialized.as_bytes()))
}

impl Resource {
    /// Digest of this resource's canonical form.
    pub fn sha256sum(&self) -> String {
        calculate_sha256sum(&serialize(&canonicalize(self.body())))
    }

    /// Copy carrying the reconciler's identity, version, digest, update time and caller.
    pub fn annotate(&self) -> Resource {
        self.annotate_at(Utc::now())
    }

    pub fn annotate_at(&self, now: DateTime<Utc>) -> Resource {
        let sha256sum = self.sha256sum();
        let mut body = self.body().clone();
        if let Some(meta) = body.get_mut("metadata").and_then(Json::as_object_mut) {
            let slot = meta.entry("annotations").or_insert_with(|| Json::Object(Map::new()));
            if !slot.is_object() {
                *slot = Json::Object(Map::new());
            }
            if let Some(annos) = slot.as_object_mut() {
                annos.insert(annotations::INTEGRATION.into(), Json::String(self.integration().to_string()));
                annos.insert(
                    annotations::INTEGRATION_VERSION.into(),
                    Json::String(self.integration_version().to_string()),
                );
                annos.insert(annotations::SHA256SUM.into(), Json::String(sha256sum));
                annos.insert(
                    annotations::UPDATE.into(),
                    Json::String(now.format("%Y-%m-%dT%H:%M:%S").to_string()),
                );
                if let Some(caller) = self.caller_name() {
                    annos.insert(annotations::CALLER_NAME.into(), Json::String(caller.to_string()));
                }
            }
        }
        self.with_body(body)
    }

    /// Stored digest still matches the content.
    pub fn has_valid_sha256sum(&self) -> bool {
        self.annotation(annotations::SHA256SUM).map(|stored| stored == self.sha256sum()).unwrap_or(false)
    }

    /// Written by this integration, under the same major version.
    pub fn has_reconciler_annotations(&self) -> bool {
        let Some(annos) = self.annotations() else { return false };
        if annos.get(annotations::INTEGRATION).and_then(Json::as_str) != Some(self.integration()) {
            return false;
        }
        let stored = annos
            .get(annotations::INTEGRATION_VERSION)
            .and_then(Json::as_str)
            .and_then(|v| v.parse::<IntegrationVersion>().ok());
        let ours = self.integration_version().parse::<IntegrationVersion>().ok();
        match (stored, ours) {
            (Some(stored), Some(ours)) if stored.same_major(&ours) => {}
            _ => return false,
        }
        annos.get(annotations::SHA256SUM).map(|v| !v.is_null()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn secret(caller: Option<&str>) -> Resource {
        Resource::new(
            json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "s"}, "data": {"k": "dg=="}}),
            "openshift-resources",
            "1.2.3",
        )
        .unwrap()
        .with_caller(caller.map(String::from))
    }

    #[test]
    fn serialization_sorts_keys() {
        assert_eq!(serialize(&json!({"b": 1, "a": {"d": 2, "c": [3]}})), r#"{"a":{"c":[3],"d":2},"b":1}"#);
    }

    #[test]
    fn annotate_writes_owned_annotations() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap();
        let annotated = secret(Some("saas-a")).annotate_at(at);
        assert_eq!(annotated.annotation(annotations::INTEGRATION), Some("openshift-resources"));
        assert_eq!(annotated.annotation(annotations::INTEGRATION_VERSION), Some("1.2.3"));
        assert_eq!(annotated.annotation(annotations::UPDATE), Some("2024-05-01T12:30:05"));
        assert_eq!(annotated.annotation(annotations::CALLER_NAME), Some("saas-a"));
        assert_eq!(annotated.annotation(annotations::SHA256SUM).map(str::to_string), Some(secret(None).sha256sum()));
        assert!(annotated.has_valid_sha256sum());
        assert!(annotated.has_reconciler_annotations());
    }

    #[test]
    fn annotation_is_transparent_to_digest_and_equality() {
        let plain = secret(None);
        let annotated = plain.annotate();
        assert_eq!(plain.sha256sum(), annotated.sha256sum());
        assert_eq!(annotated.annotate().sha256sum(), plain.sha256sum());
        let mut stripped = annotated.body().clone();
        if let Some(annos) = stripped.pointer_mut("/metadata/annotations").and_then(Json::as_object_mut) {
            for key in annotations::OWNED {
                annos.remove(key);
            }
        }
        assert!(plain.semantically_eq(&Resource::new(stripped, "openshift-resources", "1.2.3").unwrap()));
    }

    #[test]
    fn tampered_content_invalidates_digest() {
        let annotated = secret(None).annotate();
        let mut body = annotated.body().clone();
        body["data"]["k"] = json!("eA==");
        let tampered = Resource::new(body, "openshift-resources", "1.2.3").unwrap();
        assert!(!tampered.has_valid_sha256sum());
        assert!(!secret(None).has_valid_sha256sum());
    }

    #[test]
    fn ownership_tolerates_minor_drift_only() {
        let annotated = secret(None).annotate();
        let seen_by = |version: &str, integration: &str| {
            Resource::new(annotated.body().clone(), integration, version).unwrap().has_reconciler_annotations()
        };
        assert!(seen_by("1.9.0", "openshift-resources"));
        assert!(!seen_by("2.0.0", "openshift-resources"));
        assert!(!seen_by("1.2.3", "other-integration"));
        assert!(!seen_by("not-a-version", "openshift-resources"));
        assert!(!secret(None).has_reconciler_annotations());
    }
}
