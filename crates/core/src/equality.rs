//! Semantic equality between a desired body and the copy observed on a cluster.
//!
//! The walk is directional: maps are compared over the desired side's keys,
//! so defaults the server adds to the live copy do not count as drift. Field
//! rules are consulted in order before the structural fallback.

#![forbid(unsafe_code)]

use serde_json::Map;

use crate::canonical::is_falsy;
use crate::tables::{annotations, is_controller_managed_label, GENERATED_PULL_SECRET_MARKER, IGNORABLE_DATA_FIELDS};
use crate::Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Server noise, skipped wherever it appears.
    Ignore,
    /// Subset match tolerating controller-managed labels on the live side.
    Labels,
    /// Subset match tolerating platform-injected keys on the live side.
    SubsetMap,
    Env,
    Cpu,
    ApiVersion,
    ImagePullSecrets,
}

/// Ordered `(field, rule)` table; first match wins.
pub const FIELD_RULES: &[(&str, FieldRule)] = &[
    (annotations::LAST_APPLIED_CONFIGURATION, FieldRule::Ignore),
    ("creationTimestamp", FieldRule::Ignore),
    ("resourceVersion", FieldRule::Ignore),
    ("generation", FieldRule::Ignore),
    ("selfLink", FieldRule::Ignore),
    ("uid", FieldRule::Ignore),
    ("fieldRef", FieldRule::Ignore),
    ("labels", FieldRule::Labels),
    ("data", FieldRule::SubsetMap),
    ("matchLabels", FieldRule::SubsetMap),
    ("env", FieldRule::Env),
    ("cpu", FieldRule::Cpu),
    ("apiVersion", FieldRule::ApiVersion),
    ("imagePullSecrets", FieldRule::ImagePullSecrets),
];

/// Deprecated/stable apiVersion pairs accepted in either direction.
pub const API_VERSION_ALIASES: &[(&str, &str)] = &[
    ("apps/v1", "extensions/v1beta1"),
    ("networking.k8s.io/v1", "extensions/v1beta1"),
];

pub fn field_rule(key: &str) -> Option<FieldRule> {
    FIELD_RULES.iter().find(|(k, _)| *k == key).map(|(_, r)| *r)
}

/// Key/value pairs on the desired side that mean "nothing to compare".
fn ignorable_pair(key: &str, value: &Json) -> bool {
    match key {
        "annotations" => value.is_null() || value.as_object().map(Map::is_empty).unwrap_or(false),
        "divisor" => value.as_str() == Some("0") || value.as_i64() == Some(0),
        _ => false,
    }
}

/// Normalize a cpu quantity to millicores (`"1"` -> `"1000m"`); non-numeric values pass through.
pub fn normalize_cpu(v: &Json) -> Json {
    let cores = match v {
        Json::String(s) => s.trim().parse::<f64>().ok(),
        Json::Number(n) => n.as_f64(),
        _ => None,
    };
    match cores.filter(|c| c.is_finite()) {
        Some(c) => Json::String(format!("{}m", (c * 1000.0).trunc() as i64)),
        None => v.clone(),
    }
}

pub fn cpu_equal(a: &Json, b: &Json) -> bool { normalize_cpu(a) == normalize_cpu(b) }

pub fn api_version_equal(a: &str, b: &str) -> bool {
    a == b || API_VERSION_ALIASES.iter().any(|(x, y)| (a == *x && b == *y) || (a == *y && b == *x))
}

/// Whether `desired` and `current` describe the same object.
pub fn semantically_equal(desired: &Json, current: &Json) -> bool {
    let kind = desired.get("kind").and_then(Json::as_str).unwrap_or("");
    Walker { kind }.equal(desired, current, 0)
}

struct Walker<'a> {
    kind: &'a str,
}

impl Walker<'_> {
    fn equal(&self, desired: &Json, current: &Json, depth: usize) -> bool {
        match (desired, current) {
            (Json::Object(d), Json::Object(c)) => self.equal_maps(d, c, depth),
            (Json::Array(d), Json::Array(c)) => {
                d.len() == c.len() && d.iter().zip(c).all(|(dv, cv)| self.equal(dv, cv, depth + 1))
            }
            (d, c) => d == c,
        }
    }

    fn equal_maps(&self, desired: &Map<String, Json>, current: &Map<String, Json>, depth: usize) -> bool {
        for (key, dv) in desired {
            let rule = field_rule(key);
            if rule == Some(FieldRule::Ignore) || ignorable_pair(key, dv) || (depth == 0 && key == "status") {
                continue;
            }
            let Some(cv) = current.get(key).filter(|v| !v.is_null()) else {
                let tolerated = dv.is_null()
                    || (matches!(rule, Some(FieldRule::Labels | FieldRule::SubsetMap)) && is_falsy(dv));
                if tolerated {
                    continue;
                }
                return false;
            };
            let same = match rule {
                Some(FieldRule::Labels) => self.subset(dv, cv, depth, |k| is_controller_managed_label(self.kind, k)),
                Some(FieldRule::SubsetMap) => self.subset(dv, cv, depth, |k| IGNORABLE_DATA_FIELDS.contains(&k)),
                Some(FieldRule::Env) => self.equal(dv, &default_env_values(cv), depth + 1),
                Some(FieldRule::Cpu) => cpu_equal(dv, cv),
                Some(FieldRule::ApiVersion) => match (dv.as_str(), cv.as_str()) {
                    (Some(d), Some(c)) => api_version_equal(d, c),
                    _ => dv == cv,
                },
                Some(FieldRule::ImagePullSecrets) => self.equal(dv, &without_generated_pull_secrets(cv), depth + 1),
                Some(FieldRule::Ignore) | None => self.equal(dv, cv, depth + 1),
            };
            if !same {
                return false;
            }
        }
        true
    }

    /// Keys only on the live side must be tolerated by `extra_ok`; shared keys compare recursively.
    fn subset(&self, desired: &Json, current: &Json, depth: usize, extra_ok: impl Fn(&str) -> bool) -> bool {
        if let (Some(d), Some(c)) = (desired.as_object(), current.as_object()) {
            if c.keys().any(|k| !d.contains_key(k) && !extra_ok(k)) {
                return false;
            }
        }
        self.equal(desired, current, depth + 1)
    }
}

/// A name-only env entry is the runtime's way of spelling an empty value.
fn default_env_values(current: &Json) -> Json {
    let Some(entries) = current.as_array() else { return current.clone() };
    Json::Array(
        entries
            .iter()
            .map(|e| match e.as_object() {
                Some(o) if o.len() == 1 && o.contains_key("name") => {
                    let mut o = o.clone();
                    o.insert("value".into(), Json::String(String::new()));
                    Json::Object(o)
                }
                _ => e.clone(),
            })
            .collect(),
    )
}

fn without_generated_pull_secrets(current: &Json) -> Json {
    let Some(entries) = current.as_array() else { return current.clone() };
    Json::Array(
        entries
            .iter()
            .filter(|e| {
                !e.get("name")
                    .and_then(Json::as_str)
                    .map(|n| n.contains(GENERATED_PULL_SECRET_MARKER))
                    .unwrap_or(false)
            })
            .cloned()
            .collect(),
    )
}
