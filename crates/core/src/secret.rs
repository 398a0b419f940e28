//! Secret construction helpers.

#![forbid(unsafe_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map};

use crate::{Json, Resource, ResourceError};

/// Base64 for a secret value; empty stays empty.
pub fn base64_encode_secret_field_value(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    STANDARD.encode(value.as_bytes())
}

/// Build an Opaque Secret from unencoded values.
pub fn build_secret<'a>(
    name: &str,
    integration: &str,
    integration_version: &str,
    unencoded_data: impl IntoIterator<Item = (&'a str, &'a str)>,
    caller_name: Option<String>,
    annotations: Option<Map<String, Json>>,
) -> Result<Resource, ResourceError> {
    let data: Map<String, Json> = unencoded_data
        .into_iter()
        .map(|(k, v)| (k.to_string(), Json::String(base64_encode_secret_field_value(v))))
        .collect();
    let body = json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "Opaque",
        "metadata": {"name": name, "annotations": annotations.unwrap_or_default()},
        "data": data,
    });
    Resource::new_unchecked(body, integration, integration_version)
        .with_error_details(name)
        .with_caller(caller_name)
        .validated()
}
