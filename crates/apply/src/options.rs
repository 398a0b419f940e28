#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// How desired and current are judged identical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffStrategy {
    /// Directional semantic comparison of the bodies.
    #[default]
    Semantic,
    /// Stored digest on current equals the desired digest and still matches current's content.
    ThreeWayDigest,
}

/// Policy for one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    pub dry_run: bool,
    /// Identity issuing this run.
    pub caller: Option<String>,
    /// Identities still configured for this resource family.
    pub all_callers: Vec<String>,
    pub take_over: bool,
    pub privileged: bool,
    pub enable_deletion: bool,
    pub override_enable_deletion: bool,
    /// Resource types whose objects may be deleted without ownership annotations.
    pub authoritative_types: Vec<String>,
    pub strategy: DiffStrategy,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            caller: None,
            all_callers: Vec::new(),
            take_over: false,
            privileged: false,
            enable_deletion: true,
            override_enable_deletion: false,
            authoritative_types: Vec::new(),
            strategy: DiffStrategy::Semantic,
        }
    }
}

impl ReconcileOptions {
    pub fn is_authoritative(&self, resource_type: &str) -> bool {
        self.authoritative_types.iter().any(|t| t == resource_type)
    }

    pub fn is_active_caller(&self, caller: &str) -> bool { self.all_callers.iter().any(|c| c == caller) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let opts: ReconcileOptions = serde_json::from_str(r#"{"caller": "a", "strategy": "three-way-digest"}"#).unwrap();
        assert_eq!(opts.caller.as_deref(), Some("a"));
        assert_eq!(opts.strategy, DiffStrategy::ThreeWayDigest);
        assert!(opts.dry_run);
        assert!(opts.enable_deletion);
        assert!(!opts.is_active_caller("a"));
    }
}
