//! Application manifest: node profiles and lifecycle hooks

use crate::error::{Result, ShrinkError};
use crate::operation::Operation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Lifecycle hooks run during node removal
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HookKind {
    #[serde(rename = "node-removing")]
    NodeRemoving,
    #[serde(rename = "node-removed")]
    NodeRemoved,
    #[serde(rename = "nodes-deprovision")]
    NodesDeprovision,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::NodeRemoving => "node-removing",
            HookKind::NodeRemoved => "node-removed",
            HookKind::NodesDeprovision => "nodes-deprovision",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProfile {
    /// Labels applied to nodes of this profile
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub hooks: BTreeSet<HookKind>,
    #[serde(default)]
    pub node_profiles: HashMap<String, NodeProfile>,
}

impl Manifest {
    pub fn has_hook(&self, hook: HookKind) -> bool {
        self.hooks.contains(&hook)
    }

    pub fn profile(&self, name: &str) -> Result<&NodeProfile> {
        self.node_profiles
            .get(name)
            .ok_or_else(|| ShrinkError::not_found(format!("node profile {:?} not found", name)))
    }

    pub fn with_hook(mut self, hook: HookKind) -> Self {
        self.hooks.insert(hook);
        self
    }

    pub fn with_profile(mut self, name: impl Into<String>, labels: &[(&str, &str)]) -> Self {
        let labels = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.node_profiles.insert(name.into(), NodeProfile { labels });
        self
    }
}

/// Runs application hooks for an operation and waits for them to finish
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run_hook(&self, operation: &Operation, hook: HookKind) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_from_json() {
        let manifest: Manifest = serde_json::from_str(
            r#"{
                "hooks": ["node-removing", "nodes-deprovision"],
                "node_profiles": {"node": {"labels": {"role": "node"}}}
            }"#,
        )
        .unwrap();
        assert!(manifest.has_hook(HookKind::NodeRemoving));
        assert!(manifest.has_hook(HookKind::NodesDeprovision));
        assert!(!manifest.has_hook(HookKind::NodeRemoved));
        assert_eq!(manifest.profile("node").unwrap().labels["role"], "node");
        assert!(manifest.profile("db").unwrap_err().is_not_found());
    }
}
