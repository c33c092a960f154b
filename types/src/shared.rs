use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The Kubernetes object a remediation acts upon.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetResource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl TargetResource {
    /// Canonical identity string used for deterministic naming and
    /// routing lookups. Stable across controller restarts.
    pub fn identity(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

impl fmt::Display for TargetResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// Reference back to the originating signal resource.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignalReference {
    pub name: String,
    pub namespace: String,
    pub fingerprint: String,
    pub signal_type: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusinessPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl fmt::Display for BusinessPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusinessPriority::Critical => write!(f, "critical"),
            BusinessPriority::High => write!(f, "high"),
            BusinessPriority::Medium => write!(f, "medium"),
            BusinessPriority::Low => write!(f, "low"),
        }
    }
}

/// Immutable reference to a workflow bundle: id, version, and the OCI
/// image in digest form.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRef {
    pub workflow_id: String,
    pub version: String,
    pub container_image: String,
}

/// One recorded attempt of a retried external call.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    pub attempt: u32,
    pub delay_seconds: u64,
    pub timestamp: Option<Time>,
    pub error: Option<String>,
}

/// Key selector into a Secret holding channel configuration.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}
