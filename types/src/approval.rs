use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Manual-approval gate created by the AIAnalysis reconciler when policy
/// requires a human decision. The analysis owns this resource and resumes
/// when its status changes.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "kubernaut.io",
    version = "v1",
    kind = "RemediationApproval",
    plural = "remediationapprovals",
    derive = "PartialEq",
    status = "RemediationApprovalStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.decision\", \"name\": \"DECISION\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct RemediationApprovalSpec {
    pub analysis_ref: String,
    pub reason: String,
    pub confidence: Option<f64>,
    pub environment: String,
    #[serde(default)]
    pub evidence: BTreeMap<String, String>,
    pub requested_at: Option<Time>,
    pub correlation_id: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemediationApprovalStatus {
    pub decision: ApprovalDecision,
    pub decided_by: Option<String>,
    pub decided_at: Option<Time>,
    pub message: Option<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ApprovalDecision {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalDecision::Pending => write!(f, "Pending"),
            ApprovalDecision::Approved => write!(f, "Approved"),
            ApprovalDecision::Rejected => write!(f, "Rejected"),
        }
    }
}
