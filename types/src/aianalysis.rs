use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::shared::{
    BusinessPriority, RetryAttempt, SignalReference, TargetResource, WorkflowRef,
};

/// Read-only context gathered by the signal-ingestion stage before the
/// analysis is created. Detection names outside the known set are a fatal
/// validation error.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentBundle {
    #[serde(default)]
    pub failed_detections: Vec<FailedDetection>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailedDetection {
    pub name: String,
    pub detail: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "kubernaut.io",
    version = "v1",
    kind = "AIAnalysis",
    plural = "aianalyses",
    derive = "PartialEq",
    status = "AIAnalysisStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.approvalContext.required\", \"name\": \"APPROVAL\", \"type\": \"boolean\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct AIAnalysisSpec {
    pub signal_ref: SignalReference,
    pub alert_summary: String,
    pub target: TargetResource,
    pub environment: String,
    #[serde(default)]
    pub business_priority: BusinessPriority,
    #[serde(default)]
    pub enrichment: EnrichmentBundle,
    pub correlation_id: String,
}

/// One recommended remediation step. `depends_on` refers to other step ids
/// within the same workflow.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationResult {
    pub root_cause: String,
    pub confidence: f64,
    #[serde(default)]
    pub recommended_steps: Vec<WorkflowStep>,
    pub workflow: WorkflowRef,
    pub target_in_owner_chain: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencyValidation {
    pub valid: bool,
    pub cycle_path: Option<String>,
}

/// The record evaluated by the policy engine, preserved for audit.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalContext {
    pub required: bool,
    pub reason: String,
    pub policy_hash: Option<String>,
    #[serde(default)]
    pub evidence: BTreeMap<String, String>,
    #[serde(default)]
    pub degraded_mode: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AIAnalysisStatus {
    pub phase: AIAnalysisPhase,
    pub message: Option<String>,
    pub correlation_id: Option<String>,
    pub investigation: Option<InvestigationResult>,
    /// Sub-reason returned when the investigation service refuses with
    /// needs_human_review.
    pub human_review_reason: Option<String>,
    #[serde(rename = "holmesGPTRetryAttempts", default)]
    pub holmes_gpt_retry_attempts: u32,
    #[serde(rename = "holmesGPTTotalElapsedSeconds", default)]
    pub holmes_gpt_total_elapsed_seconds: u64,
    pub first_attempt_time: Option<Time>,
    pub next_retry_time: Option<Time>,
    #[serde(default)]
    pub retry_attempts: Vec<RetryAttempt>,
    pub dependency_validation: Option<DependencyValidation>,
    pub approval_context: Option<ApprovalContext>,
    /// Name of the RemediationApproval created while awaiting a decision.
    pub approval_ref: Option<String>,
    /// Name of the WorkflowExecution created on success.
    pub workflow_execution_ref: Option<String>,
    /// Set when routing declined to create a WorkflowExecution.
    pub routing_skipped: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum AIAnalysisPhase {
    #[default]
    Pending,
    Validating,
    PreparingContext,
    Investigating,
    EvaluatingConfidence,
    ValidatingDependencies,
    Approving,
    CreatingWorkflow,
    Completed,
    Failed,
}

impl AIAnalysisPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AIAnalysisPhase::Completed | AIAnalysisPhase::Failed)
    }
}

impl FromStr for AIAnalysisPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(AIAnalysisPhase::Pending),
            "Validating" => Ok(AIAnalysisPhase::Validating),
            "PreparingContext" => Ok(AIAnalysisPhase::PreparingContext),
            "Investigating" => Ok(AIAnalysisPhase::Investigating),
            "EvaluatingConfidence" => Ok(AIAnalysisPhase::EvaluatingConfidence),
            "ValidatingDependencies" => Ok(AIAnalysisPhase::ValidatingDependencies),
            "Approving" => Ok(AIAnalysisPhase::Approving),
            "CreatingWorkflow" => Ok(AIAnalysisPhase::CreatingWorkflow),
            "Completed" => Ok(AIAnalysisPhase::Completed),
            "Failed" => Ok(AIAnalysisPhase::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for AIAnalysisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AIAnalysisPhase::Pending => write!(f, "Pending"),
            AIAnalysisPhase::Validating => write!(f, "Validating"),
            AIAnalysisPhase::PreparingContext => write!(f, "PreparingContext"),
            AIAnalysisPhase::Investigating => write!(f, "Investigating"),
            AIAnalysisPhase::EvaluatingConfidence => write!(f, "EvaluatingConfidence"),
            AIAnalysisPhase::ValidatingDependencies => write!(f, "ValidatingDependencies"),
            AIAnalysisPhase::Approving => write!(f, "Approving"),
            AIAnalysisPhase::CreatingWorkflow => write!(f, "CreatingWorkflow"),
            AIAnalysisPhase::Completed => write!(f, "Completed"),
            AIAnalysisPhase::Failed => write!(f, "Failed"),
        }
    }
}
