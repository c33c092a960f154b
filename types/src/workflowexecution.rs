use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::shared::{TargetResource, WorkflowRef};

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    pub service_account_name: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "kubernaut.io",
    version = "v1",
    kind = "WorkflowExecution",
    plural = "workflowexecutions",
    derive = "PartialEq",
    status = "WorkflowExecutionStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.outcome\", \"name\": \"OUTCOME\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionSpec {
    /// Name of the AIAnalysis this execution was derived from.
    pub analysis_ref: Option<String>,
    pub target: TargetResource,
    pub workflow_ref: WorkflowRef,
    /// UPPER_SNAKE_CASE keys by convention; passed through to the
    /// execution child untouched.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Carried from the analysis for the audit trail.
    pub confidence: Option<f64>,
    pub rationale: Option<String>,
    #[serde(default)]
    pub execution_config: ExecutionConfig,
    pub correlation_id: String,
}

/// Machine-readable terminal failure description.
///
/// `was_execution_failure` distinguishes a workflow that started and had a
/// step fail (block until cleared) from a validation or admission failure
/// (retried upstream with backoff, no block).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetails {
    pub sub_reason: String,
    pub was_execution_failure: bool,
    pub failed_step: Option<String>,
    pub message: String,
}

/// Audit-tracked release of a `PreviousExecutionFailed` routing block.
/// Written exclusively by the authenticated clearance webhook.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockClearance {
    pub cleared_at: Option<Time>,
    pub cleared_by: String,
    pub clear_reason: String,
    pub clear_method: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionStatus {
    pub phase: WorkflowExecutionPhase,
    pub message: Option<String>,
    /// Name of the execution child created for this resource.
    pub pipeline_run_ref: Option<String>,
    pub start_time: Option<Time>,
    pub completion_time: Option<Time>,
    pub outcome: Option<WorkflowOutcome>,
    pub failure_details: Option<FailureDetails>,
    pub skip_reason: Option<BlockReason>,
    pub block_clearance: Option<BlockClearance>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum WorkflowExecutionPhase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl WorkflowExecutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowExecutionPhase::Completed
                | WorkflowExecutionPhase::Failed
                | WorkflowExecutionPhase::Skipped
        )
    }
}

impl FromStr for WorkflowExecutionPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(WorkflowExecutionPhase::Pending),
            "Running" => Ok(WorkflowExecutionPhase::Running),
            "Completed" => Ok(WorkflowExecutionPhase::Completed),
            "Failed" => Ok(WorkflowExecutionPhase::Failed),
            "Skipped" => Ok(WorkflowExecutionPhase::Skipped),
            _ => Err(()),
        }
    }
}

impl fmt::Display for WorkflowExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowExecutionPhase::Pending => write!(f, "Pending"),
            WorkflowExecutionPhase::Running => write!(f, "Running"),
            WorkflowExecutionPhase::Completed => write!(f, "Completed"),
            WorkflowExecutionPhase::Failed => write!(f, "Failed"),
            WorkflowExecutionPhase::Skipped => write!(f, "Skipped"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum WorkflowOutcome {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for WorkflowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowOutcome::Success => write!(f, "Success"),
            WorkflowOutcome::Failed => write!(f, "Failed"),
            WorkflowOutcome::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Why routing declined to start (or to keep) an execution for a target.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum BlockReason {
    /// Another WorkflowExecution for the same target is Running.
    ResourceBusy,
    /// The most recent terminal execution finished inside the cooldown
    /// window.
    RecentlyRemediated,
    /// The most recent terminal execution failed during execution and no
    /// clearance has been recorded.
    PreviousExecutionFailed,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::ResourceBusy => write!(f, "ResourceBusy"),
            BlockReason::RecentlyRemediated => write!(f, "RecentlyRemediated"),
            BlockReason::PreviousExecutionFailed => write!(f, "PreviousExecutionFailed"),
        }
    }
}
