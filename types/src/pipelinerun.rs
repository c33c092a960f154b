use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::shared::WorkflowRef;

/// Condition type the execution engine sets when a run reaches a terminal
/// state.
pub const PIPELINE_RUN_SUCCEEDED: &str = "Succeeded";

/// Reasons on a False Succeeded condition that mean the workflow started
/// and a step failed, as opposed to failing validation or admission.
pub const EXECUTION_FAILURE_REASONS: &[&str] = &["StepFailed", "TaskFailed", "RunTimedOut"];

/// The execution child. The WorkflowExecution reconciler creates one of
/// these per execution and observes it to a terminal Succeeded condition;
/// the engine that actually runs the pipeline is external to this
/// control plane.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "kubernaut.io",
    version = "v1",
    kind = "PipelineRun",
    plural = "pipelineruns",
    derive = "PartialEq",
    status = "PipelineRunStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.conditions[?(@.type=='Succeeded')].status\", \"name\": \"SUCCEEDED\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    pub workflow_ref: WorkflowRef,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub service_account_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub failed_step: Option<String>,
    pub start_time: Option<Time>,
    pub completion_time: Option<Time>,
    pub message: Option<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
}

impl PipelineRun {
    /// Returns the terminal Succeeded condition, if the run has reached
    /// one.
    pub fn terminal_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.type_ == PIPELINE_RUN_SUCCEEDED && (c.status == "True" || c.status == "False"))
    }
}
