use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use kubernaut_types::WorkflowStep;

use super::CallFailure;
use crate::util::backoff::classify_http_status;

/// Everything the policy bundle sees when deciding whether a human must
/// approve the recommended workflow.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInput {
    pub confidence: Option<f64>,
    pub environment: String,
    pub priority: String,
    pub recommended_steps: Vec<WorkflowStep>,
    pub cycle_detected: bool,
    pub cycle_path: Option<String>,
    pub investigation_summary: Option<String>,
    pub evidence: BTreeMap<String, String>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub require_approval: bool,
    pub reason: String,
    pub policy_hash: Option<String>,
}

#[derive(Deserialize)]
struct PolicyResponse {
    result: PolicyDecision,
}

#[derive(Clone)]
pub struct PolicyClient {
    http: reqwest::Client,
    endpoint: String,
    bundle: String,
}

impl PolicyClient {
    pub fn new(endpoint: String, bundle: String) -> PolicyClient {
        PolicyClient {
            http: reqwest::Client::new(),
            endpoint,
            bundle,
        }
    }

    /// Evaluates the approval bundle. Callers treat any error as
    /// "require approval" (degraded mode); this method just reports it.
    pub async fn evaluate(&self, input: &PolicyInput) -> Result<PolicyDecision, CallFailure> {
        let response = self
            .http
            .post(format!("{}/v1/data/{}", self.endpoint, self.bundle))
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await
            .map_err(|e| CallFailure::from_reqwest(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CallFailure {
                class: classify_http_status(status.as_u16()),
                message: format!("policy engine returned {status}"),
            });
        }
        let parsed: PolicyResponse = response
            .json()
            .await
            .map_err(|e| CallFailure::permanent(format!("malformed policy response: {e}")))?;
        Ok(parsed.result)
    }
}
