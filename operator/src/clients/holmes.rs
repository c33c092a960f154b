use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, time::Duration};

use kubernaut_types::{InvestigationResult, TargetResource, WorkflowRef, WorkflowStep};

use super::CallFailure;
use crate::util::backoff::classify_http_status;

/// Wire request for one investigation attempt.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InvestigateRequest {
    pub alert_summary: String,
    pub fingerprint: String,
    pub signal_type: String,
    pub environment: String,
    pub target: TargetResource,
    pub enrichment_context: BTreeMap<String, String>,
    pub correlation_id: String,
    pub mode: InvestigationMode,
}

/// Correction mode carries validator feedback back to the service for a
/// re-ask. Reserved; the phase machine only ever sends Initial.
#[derive(Serialize, Clone, Debug)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InvestigationMode {
    Initial,
    Correction { feedback: String },
}

/// Why the service declined to recommend a workflow on its own.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HumanReviewReason {
    WorkflowNotFound,
    ImageMismatch,
    ParameterValidationFailed,
    NoMatchingWorkflows,
    LowConfidence,
    LLMParsingError,
}

impl fmt::Display for HumanReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HumanReviewReason::WorkflowNotFound => write!(f, "WorkflowNotFound"),
            HumanReviewReason::ImageMismatch => write!(f, "ImageMismatch"),
            HumanReviewReason::ParameterValidationFailed => {
                write!(f, "ParameterValidationFailed")
            }
            HumanReviewReason::NoMatchingWorkflows => write!(f, "NoMatchingWorkflows"),
            HumanReviewReason::LowConfidence => write!(f, "LowConfidence"),
            HumanReviewReason::LLMParsingError => write!(f, "LLMParsingError"),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "status", rename_all = "snake_case")]
enum InvestigateResponse {
    Success(InvestigationResult),
    NeedsHumanReview { reason: HumanReviewReason },
}

/// A past incident with the same shape as the current one, used as a
/// fallback when the investigation fails permanently.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SimilarIncident {
    pub incident_id: String,
    pub root_cause: String,
    pub confidence: f64,
    pub workflow: WorkflowRef,
    #[serde(default)]
    pub recommended_steps: Vec<WorkflowStep>,
}

#[derive(Clone, Debug)]
pub enum InvestigateOutcome {
    Success(InvestigationResult),
    NeedsHumanReview(HumanReviewReason),
}

#[derive(Clone)]
pub struct HolmesClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HolmesClient {
    pub fn new(endpoint: String, request_timeout: Duration) -> HolmesClient {
        HolmesClient {
            http: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .expect("build investigation HTTP client"),
            endpoint,
        }
    }

    /// One investigation attempt. Callers drive the schedule; this method
    /// never retries on its own.
    pub async fn investigate(
        &self,
        request: &InvestigateRequest,
    ) -> Result<InvestigateOutcome, CallFailure> {
        let response = self
            .http
            .post(format!("{}/api/v1/investigate", self.endpoint))
            .json(request)
            .send()
            .await
            .map_err(|e| CallFailure::from_reqwest(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallFailure {
                class: classify_http_status(status.as_u16()),
                message: format!("investigation returned {status}: {body}"),
            });
        }
        let parsed: InvestigateResponse = response
            .json()
            .await
            .map_err(|e| CallFailure::permanent(format!("malformed investigation response: {e}")))?;
        match parsed {
            InvestigateResponse::Success(result) => {
                if !(0.0..=1.0).contains(&result.confidence) {
                    return Err(CallFailure::permanent(format!(
                        "confidence {} outside [0, 1]",
                        result.confidence
                    )));
                }
                Ok(InvestigateOutcome::Success(result))
            }
            InvestigateResponse::NeedsHumanReview { reason } => {
                Ok(InvestigateOutcome::NeedsHumanReview(reason))
            }
        }
    }

    /// Looks up the most similar past incident for the target. Returns
    /// None when the history has nothing close enough.
    pub async fn find_similar_incident(
        &self,
        target: &TargetResource,
        alert_summary: &str,
    ) -> Result<Option<SimilarIncident>, CallFailure> {
        let response = self
            .http
            .get(format!("{}/api/v1/incidents/similar", self.endpoint))
            .query(&[
                ("kind", target.kind.as_str()),
                ("name", target.name.as_str()),
                ("namespace", target.namespace.as_str()),
                ("summary", alert_summary),
            ])
            .send()
            .await
            .map_err(|e| CallFailure::from_reqwest(&e))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(CallFailure {
                class: classify_http_status(status.as_u16()),
                message: format!("similarity lookup returned {status}"),
            });
        }
        let incident: SimilarIncident = response
            .json()
            .await
            .map_err(|e| CallFailure::permanent(format!("malformed similarity response: {e}")))?;
        Ok(Some(incident))
    }
}
