use kubernaut_types::AIAnalysisSpec;
use std::collections::BTreeMap;

/// Detection names the enrichment pipeline is allowed to report as
/// failed. Anything else is a malformed spec.
pub const KNOWN_DETECTIONS: &[&str] = &[
    "owner-chain",
    "pdb-protection",
    "replica-health",
    "resource-quota",
    "recent-deploy",
    "node-pressure",
];

/// Checks the inputs the investigation cannot proceed without. Returns a
/// human-readable reason on failure; these are user errors and are never
/// retried.
pub fn validate_spec(spec: &AIAnalysisSpec) -> Result<(), String> {
    if spec.signal_ref.fingerprint.is_empty() {
        return Err("signalRef.fingerprint is required".to_string());
    }
    if spec.signal_ref.signal_type.is_empty() {
        return Err("signalRef.signalType is required".to_string());
    }
    if spec.environment.is_empty() {
        return Err("environment is required".to_string());
    }
    if spec.target.kind.is_empty() || spec.target.name.is_empty() {
        return Err("target.kind and target.name are required".to_string());
    }
    if spec.correlation_id.is_empty() {
        return Err("correlationId is required".to_string());
    }
    for detection in &spec.enrichment.failed_detections {
        if !KNOWN_DETECTIONS.contains(&detection.name.as_str()) {
            return Err(format!(
                "unknown failed-detection '{}' in enrichment",
                detection.name
            ));
        }
    }
    Ok(())
}

/// Approval hint derived from investigation confidence. The policy
/// engine has the final say; this only seeds its input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalHint {
    AutoApprove,
    ManualReview,
    Block,
}

impl ApprovalHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalHint::AutoApprove => "auto-approve",
            ApprovalHint::ManualReview => "manual-review",
            ApprovalHint::Block => "block",
        }
    }
}

pub fn confidence_hint(confidence: f64) -> ApprovalHint {
    if confidence >= 0.80 {
        ApprovalHint::AutoApprove
    } else if confidence >= 0.60 {
        ApprovalHint::ManualReview
    } else {
        ApprovalHint::Block
    }
}

/// Converts a parameter key to the UPPER_SNAKE_CASE convention the
/// execution boundary expects.
pub fn to_upper_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c == '-' || c == '.' || c == ' ' || c == '_' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        out.push(c.to_ascii_uppercase());
    }
    out
}

/// Flattens the analysis inputs and the recommended steps into the
/// string→string parameter map of the workflow boundary. Step parameters
/// are prefixed with the step id so two steps never collide.
pub fn build_parameters(
    spec: &AIAnalysisSpec,
    investigation: &kubernaut_types::InvestigationResult,
) -> BTreeMap<String, String> {
    let mut parameters = BTreeMap::from([
        ("TARGET_KIND".to_string(), spec.target.kind.clone()),
        ("TARGET_NAME".to_string(), spec.target.name.clone()),
        ("TARGET_NAMESPACE".to_string(), spec.target.namespace.clone()),
        ("ENVIRONMENT".to_string(), spec.environment.clone()),
        ("CORRELATION_ID".to_string(), spec.correlation_id.clone()),
    ]);
    for step in &investigation.recommended_steps {
        for (key, value) in &step.parameters {
            parameters.insert(
                format!(
                    "{}_{}",
                    to_upper_snake_case(&step.id),
                    to_upper_snake_case(key)
                ),
                value.clone(),
            );
        }
    }
    parameters
}

/// Evidence recorded when the investigation retry budget runs out.
pub fn exhaustion_evidence(
    attempts: u32,
    elapsed_seconds: u64,
    last_error: Option<&str>,
) -> BTreeMap<String, String> {
    let mut evidence = BTreeMap::new();
    evidence.insert("retryAttempts".to_string(), attempts.to_string());
    evidence.insert("elapsedSeconds".to_string(), elapsed_seconds.to_string());
    if let Some(err) = last_error {
        evidence.insert("lastError".to_string(), err.to_string());
    }
    evidence
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubernaut_types::{FailedDetection, SignalReference, TargetResource};

    fn spec() -> AIAnalysisSpec {
        AIAnalysisSpec {
            signal_ref: SignalReference {
                name: "signal-1".to_string(),
                namespace: "monitoring".to_string(),
                fingerprint: "a1b2c3".to_string(),
                signal_type: "prometheus-alert".to_string(),
            },
            alert_summary: "pod crash-looping".to_string(),
            target: TargetResource {
                kind: "Deployment".to_string(),
                name: "app".to_string(),
                namespace: "production".to_string(),
            },
            environment: "production".to_string(),
            business_priority: Default::default(),
            enrichment: Default::default(),
            correlation_id: "corr-123".to_string(),
        }
    }

    #[test]
    fn complete_spec_passes() {
        assert!(validate_spec(&spec()).is_ok());
    }

    #[test]
    fn missing_fingerprint_is_rejected() {
        let mut s = spec();
        s.signal_ref.fingerprint.clear();
        assert!(validate_spec(&s).unwrap_err().contains("fingerprint"));
    }

    #[test]
    fn missing_target_is_rejected() {
        let mut s = spec();
        s.target.name.clear();
        assert!(validate_spec(&s).is_err());
    }

    #[test]
    fn unknown_failed_detection_is_fatal() {
        let mut s = spec();
        s.enrichment.failed_detections.push(FailedDetection {
            name: "sql-injection-scan".to_string(),
            detail: None,
        });
        let err = validate_spec(&s).unwrap_err();
        assert!(err.contains("sql-injection-scan"), "{err}");
    }

    #[test]
    fn known_failed_detection_is_accepted() {
        let mut s = spec();
        s.enrichment.failed_detections.push(FailedDetection {
            name: "owner-chain".to_string(),
            detail: Some("no owner found".to_string()),
        });
        assert!(validate_spec(&s).is_ok());
    }

    #[test]
    fn upper_snake_case_conversion() {
        assert_eq!(to_upper_snake_case("replicaCount"), "REPLICA_COUNT");
        assert_eq!(to_upper_snake_case("rec-001"), "REC_001");
        assert_eq!(to_upper_snake_case("grace.period.seconds"), "GRACE_PERIOD_SECONDS");
        assert_eq!(to_upper_snake_case("ALREADY_UPPER"), "ALREADY_UPPER");
    }

    #[test]
    fn parameters_carry_target_and_step_inputs() {
        use kubernaut_types::{InvestigationResult, WorkflowRef, WorkflowStep};
        let investigation = InvestigationResult {
            root_cause: "oom".to_string(),
            confidence: 0.9,
            recommended_steps: vec![WorkflowStep {
                id: "rec-001".to_string(),
                action: "scale-up".to_string(),
                depends_on: vec![],
                parameters: [("replicas".to_string(), "5".to_string())].into(),
            }],
            workflow: WorkflowRef::default(),
            target_in_owner_chain: true,
            warnings: vec![],
        };
        let params = build_parameters(&spec(), &investigation);
        assert_eq!(params.get("TARGET_NAME").map(String::as_str), Some("app"));
        assert_eq!(
            params.get("TARGET_NAMESPACE").map(String::as_str),
            Some("production")
        );
        assert_eq!(
            params.get("CORRELATION_ID").map(String::as_str),
            Some("corr-123")
        );
        assert_eq!(
            params.get("REC_001_REPLICAS").map(String::as_str),
            Some("5")
        );
        assert!(params.keys().all(|k| k
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')));
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(confidence_hint(0.95), ApprovalHint::AutoApprove);
        assert_eq!(confidence_hint(0.80), ApprovalHint::AutoApprove);
        assert_eq!(confidence_hint(0.79), ApprovalHint::ManualReview);
        assert_eq!(confidence_hint(0.60), ApprovalHint::ManualReview);
        assert_eq!(confidence_hint(0.59), ApprovalHint::Block);
        assert_eq!(confidence_hint(0.0), ApprovalHint::Block);
    }
}
