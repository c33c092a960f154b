use k8s_openapi::jiff::Timestamp;
use kubernaut_types::{
    BlockReason, EXECUTION_FAILURE_REASONS, FailureDetails, PipelineRun, TargetResource,
    WorkflowExecution, WorkflowExecutionPhase, WorkflowOutcome,
};
use std::time::Duration;

/// Deterministic execution-child name: `wfe-` plus the first 16 hex
/// characters of SHA-256 over the target identity and workflow id. Two
/// routers racing to remediate the same target collide on this name and
/// the loser maps AlreadyExists to a Skipped outcome.
pub fn deterministic_child_name(target: &TargetResource, workflow_id: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(target.identity().as_bytes());
    hasher.update(b":");
    hasher.update(workflow_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("wfe-{}", &digest[..16])
}

fn phase(instance: &WorkflowExecution) -> WorkflowExecutionPhase {
    instance
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or_default()
}

fn completion(instance: &WorkflowExecution) -> Option<Timestamp> {
    instance
        .status
        .as_ref()
        .and_then(|s| s.completion_time.as_ref())
        .map(|t| t.0)
}

/// The lock-free resource lock: a predicate over the WorkflowExecutions
/// currently known for the target. Not a mutex; concurrent routers that
/// both pass are resolved by deterministic child naming.
///
/// Skipped executions never block: they performed no remediation. A
/// cleared execution failure is an explicit operator release, so neither
/// the failure block nor the cooldown applies to it.
pub fn routing_decision(
    target: &TargetResource,
    existing: &[WorkflowExecution],
    now: Timestamp,
    cooldown: Duration,
) -> Option<BlockReason> {
    let same_target: Vec<&WorkflowExecution> = existing
        .iter()
        .filter(|w| w.spec.target == *target)
        .collect();

    if same_target
        .iter()
        .any(|w| phase(w) == WorkflowExecutionPhase::Running)
    {
        return Some(BlockReason::ResourceBusy);
    }

    // Only executions that actually ran participate in cooldown and
    // failure blocking.
    let most_recent = same_target
        .iter()
        .filter(|w| {
            matches!(
                phase(w),
                WorkflowExecutionPhase::Completed | WorkflowExecutionPhase::Failed
            )
        })
        .filter(|w| completion(w).is_some())
        .max_by_key(|w| completion(w).unwrap())?;

    let status = most_recent.status.as_ref()?;
    if phase(most_recent) == WorkflowExecutionPhase::Failed {
        let was_execution_failure = status
            .failure_details
            .as_ref()
            .is_some_and(|d| d.was_execution_failure);
        if was_execution_failure {
            return if status.block_clearance.is_none() {
                Some(BlockReason::PreviousExecutionFailed)
            } else {
                None
            };
        }
        // Pre-execution failures are retried upstream with backoff and
        // never block routing.
        return None;
    }

    let age = now.duration_since(completion(most_recent).unwrap());
    if let Ok(age) = Duration::try_from(age)
        && age < cooldown
    {
        return Some(BlockReason::RecentlyRemediated);
    }
    None
}

/// Translates the child's terminal Succeeded condition into our outcome
/// and failure details. Returns None while the child is still running.
pub fn translate_terminal(child: &PipelineRun) -> Option<(WorkflowOutcome, Option<FailureDetails>)> {
    let condition = child.terminal_condition()?;
    if condition.status == "True" {
        return Some((WorkflowOutcome::Success, None));
    }
    let status = child.status.as_ref();
    let details = FailureDetails {
        sub_reason: condition.reason.clone(),
        was_execution_failure: EXECUTION_FAILURE_REASONS.contains(&condition.reason.as_str()),
        failed_step: status.and_then(|s| s.failed_step.clone()),
        message: if condition.message.is_empty() {
            status
                .and_then(|s| s.message.clone())
                .unwrap_or_else(|| "workflow run failed".to_string())
        } else {
            condition.message.clone()
        },
    };
    Some((WorkflowOutcome::Failed, Some(details)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
    use kubernaut_types::{
        BlockClearance, PipelineRunStatus, WorkflowExecutionSpec, WorkflowExecutionStatus,
    };

    fn target() -> TargetResource {
        TargetResource {
            kind: "Deployment".to_string(),
            name: "app".to_string(),
            namespace: "production".to_string(),
        }
    }

    fn execution(
        phase: WorkflowExecutionPhase,
        completed_secs_ago: Option<i64>,
        now: Timestamp,
    ) -> WorkflowExecution {
        let mut we = WorkflowExecution::new(
            "we-1",
            WorkflowExecutionSpec {
                target: target(),
                correlation_id: "corr".to_string(),
                ..Default::default()
            },
        );
        we.status = Some(WorkflowExecutionStatus {
            phase,
            completion_time: completed_secs_ago
                .map(|s| Time(now.checked_sub(jiff_secs(s)).unwrap())),
            ..Default::default()
        });
        we
    }

    fn jiff_secs(s: i64) -> k8s_openapi::jiff::SignedDuration {
        k8s_openapi::jiff::SignedDuration::from_secs(s)
    }

    fn failed_execution(
        cleared: bool,
        execution_failure: bool,
        completed_secs_ago: i64,
        now: Timestamp,
    ) -> WorkflowExecution {
        let mut we = execution(
            WorkflowExecutionPhase::Failed,
            Some(completed_secs_ago),
            now,
        );
        let status = we.status.as_mut().unwrap();
        status.failure_details = Some(FailureDetails {
            sub_reason: "StepFailed".to_string(),
            was_execution_failure: execution_failure,
            failed_step: Some("scale".to_string()),
            message: "step failed".to_string(),
        });
        if cleared {
            status.block_clearance = Some(BlockClearance {
                cleared_at: Some(Time(now)),
                cleared_by: "ops@example.com".to_string(),
                clear_reason: "root cause fixed".to_string(),
                clear_method: "WebhookValidated".to_string(),
            });
        }
        we
    }

    const COOLDOWN: Duration = Duration::from_secs(300);

    #[test]
    fn running_execution_blocks_with_resource_busy() {
        let now = Timestamp::now();
        let existing = vec![execution(WorkflowExecutionPhase::Running, None, now)];
        assert_eq!(
            routing_decision(&target(), &existing, now, COOLDOWN),
            Some(BlockReason::ResourceBusy)
        );
    }

    #[test]
    fn recent_success_blocks_with_cooldown() {
        let now = Timestamp::now();
        let existing = vec![execution(WorkflowExecutionPhase::Completed, Some(60), now)];
        assert_eq!(
            routing_decision(&target(), &existing, now, COOLDOWN),
            Some(BlockReason::RecentlyRemediated)
        );
    }

    #[test]
    fn old_success_does_not_block() {
        let now = Timestamp::now();
        let existing = vec![execution(WorkflowExecutionPhase::Completed, Some(600), now)];
        assert_eq!(routing_decision(&target(), &existing, now, COOLDOWN), None);
    }

    #[test]
    fn uncleared_execution_failure_blocks() {
        let now = Timestamp::now();
        let existing = vec![failed_execution(false, true, 600, now)];
        assert_eq!(
            routing_decision(&target(), &existing, now, COOLDOWN),
            Some(BlockReason::PreviousExecutionFailed)
        );
    }

    #[test]
    fn cleared_execution_failure_routes_normally() {
        let now = Timestamp::now();
        let existing = vec![failed_execution(true, true, 60, now)];
        assert_eq!(routing_decision(&target(), &existing, now, COOLDOWN), None);
    }

    #[test]
    fn pre_execution_failure_never_blocks() {
        let now = Timestamp::now();
        let existing = vec![failed_execution(false, false, 10, now)];
        assert_eq!(routing_decision(&target(), &existing, now, COOLDOWN), None);
    }

    #[test]
    fn skipped_executions_are_ignored() {
        let now = Timestamp::now();
        let existing = vec![execution(WorkflowExecutionPhase::Skipped, Some(10), now)];
        assert_eq!(routing_decision(&target(), &existing, now, COOLDOWN), None);
    }

    #[test]
    fn other_targets_do_not_interfere() {
        let now = Timestamp::now();
        let mut other = execution(WorkflowExecutionPhase::Running, None, now);
        other.spec.target.name = "other-app".to_string();
        assert_eq!(routing_decision(&target(), &[other], now, COOLDOWN), None);
    }

    #[test]
    fn child_name_is_deterministic_and_label_safe() {
        let a = deterministic_child_name(&target(), "restart-rollout");
        let b = deterministic_child_name(&target(), "restart-rollout");
        assert_eq!(a, b);
        assert_eq!(a.len(), "wfe-".len() + 16);
        assert!(a.starts_with("wfe-"));
        assert!(
            a.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
            "{a}"
        );

        let c = deterministic_child_name(&target(), "scale-up");
        assert_ne!(a, c);
    }

    fn run_with_condition(status: &str, reason: &str, message: &str) -> PipelineRun {
        let mut run = PipelineRun::new("wfe-abc", Default::default());
        run.status = Some(PipelineRunStatus {
            conditions: vec![Condition {
                type_: "Succeeded".to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Time(Timestamp::now()),
                observed_generation: None,
            }],
            failed_step: Some("scale".to_string()),
            ..Default::default()
        });
        run
    }

    #[test]
    fn successful_child_translates_to_success() {
        let (outcome, details) =
            translate_terminal(&run_with_condition("True", "Succeeded", "")).unwrap();
        assert_eq!(outcome, WorkflowOutcome::Success);
        assert!(details.is_none());
    }

    #[test]
    fn step_failure_is_an_execution_failure() {
        let (outcome, details) =
            translate_terminal(&run_with_condition("False", "StepFailed", "step 2 exited 1"))
                .unwrap();
        assert_eq!(outcome, WorkflowOutcome::Failed);
        let details = details.unwrap();
        assert!(details.was_execution_failure);
        assert_eq!(details.failed_step.as_deref(), Some("scale"));
        assert_eq!(details.sub_reason, "StepFailed");
    }

    #[test]
    fn resolver_failure_is_not_an_execution_failure() {
        let (_, details) = translate_terminal(&run_with_condition(
            "False",
            "ResolverFailed",
            "bundle not found",
        ))
        .unwrap();
        assert!(!details.unwrap().was_execution_failure);
    }

    #[test]
    fn running_child_has_no_terminal_translation() {
        let run = PipelineRun::new("wfe-abc", Default::default());
        assert!(translate_terminal(&run).is_none());
    }
}
