use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    jiff::Timestamp,
};
use kube::{
    Api, ResourceExt,
    api::{ObjectMeta, PostParams, Resource},
    runtime::controller::Action,
};
use kubernaut_types::*;
use owo_colors::OwoColorize;
use std::{collections::BTreeMap, time::Duration};

use super::{graph, planner};
use crate::clients::audit::AuditEvent;
use crate::clients::holmes::{InvestigateOutcome, InvestigateRequest, InvestigationMode};
use crate::clients::policy::PolicyInput;
use crate::context::Context;
use crate::util::backoff::ErrorClass;
use crate::util::{self, Error, patch::patch_status};
use crate::workflowexecution::routing;

fn instance_namespace(instance: &AIAnalysis) -> Result<&str, Error> {
    instance
        .meta()
        .namespace
        .as_deref()
        .ok_or_else(|| Error::UserInput("AIAnalysis is missing metadata.namespace".to_string()))
}

fn ready_condition(status: bool, reason: &str, message: &str, generation: Option<i64>) -> Condition {
    Condition {
        type_: "Ready".to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Time(Timestamp::now()),
        observed_generation: generation,
    }
}

fn terminal_audit(instance: &AIAnalysis, outcome: &str) -> AuditEvent {
    let event_type = format!("aianalysis.analysis.{}", outcome.to_lowercase());
    AuditEvent::controller(&event_type, "analysis", "complete", outcome)
        .resource(
            "AIAnalysis",
            &instance.name_any(),
            instance.namespace().as_deref().unwrap_or_default(),
        )
        .correlation(&instance.spec.correlation_id)
}

/// Pending → Validating. Records the correlation id in status so audit
/// consumers never have to dereference the spec.
pub async fn begin(ctx: &Context, instance: &AIAnalysis) -> Result<(), Error> {
    let correlation_id = instance.spec.correlation_id.clone();
    patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
        status.phase = AIAnalysisPhase::Validating;
        status.correlation_id = Some(correlation_id);
        status.message = Some("Validating analysis inputs".to_string());
    })
    .await?;
    Ok(())
}

/// Validating → PreparingContext, or Failed on user error. User errors
/// are never retried.
pub async fn validate(ctx: &Context, instance: &AIAnalysis) -> Result<(), Error> {
    match planner::validate_spec(&instance.spec) {
        Ok(()) => {
            patch_status(ctx.client.clone(), instance, |status: &mut AIAnalysisStatus| {
                status.phase = AIAnalysisPhase::PreparingContext;
                status.message = Some("Inputs validated".to_string());
            })
            .await?;
            Ok(())
        }
        Err(reason) => fail(ctx, instance, "ValidationFailed", &reason).await,
    }
}

/// PreparingContext → Investigating.
pub async fn prepare_context(ctx: &Context, instance: &AIAnalysis) -> Result<(), Error> {
    patch_status(ctx.client.clone(), instance, |status: &mut AIAnalysisStatus| {
        status.phase = AIAnalysisPhase::Investigating;
        status.message = Some("Investigation context prepared".to_string());
    })
    .await?;
    Ok(())
}

fn elapsed_since(status: &AIAnalysisStatus, now: Timestamp) -> Duration {
    status
        .first_attempt_time
        .as_ref()
        .and_then(|t| Duration::try_from(now.duration_since(t.0)).ok())
        .unwrap_or(Duration::ZERO)
}

/// One investigation attempt. The schedule lives entirely in status;
/// between attempts the reconcile requeues rather than sleeping, so a
/// controller restart resumes exactly where the schedule left off.
pub async fn investigate_once(ctx: &Context, instance: &AIAnalysis) -> Result<Action, Error> {
    let status = instance.status.clone().unwrap_or_default();
    let backoff = &ctx.config.holmes_backoff;
    let now = Timestamp::now();
    let elapsed = elapsed_since(&status, now);

    if status.holmes_gpt_retry_attempts > 0 && backoff.is_exhausted(elapsed) {
        return investigation_exhausted(ctx, instance, &status, elapsed).await;
    }

    let request = InvestigateRequest {
        alert_summary: instance.spec.alert_summary.clone(),
        fingerprint: instance.spec.signal_ref.fingerprint.clone(),
        signal_type: instance.spec.signal_ref.signal_type.clone(),
        environment: instance.spec.environment.clone(),
        target: instance.spec.target.clone(),
        enrichment_context: instance.spec.enrichment.context.clone(),
        correlation_id: instance.spec.correlation_id.clone(),
        mode: InvestigationMode::Initial,
    };

    let started = std::time::Instant::now();
    let result = ctx.holmes.investigate(&request).await;
    let call_seconds = started.elapsed().as_secs_f64();

    match result {
        Ok(InvestigateOutcome::Success(investigation)) => {
            #[cfg(feature = "metrics")]
            util::metrics::observe_external_call("holmesgpt", "success", call_seconds);
            let confidence = investigation.confidence;
            patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
                status.phase = AIAnalysisPhase::EvaluatingConfidence;
                status.investigation = Some(investigation);
                status.next_retry_time = None;
                status.message = Some(format!(
                    "Investigation complete (confidence {:.2})",
                    confidence
                ));
            })
            .await?;
            Ok(Action::await_change())
        }
        Ok(InvestigateOutcome::NeedsHumanReview(reason)) => {
            #[cfg(feature = "metrics")]
            util::metrics::observe_external_call("holmesgpt", "needs_human_review", call_seconds);
            let context = ApprovalContext {
                required: true,
                reason: format!("Investigation requires human review: {reason}"),
                policy_hash: None,
                evidence: BTreeMap::from([(
                    "humanReviewReason".to_string(),
                    reason.to_string(),
                )]),
                degraded_mode: false,
            };
            patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
                status.phase = AIAnalysisPhase::Approving;
                status.human_review_reason = Some(reason.to_string());
                status.approval_context = Some(context);
                status.next_retry_time = None;
                status.message =
                    Some(format!("Awaiting human review ({reason})"));
            })
            .await?;
            Ok(Action::await_change())
        }
        Err(failure) if failure.class == ErrorClass::Permanent => {
            #[cfg(feature = "metrics")]
            util::metrics::observe_external_call("holmesgpt", "permanent_error", call_seconds);
            historical_fallback(ctx, instance, &failure.message).await
        }
        Err(failure) => {
            #[cfg(feature = "metrics")]
            {
                util::metrics::observe_external_call("holmesgpt", "transient_error", call_seconds);
                util::metrics::count_retry("holmesgpt", failure.class.as_str());
            }
            let attempts_before = status.holmes_gpt_retry_attempts;
            let delay = backoff.jittered(backoff.delay_after(attempts_before, failure.class));
            let first_attempt = status
                .first_attempt_time
                .clone()
                .unwrap_or_else(|| Time(now));
            let next_retry = Time(now.checked_add(
                k8s_openapi::jiff::SignedDuration::try_from(delay).unwrap_or_default(),
            )
            .unwrap_or(now));
            let attempt = RetryAttempt {
                attempt: attempts_before + 1,
                delay_seconds: delay.as_secs(),
                timestamp: Some(Time(now)),
                error: Some(failure.message.clone()),
            };
            let elapsed_secs = elapsed.as_secs();
            println!(
                "🔁 {}",
                format!(
                    "Investigation attempt {} for '{}' failed ({}); next attempt in {}s",
                    attempts_before + 1,
                    instance.name_any(),
                    failure.message,
                    delay.as_secs()
                )
                .yellow()
            );
            let progress = backoff.progress_percent(attempts_before + 1);
            let remaining = backoff.remaining_time(elapsed).as_secs();
            patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
                status.holmes_gpt_retry_attempts = attempts_before + 1;
                status.holmes_gpt_total_elapsed_seconds = elapsed_secs;
                status.first_attempt_time = Some(first_attempt);
                status.next_retry_time = Some(next_retry);
                status.retry_attempts.push(attempt);
                status.message = Some(format!(
                    "Investigation attempt {} failed; retrying ({:.0}% of attempts used, {}s of budget left)",
                    attempts_before + 1,
                    progress,
                    remaining
                ));
            })
            .await?;
            Ok(Action::requeue(delay))
        }
    }
}

/// Retry budget spent: fall over to manual approval with the failure
/// evidence attached. The analysis is degraded, not failed.
async fn investigation_exhausted(
    ctx: &Context,
    instance: &AIAnalysis,
    status: &AIAnalysisStatus,
    elapsed: Duration,
) -> Result<Action, Error> {
    let last_error = status
        .retry_attempts
        .last()
        .and_then(|a| a.error.as_deref());
    let context = ApprovalContext {
        required: true,
        reason: "AI analysis unavailable".to_string(),
        policy_hash: None,
        evidence: planner::exhaustion_evidence(
            status.holmes_gpt_retry_attempts,
            elapsed.as_secs(),
            last_error,
        ),
        degraded_mode: true,
    };
    let elapsed_secs = elapsed.as_secs();
    patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
        status.phase = AIAnalysisPhase::Approving;
        status.approval_context = Some(context);
        status.holmes_gpt_total_elapsed_seconds = elapsed_secs;
        status.next_retry_time = None;
        status.message = Some("AI analysis unavailable; requiring manual approval".to_string());
    })
    .await?;
    ctx.audit.emit(
        AuditEvent::controller(
            "aianalysis.analysis.degraded",
            "analysis",
            "degrade",
            "ApprovalRequired",
        )
        .resource(
            "AIAnalysis",
            &instance.name_any(),
            instance.namespace().as_deref().unwrap_or_default(),
        )
        .correlation(&instance.spec.correlation_id)
        .data(serde_json::json!({
            "retryAttempts": status.holmes_gpt_retry_attempts,
            "elapsedSeconds": elapsed_secs,
        })),
    );
    Ok(Action::await_change())
}

/// Permanent investigation error: try to reuse the workflow from the most
/// similar past incident before giving up.
async fn historical_fallback(
    ctx: &Context,
    instance: &AIAnalysis,
    original_error: &str,
) -> Result<Action, Error> {
    let similar = ctx
        .holmes
        .find_similar_incident(&instance.spec.target, &instance.spec.alert_summary)
        .await;
    match similar {
        Ok(Some(incident)) => {
            println!(
                "🧭 {}",
                format!(
                    "Recovered analysis '{}' from similar incident {}",
                    instance.name_any(),
                    incident.incident_id
                )
                .green()
            );
            let investigation = InvestigationResult {
                root_cause: incident.root_cause,
                confidence: incident.confidence,
                recommended_steps: incident.recommended_steps,
                workflow: incident.workflow,
                target_in_owner_chain: false,
                warnings: vec![format!(
                    "investigation unavailable; recovered from similar incident {}",
                    incident.incident_id
                )],
            };
            patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
                status.phase = AIAnalysisPhase::EvaluatingConfidence;
                status.investigation = Some(investigation);
                status.next_retry_time = None;
                status.message = Some("Recovered from historical incident".to_string());
            })
            .await?;
            Ok(Action::await_change())
        }
        Ok(None) => {
            fail(
                ctx,
                instance,
                "InvestigationFailed",
                &format!("investigation failed permanently and no similar incident was found: {original_error}"),
            )
            .await?;
            Ok(Action::await_change())
        }
        Err(fallback_err) => {
            fail(
                ctx,
                instance,
                "InvestigationFailed",
                &format!(
                    "investigation failed permanently ({original_error}); similarity fallback also failed ({fallback_err})"
                ),
            )
            .await?;
            Ok(Action::await_change())
        }
    }
}

/// EvaluatingConfidence → ValidatingDependencies. The band is a hint for
/// the policy input; policy has the final say.
pub async fn evaluate_confidence(ctx: &Context, instance: &AIAnalysis) -> Result<(), Error> {
    let confidence = instance
        .status
        .as_ref()
        .and_then(|s| s.investigation.as_ref())
        .map(|i| i.confidence)
        .ok_or_else(|| Error::UserInput("no investigation result to evaluate".to_string()))?;
    let hint = planner::confidence_hint(confidence);
    patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
        status.phase = AIAnalysisPhase::ValidatingDependencies;
        status.message = Some(format!(
            "Confidence {:.2} → {}",
            confidence,
            hint.as_str()
        ));
    })
    .await?;
    Ok(())
}

/// ValidatingDependencies → Approving. A cycle (or any other defect in
/// the recommended graph) forces manual approval with the cycle path in
/// evidence; the workflow is never auto-modified.
pub async fn validate_dependencies(ctx: &Context, instance: &AIAnalysis) -> Result<(), Error> {
    let steps = instance
        .status
        .as_ref()
        .and_then(|s| s.investigation.as_ref())
        .map(|i| i.recommended_steps.clone())
        .unwrap_or_default();
    match graph::validate_dependencies(&steps) {
        Ok(_order) => {
            patch_status(ctx.client.clone(), instance, |status: &mut AIAnalysisStatus| {
                status.phase = AIAnalysisPhase::Approving;
                status.dependency_validation = Some(DependencyValidation {
                    valid: true,
                    cycle_path: None,
                });
                status.message = Some("Workflow dependencies validated".to_string());
            })
            .await?;
        }
        Err(err) => {
            let detail = err.to_string();
            let cycle_path = err.cycle_path().map(str::to_string);
            let mut evidence = BTreeMap::from([(
                "dependencyValidationError".to_string(),
                detail.clone(),
            )]);
            if let Some(ref path) = cycle_path {
                evidence.insert("cyclePath".to_string(), path.clone());
            }
            let context = ApprovalContext {
                required: true,
                reason: format!("Recommended workflow rejected: {detail}"),
                policy_hash: None,
                evidence,
                degraded_mode: false,
            };
            patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
                status.phase = AIAnalysisPhase::Approving;
                status.dependency_validation = Some(DependencyValidation {
                    valid: false,
                    cycle_path,
                });
                status.approval_context = Some(context);
                status.message = Some(detail);
            })
            .await?;
        }
    }
    Ok(())
}

/// First entry into Approving on the happy path: evaluate the policy
/// bundle. A failed evaluation degrades to requiring approval.
pub async fn evaluate_policy(ctx: &Context, instance: &AIAnalysis) -> Result<(), Error> {
    let status = instance.status.clone().unwrap_or_default();
    let investigation = status.investigation.as_ref();
    let validation = status.dependency_validation.as_ref();
    let mut evidence = BTreeMap::new();
    if let Some(inv) = investigation {
        evidence.insert(
            "confidenceHint".to_string(),
            planner::confidence_hint(inv.confidence).as_str().to_string(),
        );
        if !inv.warnings.is_empty() {
            evidence.insert("warnings".to_string(), inv.warnings.join("; "));
        }
    }
    let input = PolicyInput {
        confidence: investigation.map(|i| i.confidence),
        environment: instance.spec.environment.clone(),
        priority: instance.spec.business_priority.to_string(),
        recommended_steps: investigation
            .map(|i| i.recommended_steps.clone())
            .unwrap_or_default(),
        cycle_detected: validation.is_some_and(|v| !v.valid),
        cycle_path: validation.and_then(|v| v.cycle_path.clone()),
        investigation_summary: investigation.map(|i| i.root_cause.clone()),
        evidence: evidence.clone(),
    };

    match ctx.policy.evaluate(&input).await {
        Ok(decision) if !decision.require_approval => {
            let context = ApprovalContext {
                required: false,
                reason: decision.reason,
                policy_hash: decision.policy_hash,
                evidence,
                degraded_mode: false,
            };
            patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
                status.phase = AIAnalysisPhase::CreatingWorkflow;
                status.approval_context = Some(context);
                status.message = Some("Policy approved automatic remediation".to_string());
            })
            .await?;
        }
        Ok(decision) => {
            let context = ApprovalContext {
                required: true,
                reason: decision.reason,
                policy_hash: decision.policy_hash,
                evidence,
                degraded_mode: false,
            };
            patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
                status.approval_context = Some(context);
                status.message = Some("Policy requires manual approval".to_string());
            })
            .await?;
        }
        Err(failure) => {
            // Safe default: an unavailable policy engine must never
            // auto-approve.
            evidence.insert("policyError".to_string(), failure.to_string());
            let context = ApprovalContext {
                required: true,
                reason: "Policy evaluation failed; defaulting to manual approval".to_string(),
                policy_hash: None,
                evidence,
                degraded_mode: true,
            };
            patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
                status.approval_context = Some(context);
                status.message =
                    Some("Policy engine unavailable; requiring manual approval".to_string());
            })
            .await?;
        }
    }
    Ok(())
}

/// Creates the RemediationApproval sub-resource and waits on it. The
/// controller owns the approval, so a decision triggers reconciliation
/// without polling.
pub async fn request_approval(ctx: &Context, instance: &AIAnalysis) -> Result<(), Error> {
    let namespace = instance_namespace(instance)?.to_string();
    let approval_name = format!("{}-approval", instance.name_any());
    let context = instance
        .status
        .as_ref()
        .and_then(|s| s.approval_context.clone())
        .ok_or_else(|| Error::UserInput("no approval context to request approval for".to_string()))?;
    let approval = RemediationApproval {
        metadata: ObjectMeta {
            name: Some(approval_name.clone()),
            namespace: Some(namespace.clone()),
            owner_references: Some(vec![instance.controller_owner_ref(&()).unwrap()]),
            annotations: Some(BTreeMap::from([(
                kubernaut_common::annotations::CREATED_BY.to_string(),
                util::MANAGER_NAME.to_string(),
            )])),
            ..Default::default()
        },
        spec: RemediationApprovalSpec {
            analysis_ref: instance.name_any(),
            reason: context.reason.clone(),
            confidence: instance
                .status
                .as_ref()
                .and_then(|s| s.investigation.as_ref())
                .map(|i| i.confidence),
            environment: instance.spec.environment.clone(),
            evidence: context.evidence.clone(),
            requested_at: Some(Time(Timestamp::now())),
            correlation_id: instance.spec.correlation_id.clone(),
        },
        status: None,
    };
    let api: Api<RemediationApproval> = Api::namespaced(ctx.client.clone(), &namespace);
    match api.create(&PostParams::default(), &approval).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => {}
        Err(e) => return Err(Error::from(e)),
    }
    let ref_name = approval_name.clone();
    patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
        status.approval_ref = Some(ref_name);
        status.message = Some("Awaiting manual approval".to_string());
    })
    .await?;
    ctx.audit.emit(
        AuditEvent::controller(
            "aianalysis.approval.required",
            "analysis",
            "require_approval",
            "Pending",
        )
        .resource("AIAnalysis", &instance.name_any(), &namespace)
        .correlation(&instance.spec.correlation_id)
        .data(serde_json::json!({
            "approvalRef": approval_name,
            "reason": context.reason,
            "degradedMode": context.degraded_mode,
        })),
    );
    // Best-effort: the approval gate stands whether or not anyone is
    // paged about it.
    if let Err(e) = crate::notification::emit::escalate(
        ctx,
        instance,
        &instance.spec.correlation_id,
        &format!("Remediation approval required for {}", instance.spec.target),
        &format!(
            "AIAnalysis '{}' requires manual approval: {}",
            instance.name_any(),
            context.reason
        ),
    )
    .await
    {
        eprintln!(
            "⚠️ {}",
            format!("Failed to create escalation notification: {e}").yellow()
        );
    }
    Ok(())
}

/// The approval was granted: resume toward workflow creation.
pub async fn approval_approved(
    ctx: &Context,
    instance: &AIAnalysis,
    decided_by: Option<String>,
) -> Result<(), Error> {
    patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
        status.phase = AIAnalysisPhase::CreatingWorkflow;
        status.message = Some(match decided_by {
            Some(user) => format!("Approved by {user}"),
            None => "Approved".to_string(),
        });
    })
    .await?;
    Ok(())
}

/// The approval was rejected: terminal failure, by operator decision.
pub async fn approval_rejected(
    ctx: &Context,
    instance: &AIAnalysis,
    decided_by: Option<String>,
) -> Result<(), Error> {
    let who = decided_by.unwrap_or_else(|| "unknown".to_string());
    fail(
        ctx,
        instance,
        "ApprovalRejected",
        &format!("remediation rejected by {who}"),
    )
    .await
}

/// CreatingWorkflow → Completed. Routing decides first; a blocked target
/// records a skip outcome instead of creating.
pub async fn create_workflow(ctx: &Context, instance: &AIAnalysis) -> Result<(), Error> {
    let namespace = instance_namespace(instance)?.to_string();
    let investigation = instance
        .status
        .as_ref()
        .and_then(|s| s.investigation.clone())
        .ok_or_else(|| Error::UserInput("no investigation result to execute".to_string()))?;

    let api: Api<WorkflowExecution> = Api::namespaced(ctx.client.clone(), &namespace);
    let existing = api.list(&Default::default()).await?;
    if let Some(reason) = routing::routing_decision(
        &instance.spec.target,
        &existing.items,
        Timestamp::now(),
        ctx.config.cooldown,
    ) {
        println!(
            "⛔ {}",
            format!(
                "Routing blocked for '{}' ({}); skipping workflow creation",
                instance.spec.target, reason
            )
            .yellow()
        );
        patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
            status.phase = AIAnalysisPhase::Completed;
            status.routing_skipped = Some(reason.to_string());
            status.message = Some(format!("Remediation skipped: {reason}"));
        })
        .await?;
        ctx.audit.emit(
            AuditEvent::controller("aianalysis.routing.skipped", "analysis", "skip", "Skipped")
                .resource("AIAnalysis", &instance.name_any(), &namespace)
                .correlation(&instance.spec.correlation_id)
                .data(serde_json::json!({
                    "target": instance.spec.target.identity(),
                    "blockReason": reason.to_string(),
                })),
        );
        return Ok(());
    }

    let execution_name = format!("{}-execution", instance.name_any());
    let rationale = investigation.root_cause.clone();
    let execution = WorkflowExecution {
        metadata: ObjectMeta {
            name: Some(execution_name.clone()),
            namespace: Some(namespace.clone()),
            owner_references: Some(vec![instance.controller_owner_ref(&()).unwrap()]),
            annotations: Some(BTreeMap::from([
                (
                    kubernaut_common::annotations::CREATED_BY.to_string(),
                    util::MANAGER_NAME.to_string(),
                ),
                (
                    kubernaut_common::annotations::CORRELATION_ID.to_string(),
                    instance.spec.correlation_id.clone(),
                ),
            ])),
            ..Default::default()
        },
        spec: WorkflowExecutionSpec {
            analysis_ref: Some(instance.name_any()),
            target: instance.spec.target.clone(),
            workflow_ref: investigation.workflow.clone(),
            parameters: planner::build_parameters(&instance.spec, &investigation),
            confidence: Some(investigation.confidence),
            rationale: Some(rationale),
            execution_config: ExecutionConfig {
                service_account_name: None,
            },
            correlation_id: instance.spec.correlation_id.clone(),
        },
        status: None,
    };
    match api.create(&PostParams::default(), &execution).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => {}
        Err(e) => return Err(Error::from(e)),
    }
    let generation = instance.metadata.generation;
    let ref_name = execution_name.clone();
    patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
        status.phase = AIAnalysisPhase::Completed;
        status.workflow_execution_ref = Some(ref_name);
        status.message = Some("Workflow execution created".to_string());
        status.conditions = vec![ready_condition(
            true,
            "WorkflowCreated",
            "analysis complete",
            generation,
        )];
    })
    .await?;
    ctx.audit.emit(
        terminal_audit(instance, "Completed").data(serde_json::json!({
            "workflowExecutionRef": execution_name,
            "workflowId": investigation.workflow.workflow_id,
            "confidence": investigation.confidence,
        })),
    );
    Ok(())
}

/// Any pre-terminal phase → Failed, with the machine-readable sub-reason
/// surfaced in the condition, a Warning event, and a terminal audit
/// record.
pub async fn fail(
    ctx: &Context,
    instance: &AIAnalysis,
    reason: &str,
    message: &str,
) -> Result<(), Error> {
    eprintln!(
        "❌ {}",
        format!(
            "AIAnalysis '{}' failed ({}): {}",
            instance.name_any(),
            reason,
            message
        )
        .red()
    );
    let generation = instance.metadata.generation;
    let reason_owned = reason.to_string();
    let message_owned = message.to_string();
    patch_status(ctx.client.clone(), instance, move |status: &mut AIAnalysisStatus| {
        status.phase = AIAnalysisPhase::Failed;
        status.message = Some(message_owned.clone());
        status.conditions = vec![ready_condition(
            false,
            &reason_owned,
            &message_owned,
            generation,
        )];
    })
    .await?;
    #[cfg(feature = "metrics")]
    ctx.analysis_metrics.count_failure("Permanent", reason);
    if let Err(e) =
        util::events::publish_warning(ctx.client.clone(), instance, reason, message).await
    {
        eprintln!("{}", format!("Failed to publish warning event: {e}").red());
    }
    ctx.audit.emit(terminal_audit(instance, "Failed").data(serde_json::json!({
        "reason": reason,
        "message": message,
    })));
    Ok(())
}

/// Deletion cleanup behind the finalizer: record the cancellation when
/// the analysis never reached a terminal phase, then release the
/// finalizer.
pub async fn cleanup(ctx: &Context, instance: &AIAnalysis) -> Result<(), Error> {
    let phase = instance
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or_default();
    if !phase.is_terminal() {
        ctx.audit
            .emit(terminal_audit(instance, "Cancelled").data(serde_json::json!({
                "phaseAtDeletion": phase.to_string(),
            })));
    }
    util::remove_finalizer(ctx.client.clone(), instance).await
}
