use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    jiff::Timestamp,
};
use kube::{
    Api, ResourceExt,
    api::{ObjectMeta, PostParams, Resource},
};
use kubernaut_types::*;
use owo_colors::OwoColorize;
use std::collections::BTreeMap;

use super::routing;
use crate::clients::audit::AuditEvent;
use crate::context::Context;
use crate::util::{self, Error, patch::patch_status};

fn instance_namespace(instance: &WorkflowExecution) -> Result<&str, Error> {
    instance.meta().namespace.as_deref().ok_or_else(|| {
        Error::UserInput("WorkflowExecution is missing metadata.namespace".to_string())
    })
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

fn terminal_audit(instance: &WorkflowExecution, outcome: &str) -> AuditEvent {
    let event_type = format!("workflowexecution.execution.{}", outcome.to_lowercase());
    AuditEvent::controller(&event_type, "execution", "complete", outcome)
        .resource(
            "WorkflowExecution",
            &instance.name_any(),
            instance.namespace().as_deref().unwrap_or_default(),
        )
        .correlation(&instance.spec.correlation_id)
}

/// Validates the spec, then creates the execution child under the
/// deterministic name. Losing the create race to another controller for
/// the same target resolves to a Skipped outcome, never a duplicate run.
pub async fn validate_and_create_child(
    ctx: &Context,
    instance: &WorkflowExecution,
) -> Result<(), Error> {
    let namespace = instance_namespace(instance)?.to_string();
    let workflow = &instance.spec.workflow_ref;
    if workflow.workflow_id.is_empty() {
        return fail_configuration(ctx, instance, "workflowRef.workflowId is required").await;
    }
    if !workflow.container_image.contains("@sha256:") {
        return fail_configuration(
            ctx,
            instance,
            "workflowRef.containerImage must be pinned by digest",
        )
        .await;
    }

    let child_name =
        routing::deterministic_child_name(&instance.spec.target, &workflow.workflow_id);
    let child = PipelineRun {
        metadata: ObjectMeta {
            name: Some(child_name.clone()),
            namespace: Some(namespace.clone()),
            owner_references: Some(vec![instance.controller_owner_ref(&()).unwrap()]),
            annotations: Some(BTreeMap::from([
                (
                    kubernaut_common::annotations::SPEC_HASH.to_string(),
                    util::hash_spec(&instance.spec),
                ),
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
        spec: PipelineRunSpec {
            workflow_ref: workflow.clone(),
            parameters: instance.spec.parameters.clone(),
            service_account_name: Some(
                instance
                    .spec
                    .execution_config
                    .service_account_name
                    .clone()
                    .unwrap_or_else(|| ctx.config.default_service_account.clone()),
            ),
        },
        status: None,
    };

    let api: Api<PipelineRun> = Api::namespaced(ctx.client.clone(), &namespace);
    match api.create(&PostParams::default(), &child).await {
        Ok(_) => {
            println!(
                "▶️ {}",
                format!(
                    "Created execution child '{}' for WorkflowExecution '{}'",
                    child_name,
                    instance.name_any()
                )
                .green()
            );
            let ref_name = child_name.clone();
            patch_status(ctx.client.clone(), instance, move |status: &mut WorkflowExecutionStatus| {
                status.pipeline_run_ref = Some(ref_name);
                status.message = Some("Execution child created".to_string());
            })
            .await?;
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            // Either our own child from a previous reconcile, or another
            // WorkflowExecution got there first.
            let existing = api.get(&child_name).await?;
            let ours = existing
                .metadata
                .owner_references
                .as_ref()
                .is_some_and(|refs| {
                    refs.iter()
                        .any(|r| Some(&r.uid) == instance.meta().uid.as_ref())
                });
            if ours {
                let ref_name = child_name.clone();
                patch_status(ctx.client.clone(), instance, move |status: &mut WorkflowExecutionStatus| {
                    status.pipeline_run_ref = Some(ref_name);
                })
                .await?;
                Ok(())
            } else {
                mark_skipped(ctx, instance, BlockReason::ResourceBusy).await
            }
        }
        Err(e) => Err(Error::from(e)),
    }
}

/// Pending → Running once the child has started.
pub async fn mark_running(
    ctx: &Context,
    instance: &WorkflowExecution,
    child: &PipelineRun,
) -> Result<(), Error> {
    let start_time = child
        .status
        .as_ref()
        .and_then(|s| s.start_time.clone())
        .unwrap_or_else(|| Time(Timestamp::now()));
    let child_name = child.name_any();
    patch_status(ctx.client.clone(), instance, move |status: &mut WorkflowExecutionStatus| {
        status.phase = WorkflowExecutionPhase::Running;
        status.start_time = Some(start_time);
        status.pipeline_run_ref = Some(child_name);
        status.message = Some("Workflow running".to_string());
    })
    .await?;
    Ok(())
}

/// Running → Completed | Failed from the child's terminal condition.
/// Exactly one terminal audit event is emitted here; the logical lock on
/// the target releases with the phase leaving Running.
pub async fn complete(
    ctx: &Context,
    instance: &WorkflowExecution,
    outcome: WorkflowOutcome,
    details: Option<FailureDetails>,
) -> Result<(), Error> {
    let generation = instance.metadata.generation;
    let (phase, condition) = match outcome {
        WorkflowOutcome::Success => (
            WorkflowExecutionPhase::Completed,
            ready_condition(true, "WorkflowSucceeded", "workflow completed", generation),
        ),
        _ => {
            let message = details
                .as_ref()
                .map(|d| d.message.clone())
                .unwrap_or_else(|| "workflow failed".to_string());
            (
                WorkflowExecutionPhase::Failed,
                ready_condition(
                    false,
                    details
                        .as_ref()
                        .map(|d| d.sub_reason.as_str())
                        .unwrap_or("WorkflowFailed"),
                    &message,
                    generation,
                ),
            )
        }
    };
    let audit_data = serde_json::json!({
        "workflowId": instance.spec.workflow_ref.workflow_id,
        "target": instance.spec.target.identity(),
        "failedStep": details.as_ref().and_then(|d| d.failed_step.clone()),
        "wasExecutionFailure": details.as_ref().map(|d| d.was_execution_failure),
    });
    let details_for_status = details.clone();
    let message = condition.message.clone();
    patch_status(ctx.client.clone(), instance, move |status: &mut WorkflowExecutionStatus| {
        status.phase = phase;
        status.outcome = Some(outcome);
        status.failure_details = details_for_status;
        status.completion_time = Some(Time(Timestamp::now()));
        status.message = Some(message);
        status.conditions = vec![condition];
    })
    .await?;
    if phase == WorkflowExecutionPhase::Failed {
        eprintln!(
            "❌ {}",
            format!(
                "WorkflowExecution '{}' failed: {}",
                instance.name_any(),
                details
                    .as_ref()
                    .map(|d| d.message.as_str())
                    .unwrap_or("unknown")
            )
            .red()
        );
        let reason = details
            .as_ref()
            .map(|d| d.sub_reason.clone())
            .unwrap_or_else(|| "WorkflowFailed".to_string());
        let message = details
            .as_ref()
            .map(|d| d.message.clone())
            .unwrap_or_default();
        if let Err(e) =
            util::events::publish_warning(ctx.client.clone(), instance, &reason, &message).await
        {
            eprintln!("{}", format!("Failed to publish warning event: {e}").red());
        }
        #[cfg(feature = "metrics")]
        ctx.workflow_metrics.count_failure("Permanent", &reason);
        if let Err(e) = crate::notification::emit::escalate(
            ctx,
            instance,
            &instance.spec.correlation_id,
            &format!("Remediation failed for {}", instance.spec.target),
            &format!(
                "WorkflowExecution '{}' failed ({reason}): {message}",
                instance.name_any()
            ),
        )
        .await
        {
            eprintln!(
                "⚠️ {}",
                format!("Failed to create escalation notification: {e}").yellow()
            );
        }
    }
    ctx.audit
        .emit(terminal_audit(instance, &outcome.to_string()).data(audit_data));
    Ok(())
}

/// Terminal without running anything: the deterministic-name race was
/// lost, or routing declined upstream.
pub async fn mark_skipped(
    ctx: &Context,
    instance: &WorkflowExecution,
    reason: BlockReason,
) -> Result<(), Error> {
    println!(
        "⛔ {}",
        format!(
            "WorkflowExecution '{}' skipped ({reason})",
            instance.name_any()
        )
        .yellow()
    );
    let generation = instance.metadata.generation;
    patch_status(ctx.client.clone(), instance, move |status: &mut WorkflowExecutionStatus| {
        status.phase = WorkflowExecutionPhase::Skipped;
        status.outcome = Some(WorkflowOutcome::Skipped);
        status.skip_reason = Some(reason);
        status.completion_time = Some(Time(Timestamp::now()));
        status.message = Some(format!("Execution skipped: {reason}"));
        status.conditions = vec![ready_condition(
            false,
            &reason.to_string(),
            "execution skipped",
            generation,
        )];
    })
    .await?;
    ctx.audit.emit(
        terminal_audit(instance, "Skipped").data(serde_json::json!({
            "blockReason": reason.to_string(),
            "target": instance.spec.target.identity(),
        })),
    );
    Ok(())
}

/// The child disappeared while we thought it was running; something
/// external deleted it.
pub async fn child_missing(ctx: &Context, instance: &WorkflowExecution) -> Result<(), Error> {
    complete(
        ctx,
        instance,
        WorkflowOutcome::Failed,
        Some(FailureDetails {
            sub_reason: "ConfigurationError".to_string(),
            was_execution_failure: false,
            failed_step: None,
            message: "execution child disappeared before reaching a terminal state".to_string(),
        }),
    )
    .await
}

/// Removes the child once the cooldown after completion has passed. The
/// terminal WorkflowExecution itself is preserved as the audit record.
pub async fn delete_child(
    ctx: &Context,
    instance: &WorkflowExecution,
    child_name: &str,
) -> Result<(), Error> {
    let api: Api<PipelineRun> =
        Api::namespaced(ctx.client.clone(), instance_namespace(instance)?);
    match api.delete(child_name, &Default::default()).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(e) => return Err(Error::from(e)),
    }
    patch_status(ctx.client.clone(), instance, |status: &mut WorkflowExecutionStatus| {
        status.pipeline_run_ref = None;
    })
    .await?;
    Ok(())
}

/// Deletion cleanup behind the finalizer: the child goes first, a
/// cancellation is recorded if we never reached a terminal phase, then
/// the finalizer is released.
pub async fn cleanup(ctx: &Context, instance: &WorkflowExecution) -> Result<(), Error> {
    let status = instance.status.clone().unwrap_or_default();
    if let Some(child_name) = status.pipeline_run_ref.as_deref() {
        let api: Api<PipelineRun> =
            Api::namespaced(ctx.client.clone(), instance_namespace(instance)?);
        match api.delete(child_name, &Default::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(Error::from(e)),
        }
    }
    if !status.phase.is_terminal() {
        ctx.audit
            .emit(terminal_audit(instance, "Cancelled").data(serde_json::json!({
                "phaseAtDeletion": status.phase.to_string(),
            })));
    }
    util::remove_finalizer(ctx.client.clone(), instance).await
}

async fn fail_configuration(
    ctx: &Context,
    instance: &WorkflowExecution,
    message: &str,
) -> Result<(), Error> {
    complete(
        ctx,
        instance,
        WorkflowOutcome::Failed,
        Some(FailureDetails {
            sub_reason: "ConfigurationError".to_string(),
            was_execution_failure: false,
            failed_step: None,
            message: message.to_string(),
        }),
    )
    .await
}
