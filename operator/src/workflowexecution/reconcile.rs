use futures::stream::StreamExt;
use k8s_openapi::jiff::Timestamp;
use kube::{
    Api, ResourceExt,
    runtime::{Controller, controller::Action},
};
use kubernaut_types::*;
use owo_colors::OwoColorize;
use std::{sync::Arc, time::Duration};

use super::{actions, routing};
use crate::context::Context;
use crate::util::{self, Error, categorize};

/// Runs the WorkflowExecution controller until the surrounding task is
/// aborted. The controller owns the execution child, so its status
/// transitions re-trigger reconciliation of the owner.
pub async fn run(ctx: Arc<Context>) {
    let namespace = ctx.config.namespace.clone();
    let executions: Api<WorkflowExecution> = Api::namespaced(ctx.client.clone(), &namespace);
    println!("{}", "🚀 WorkflowExecution controller started.".green());
    Controller::new(executions, Default::default())
        .owns(
            Api::<PipelineRun>::namespaced(ctx.client.clone(), &namespace),
            Default::default(),
        )
        .run(reconcile, on_error, ctx)
        .for_each(|_res| async move {})
        .await;
}

/// Action to be taken upon a `WorkflowExecution` resource during
/// reconciliation.
#[derive(Debug, PartialEq, Clone)]
enum WorkflowAction {
    AddFinalizer,
    Cleanup,
    CreateChild,
    MarkSkipped {
        reason: BlockReason,
    },
    MarkRunning,
    Complete {
        outcome: WorkflowOutcome,
        details: Option<FailureDetails>,
    },
    ChildMissing,
    DeleteChild {
        child_name: String,
    },
    NoOp,
}

impl WorkflowAction {
    fn to_str(&self) -> &str {
        match self {
            WorkflowAction::AddFinalizer => "AddFinalizer",
            WorkflowAction::Cleanup => "Cleanup",
            WorkflowAction::CreateChild => "CreateChild",
            WorkflowAction::MarkSkipped { .. } => "MarkSkipped",
            WorkflowAction::MarkRunning => "MarkRunning",
            WorkflowAction::Complete { .. } => "Complete",
            WorkflowAction::ChildMissing => "ChildMissing",
            WorkflowAction::DeleteChild { .. } => "DeleteChild",
            WorkflowAction::NoOp => "NoOp",
        }
    }
}

async fn reconcile(instance: Arc<WorkflowExecution>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = instance.name_any();
    util::with_deadline("WorkflowExecution", &name, reconcile_inner(instance, ctx)).await
}

async fn reconcile_inner(
    instance: Arc<WorkflowExecution>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let namespace: String = match instance.namespace() {
        None => {
            return Err(Error::UserInput(
                "Expected WorkflowExecution resource to be namespaced.".to_owned(),
            ));
        }
        Some(namespace) => namespace,
    };
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let (action, child) = determine_action(&ctx, &namespace, &instance).await?;

    if action != WorkflowAction::NoOp {
        ctx.log_action("WorkflowExecution", &namespace, &name, action.to_str())
            .await;
    }

    #[cfg(feature = "metrics")]
    {
        ctx.workflow_metrics.count_reconcile(action.to_str());
        ctx.workflow_metrics
            .observe_read(action.to_str(), start.elapsed().as_secs_f64());
    }

    #[cfg(feature = "metrics")]
    let timer = match action {
        WorkflowAction::NoOp => None,
        _ => Some(ctx.workflow_metrics.start_write_timer(action.to_str())),
    };

    let result = match action {
        WorkflowAction::AddFinalizer => {
            util::add_finalizer(ctx.client.clone(), instance.as_ref()).await?;
            Action::await_change()
        }
        WorkflowAction::Cleanup => {
            actions::cleanup(&ctx, &instance).await?;
            Action::await_change()
        }
        WorkflowAction::CreateChild => {
            actions::validate_and_create_child(&ctx, &instance).await?;
            Action::await_change()
        }
        WorkflowAction::MarkSkipped { reason } => {
            actions::mark_skipped(&ctx, &instance, reason).await?;
            Action::await_change()
        }
        WorkflowAction::MarkRunning => {
            if let Some(child) = child {
                actions::mark_running(&ctx, &instance, &child).await?;
            }
            Action::await_change()
        }
        WorkflowAction::Complete { outcome, details } => {
            actions::complete(&ctx, &instance, outcome, details).await?;
            Action::await_change()
        }
        WorkflowAction::ChildMissing => {
            actions::child_missing(&ctx, &instance).await?;
            Action::await_change()
        }
        WorkflowAction::DeleteChild { child_name } => {
            actions::delete_child(&ctx, &instance, &child_name).await?;
            Action::requeue(util::PROBE_INTERVAL)
        }
        WorkflowAction::NoOp => Action::requeue(util::PROBE_INTERVAL),
    };

    #[cfg(feature = "metrics")]
    if let Some(timer) = timer {
        timer.observe_duration();
    }

    Ok(result)
}

/// Read phase. Also returns the fetched child when the action needs it,
/// so the write phase never re-fetches.
async fn determine_action(
    ctx: &Context,
    namespace: &str,
    instance: &WorkflowExecution,
) -> Result<(WorkflowAction, Option<PipelineRun>), Error> {
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok((
            if util::has_finalizer(instance) {
                WorkflowAction::Cleanup
            } else {
                WorkflowAction::NoOp
            },
            None,
        ));
    }

    let status = instance.status.clone().unwrap_or_default();
    if !util::has_finalizer(instance) && !status.phase.is_terminal() {
        return Ok((WorkflowAction::AddFinalizer, None));
    }

    match status.phase {
        WorkflowExecutionPhase::Pending => {
            let child_name = routing::deterministic_child_name(
                &instance.spec.target,
                &instance.spec.workflow_ref.workflow_id,
            );
            match get_child(ctx, namespace, &child_name).await? {
                Some(child) => {
                    // The deterministic name is shared across every
                    // WorkflowExecution for this target; a child we do
                    // not own means another execution holds the slot.
                    let ours = child.metadata.owner_references.as_ref().is_some_and(|refs| {
                        refs.iter()
                            .any(|r| Some(&r.uid) == instance.metadata.uid.as_ref())
                    });
                    if !ours {
                        return Ok((
                            WorkflowAction::MarkSkipped {
                                reason: BlockReason::ResourceBusy,
                            },
                            None,
                        ));
                    }
                    let started = child
                        .status
                        .as_ref()
                        .is_some_and(|s| s.start_time.is_some());
                    if started {
                        Ok((WorkflowAction::MarkRunning, Some(child)))
                    } else {
                        Ok((WorkflowAction::NoOp, None))
                    }
                }
                None => Ok((WorkflowAction::CreateChild, None)),
            }
        }
        WorkflowExecutionPhase::Running => {
            let Some(child_name) = status.pipeline_run_ref.as_deref() else {
                return Ok((WorkflowAction::ChildMissing, None));
            };
            match get_child(ctx, namespace, child_name).await? {
                None => Ok((WorkflowAction::ChildMissing, None)),
                Some(child) => match routing::translate_terminal(&child) {
                    Some((outcome, details)) => {
                        Ok((WorkflowAction::Complete { outcome, details }, None))
                    }
                    None => Ok((WorkflowAction::NoOp, None)),
                },
            }
        }
        WorkflowExecutionPhase::Completed | WorkflowExecutionPhase::Failed => {
            // The child is kept around for the cooldown window so that
            // routing and operators can inspect it, then removed.
            let Some(child_name) = status.pipeline_run_ref.clone() else {
                return Ok((WorkflowAction::NoOp, None));
            };
            let cooled_down = status
                .completion_time
                .as_ref()
                .and_then(|t| Duration::try_from(Timestamp::now().duration_since(t.0)).ok())
                .is_some_and(|age| age >= ctx.config.cooldown);
            if cooled_down && get_child(ctx, namespace, &child_name).await?.is_some() {
                Ok((WorkflowAction::DeleteChild { child_name }, None))
            } else {
                Ok((WorkflowAction::NoOp, None))
            }
        }
        WorkflowExecutionPhase::Skipped => Ok((WorkflowAction::NoOp, None)),
    }
}

async fn get_child(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<Option<PipelineRun>, Error> {
    let api: Api<PipelineRun> = Api::namespaced(ctx.client.clone(), namespace);
    match api.get(name).await {
        Ok(child) => Ok(Some(child)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Actions to be taken when a reconciliation fails - for whatever reason.
fn on_error(instance: Arc<WorkflowExecution>, error: &Error, ctx: Arc<Context>) -> Action {
    let category = categorize(error);
    #[cfg(feature = "metrics")]
    ctx.workflow_metrics
        .count_failure(category.as_str(), "ReconcileError");
    #[cfg(not(feature = "metrics"))]
    let _ = &ctx;
    match category {
        util::FailureCategory::NotFound => Action::await_change(),
        util::FailureCategory::Conflict => Action::requeue(Duration::from_secs(1)),
        util::FailureCategory::PermanentAuth => {
            eprintln!(
                "{}",
                format!(
                    "Reconciliation of WorkflowExecution '{}' denied: {:?}",
                    instance.name_any(),
                    error
                )
                .red()
            );
            Action::requeue(Duration::from_secs(300))
        }
        _ => {
            eprintln!(
                "{}",
                format!("Reconciliation error: {:?} {:?}", error, instance.name_any()).red()
            );
            Action::requeue(Duration::from_secs(5))
        }
    }
}
