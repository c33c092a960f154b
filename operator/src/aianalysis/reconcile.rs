use futures::stream::StreamExt;
use k8s_openapi::jiff::Timestamp;
use kube::{
    Api, ResourceExt,
    runtime::{Controller, controller::Action},
};
use kubernaut_types::*;
use owo_colors::OwoColorize;
use std::{sync::Arc, time::Duration};

use super::actions;
use crate::context::Context;
use crate::util::{self, Error, categorize};

/// Runs the AIAnalysis controller until the surrounding task is aborted.
/// Owning the approval and execution children means their status changes
/// re-trigger reconciliation of the analysis without polling.
pub async fn run(ctx: Arc<Context>) {
    let namespace = ctx.config.namespace.clone();
    let analyses: Api<AIAnalysis> = Api::namespaced(ctx.client.clone(), &namespace);
    println!("{}", "🚀 AIAnalysis controller started.".green());
    Controller::new(analyses, Default::default())
        .owns(
            Api::<RemediationApproval>::namespaced(ctx.client.clone(), &namespace),
            Default::default(),
        )
        .owns(
            Api::<WorkflowExecution>::namespaced(ctx.client.clone(), &namespace),
            Default::default(),
        )
        .run(reconcile, on_error, ctx)
        .for_each(|_res| async move {})
        .await;
}

/// Action to be taken upon an `AIAnalysis` resource during
/// reconciliation. The phase in status decides; every action performs at
/// most one transition so that a crash at any point is recoverable.
#[derive(Debug, PartialEq, Clone)]
enum AnalysisAction {
    AddFinalizer,
    Cleanup,
    Begin,
    Validate,
    PrepareContext,
    WaitRetry(Duration),
    Investigate,
    EvaluateConfidence,
    ValidateDependencies,
    EvaluatePolicy,
    RequestApproval,
    AwaitApproval,
    ApprovalApproved(Option<String>),
    ApprovalRejected(Option<String>),
    CreateWorkflow,
    NoOp,
}

impl AnalysisAction {
    fn to_str(&self) -> &str {
        match self {
            AnalysisAction::AddFinalizer => "AddFinalizer",
            AnalysisAction::Cleanup => "Cleanup",
            AnalysisAction::Begin => "Begin",
            AnalysisAction::Validate => "Validate",
            AnalysisAction::PrepareContext => "PrepareContext",
            AnalysisAction::WaitRetry(_) => "WaitRetry",
            AnalysisAction::Investigate => "Investigate",
            AnalysisAction::EvaluateConfidence => "EvaluateConfidence",
            AnalysisAction::ValidateDependencies => "ValidateDependencies",
            AnalysisAction::EvaluatePolicy => "EvaluatePolicy",
            AnalysisAction::RequestApproval => "RequestApproval",
            AnalysisAction::AwaitApproval => "AwaitApproval",
            AnalysisAction::ApprovalApproved(_) => "ApprovalApproved",
            AnalysisAction::ApprovalRejected(_) => "ApprovalRejected",
            AnalysisAction::CreateWorkflow => "CreateWorkflow",
            AnalysisAction::NoOp => "NoOp",
        }
    }
}

async fn reconcile(instance: Arc<AIAnalysis>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = instance.name_any();
    util::with_deadline("AIAnalysis", &name, reconcile_inner(instance, ctx)).await
}

async fn reconcile_inner(instance: Arc<AIAnalysis>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace: String = match instance.namespace() {
        None => {
            return Err(Error::UserInput(
                "Expected AIAnalysis resource to be namespaced.".to_owned(),
            ));
        }
        Some(namespace) => namespace,
    };
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let action = determine_action(&ctx, &instance).await?;

    if action != AnalysisAction::NoOp {
        ctx.log_action("AIAnalysis", &namespace, &name, action.to_str())
            .await;
    }

    #[cfg(feature = "metrics")]
    {
        ctx.analysis_metrics.count_reconcile(action.to_str());
        ctx.analysis_metrics
            .observe_read(action.to_str(), start.elapsed().as_secs_f64());
    }

    #[cfg(feature = "metrics")]
    let timer = match action {
        AnalysisAction::NoOp => None,
        _ => Some(ctx.analysis_metrics.start_write_timer(action.to_str())),
    };

    let result = match action {
        AnalysisAction::AddFinalizer => {
            util::add_finalizer(ctx.client.clone(), instance.as_ref()).await?;
            Action::await_change()
        }
        AnalysisAction::Cleanup => {
            actions::cleanup(&ctx, &instance).await?;
            Action::await_change()
        }
        AnalysisAction::Begin => {
            actions::begin(&ctx, &instance).await?;
            Action::await_change()
        }
        AnalysisAction::Validate => {
            actions::validate(&ctx, &instance).await?;
            Action::await_change()
        }
        AnalysisAction::PrepareContext => {
            actions::prepare_context(&ctx, &instance).await?;
            Action::await_change()
        }
        AnalysisAction::WaitRetry(remaining) => Action::requeue(remaining),
        AnalysisAction::Investigate => actions::investigate_once(&ctx, &instance).await?,
        AnalysisAction::EvaluateConfidence => {
            actions::evaluate_confidence(&ctx, &instance).await?;
            Action::await_change()
        }
        AnalysisAction::ValidateDependencies => {
            actions::validate_dependencies(&ctx, &instance).await?;
            Action::await_change()
        }
        AnalysisAction::EvaluatePolicy => {
            actions::evaluate_policy(&ctx, &instance).await?;
            Action::await_change()
        }
        AnalysisAction::RequestApproval => {
            actions::request_approval(&ctx, &instance).await?;
            Action::await_change()
        }
        AnalysisAction::AwaitApproval => Action::await_change(),
        AnalysisAction::ApprovalApproved(decided_by) => {
            actions::approval_approved(&ctx, &instance, decided_by).await?;
            Action::await_change()
        }
        AnalysisAction::ApprovalRejected(decided_by) => {
            actions::approval_rejected(&ctx, &instance, decided_by).await?;
            Action::await_change()
        }
        AnalysisAction::CreateWorkflow => {
            actions::create_workflow(&ctx, &instance).await?;
            Action::await_change()
        }
        AnalysisAction::NoOp => Action::requeue(util::PROBE_INTERVAL),
    };

    #[cfg(feature = "metrics")]
    if let Some(timer) = timer {
        timer.observe_duration();
    }

    Ok(result)
}

/// Read phase: inspects the analysis (and, while Approving, the approval
/// resource) and decides the single action the write phase performs.
async fn determine_action(
    ctx: &Context,
    instance: &AIAnalysis,
) -> Result<AnalysisAction, Error> {
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(if util::has_finalizer(instance) {
            AnalysisAction::Cleanup
        } else {
            AnalysisAction::NoOp
        });
    }

    let status = instance.status.clone().unwrap_or_default();
    if !util::has_finalizer(instance) && !status.phase.is_terminal() {
        return Ok(AnalysisAction::AddFinalizer);
    }

    Ok(match status.phase {
        AIAnalysisPhase::Pending => AnalysisAction::Begin,
        AIAnalysisPhase::Validating => AnalysisAction::Validate,
        AIAnalysisPhase::PreparingContext => AnalysisAction::PrepareContext,
        AIAnalysisPhase::Investigating => match retry_wait(&status) {
            Some(remaining) => AnalysisAction::WaitRetry(remaining),
            None => AnalysisAction::Investigate,
        },
        AIAnalysisPhase::EvaluatingConfidence => AnalysisAction::EvaluateConfidence,
        AIAnalysisPhase::ValidatingDependencies => AnalysisAction::ValidateDependencies,
        AIAnalysisPhase::Approving => determine_approval_action(ctx, instance, &status).await?,
        AIAnalysisPhase::CreatingWorkflow => AnalysisAction::CreateWorkflow,
        AIAnalysisPhase::Completed | AIAnalysisPhase::Failed => AnalysisAction::NoOp,
    })
}

fn retry_wait(status: &AIAnalysisStatus) -> Option<Duration> {
    let next = status.next_retry_time.as_ref()?;
    let until = next.0.duration_since(Timestamp::now());
    Duration::try_from(until).ok().filter(|d| !d.is_zero())
}

async fn determine_approval_action(
    ctx: &Context,
    instance: &AIAnalysis,
    status: &AIAnalysisStatus,
) -> Result<AnalysisAction, Error> {
    let Some(context) = status.approval_context.as_ref() else {
        return Ok(AnalysisAction::EvaluatePolicy);
    };
    if !context.required {
        return Ok(AnalysisAction::CreateWorkflow);
    }
    let Some(approval_ref) = status.approval_ref.as_deref() else {
        return Ok(AnalysisAction::RequestApproval);
    };
    let namespace = instance.namespace().unwrap_or_default();
    let api: Api<RemediationApproval> = Api::namespaced(ctx.client.clone(), &namespace);
    let approval = match api.get(approval_ref).await {
        Ok(approval) => approval,
        // The approval was deleted out from under us; ask again.
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            return Ok(AnalysisAction::RequestApproval);
        }
        Err(e) => return Err(Error::from(e)),
    };
    let decision = approval.status.clone().unwrap_or_default();
    Ok(match decision.decision {
        ApprovalDecision::Pending => AnalysisAction::AwaitApproval,
        ApprovalDecision::Approved => AnalysisAction::ApprovalApproved(decision.decided_by),
        ApprovalDecision::Rejected => AnalysisAction::ApprovalRejected(decision.decided_by),
    })
}

/// Actions to be taken when a reconciliation fails - for whatever reason.
fn on_error(instance: Arc<AIAnalysis>, error: &Error, ctx: Arc<Context>) -> Action {
    let category = categorize(error);
    #[cfg(feature = "metrics")]
    ctx.analysis_metrics
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
                    "Reconciliation of AIAnalysis '{}' denied: {:?}",
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
