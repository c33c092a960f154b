use futures::stream::StreamExt;
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

/// Runs the NotificationRequest controller until the surrounding task is
/// aborted.
pub async fn run(ctx: Arc<Context>) {
    let namespace = ctx.config.namespace.clone();
    let notifications: Api<NotificationRequest> =
        Api::namespaced(ctx.client.clone(), &namespace);
    println!("{}", "🚀 NotificationRequest controller started.".green());
    Controller::new(notifications, Default::default())
        .run(reconcile, on_error, ctx)
        .for_each(|_res| async move {})
        .await;
}

/// Action to be taken upon a `NotificationRequest` resource during
/// reconciliation.
#[derive(Debug, PartialEq, Clone)]
enum NotificationAction {
    AddFinalizer,
    Cleanup,
    Begin,
    ProcessChannels,
    NoOp,
}

impl NotificationAction {
    fn to_str(&self) -> &str {
        match self {
            NotificationAction::AddFinalizer => "AddFinalizer",
            NotificationAction::Cleanup => "Cleanup",
            NotificationAction::Begin => "Begin",
            NotificationAction::ProcessChannels => "ProcessChannels",
            NotificationAction::NoOp => "NoOp",
        }
    }
}

async fn reconcile(
    instance: Arc<NotificationRequest>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let name = instance.name_any();
    util::with_deadline("NotificationRequest", &name, reconcile_inner(instance, ctx)).await
}

async fn reconcile_inner(
    instance: Arc<NotificationRequest>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let namespace: String = match instance.namespace() {
        None => {
            return Err(Error::UserInput(
                "Expected NotificationRequest resource to be namespaced.".to_owned(),
            ));
        }
        Some(namespace) => namespace,
    };
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let action = determine_action(&instance);

    if action != NotificationAction::NoOp {
        ctx.log_action("NotificationRequest", &namespace, &name, action.to_str())
            .await;
    }

    #[cfg(feature = "metrics")]
    {
        ctx.notification_metrics.count_reconcile(action.to_str());
        ctx.notification_metrics
            .observe_read(action.to_str(), start.elapsed().as_secs_f64());
    }

    #[cfg(feature = "metrics")]
    let timer = match action {
        NotificationAction::NoOp => None,
        _ => Some(ctx.notification_metrics.start_write_timer(action.to_str())),
    };

    let result = match action {
        NotificationAction::AddFinalizer => {
            util::add_finalizer(ctx.client.clone(), instance.as_ref()).await?;
            Action::await_change()
        }
        NotificationAction::Cleanup => {
            actions::cleanup(&ctx, &instance).await?;
            Action::await_change()
        }
        NotificationAction::Begin => {
            actions::begin(&ctx, &instance).await?;
            Action::await_change()
        }
        NotificationAction::ProcessChannels => actions::process_channels(&ctx, &instance).await?,
        NotificationAction::NoOp => Action::requeue(util::PROBE_INTERVAL),
    };

    #[cfg(feature = "metrics")]
    if let Some(timer) = timer {
        timer.observe_duration();
    }

    Ok(result)
}

/// Read phase. The spec is immutable, so the phase alone decides.
fn determine_action(instance: &NotificationRequest) -> NotificationAction {
    if instance.metadata.deletion_timestamp.is_some() {
        return if util::has_finalizer(instance) {
            NotificationAction::Cleanup
        } else {
            NotificationAction::NoOp
        };
    }

    let phase = instance
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or_default();
    if !util::has_finalizer(instance) && !phase.is_terminal() {
        return NotificationAction::AddFinalizer;
    }

    match phase {
        NotificationPhase::Pending => NotificationAction::Begin,
        NotificationPhase::Sending => NotificationAction::ProcessChannels,
        NotificationPhase::Sent | NotificationPhase::Failed | NotificationPhase::PartiallySent => {
            NotificationAction::NoOp
        }
    }
}

/// Actions to be taken when a reconciliation fails - for whatever reason.
fn on_error(instance: Arc<NotificationRequest>, error: &Error, ctx: Arc<Context>) -> Action {
    let category = categorize(error);
    #[cfg(feature = "metrics")]
    ctx.notification_metrics
        .count_failure(category.as_str(), "ReconcileError");
    #[cfg(not(feature = "metrics"))]
    let _ = &ctx;
    match category {
        util::FailureCategory::NotFound => Action::await_change(),
        util::FailureCategory::Conflict => Action::requeue(Duration::from_secs(1)),
        _ => {
            eprintln!(
                "{}",
                format!("Reconciliation error: {:?} {:?}", error, instance.name_any()).red()
            );
            Action::requeue(Duration::from_secs(5))
        }
    }
}
