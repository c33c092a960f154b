use anyhow::{Context as _, Result};
use clap::Parser;
use kube::client::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use kubernaut_common::shutdown::shutdown_signal;
use owo_colors::OwoColorize;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod aianalysis;
mod args;
mod clients;
mod config;
mod context;
mod notification;
mod util;
mod webhook;
mod workflowexecution;

use args::{Cli, Commands, RunArgs};
use clients::{audit::AuditClient, holmes::HolmesClient, policy::PolicyClient};
use config::OperatorConfig;
use context::Context;
use util::backoff::RetryBackoff;

#[tokio::main]
async fn main() -> Result<()> {
    kubernaut_common::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let cooldown =
        parse_duration::parse(&args.cooldown_period).context("parse --cooldown-period")?;
    let holmes_budget = parse_duration::parse(&args.holmes.holmes_retry_budget)
        .context("parse --holmes-retry-budget")?;
    let config = OperatorConfig {
        namespace: args.namespace.clone(),
        cooldown,
        holmes_backoff: RetryBackoff {
            timeout: holmes_budget,
            jitter: args.retry_jitter,
            ..Default::default()
        },
        delivery_backoff: RetryBackoff {
            max_attempts: args.max_delivery_attempts,
            jitter: args.retry_jitter,
            ..Default::default()
        },
        default_service_account: args.default_service_account.clone(),
    };

    let client = Client::try_default()
        .await
        .context("create Kubernetes client")?;
    let ctx = Arc::new(Context::new(
        client.clone(),
        config,
        HolmesClient::new(
            args.holmes.holmes_endpoint.clone(),
            Duration::from_secs(args.holmes.holmes_request_timeout_seconds),
        ),
        PolicyClient::new(args.policy.policy_endpoint.clone(), args.policy.policy_bundle.clone()),
        AuditClient::new(args.audit.audit_endpoint.clone(), args.audit.cluster_name.clone()),
    ));

    #[cfg(feature = "metrics")]
    if let Some(port) = args.metrics_port {
        tokio::spawn(util::metrics::run_metrics_server(port));
    }

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_cancel.cancel();
    });

    // The clearance webhook serves on every replica; only the leader
    // runs the controllers.
    let webhook_cancel = cancel.clone();
    let webhook_ctx = ctx.clone();
    let webhook_port = args.webhook_port;
    let mut webhook_task = Box::pin(tokio::spawn(async move {
        webhook::run_server(webhook_cancel, webhook_port, webhook_ctx).await
    }));

    let lead = lead_controllers(client, ctx, cancel.clone());
    tokio::pin!(lead);
    tokio::select! {
        res = &mut lead => {
            cancel.cancel();
            webhook_task
                .await
                .context("Failed to join webhook task")?
                .context("Webhook task failed")?;
            res?;
        }
        res = &mut webhook_task => {
            cancel.cancel();
            lead.await?;
            res.context("Failed to join webhook task")?.context("Webhook task failed")?;
        }
    }
    println!("{}", "🛑 All controllers shut down gracefully.".red());
    Ok(())
}

/// Leader-election standby loop. One Lease guards all three controllers:
/// only the leader reconciles, and on leadership loss the controllers
/// are aborted and the process returns to standby.
async fn lead_controllers(
    client: Client,
    ctx: Arc<Context>,
    cancel: CancellationToken,
) -> Result<()> {
    // Namespace where we run both leader election and the controllers.
    // This lets us keep RBAC namespaced rather than cluster-scoped.
    let lease_namespace = ctx.config.namespace.clone();
    // Unique identity per replica (Downward API POD_NAME is ideal).
    // Fallback to hostname if not present.
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("kubernaut-operator-{}", uuid::Uuid::new_v4()));
    let lease_name = "kubernaut-operator-lock".to_string();
    // TTL: how long leadership is considered valid without renewal.
    // Renew should happen well before TTL expires.
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client,
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name,
            lease_ttl,
        },
    );

    kubernaut_common::signal_ready();
    println!("{}", "🌱 Standing by for leadership...".green());
    let mut controller_tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut tick = tokio::time::interval(renew_every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                for task in controller_tasks.drain(..) {
                    task.abort();
                    task.await.ok();
                }
                break Ok(());
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                // If we can't talk to the apiserver / update the Lease,
                // assume we are not safe to lead.
                eprintln!("leader election renew/acquire failed: {e}");
                if !controller_tasks.is_empty() {
                    for task in controller_tasks.drain(..) {
                        task.abort();
                    }
                    eprintln!("aborted controllers due to leader election error");
                }
                continue;
            }
        };
        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_tasks.is_empty() {
                println!("{}", "👑 Acquired leadership; starting controllers".green());
                controller_tasks = vec![
                    tokio::spawn(aianalysis::run(ctx.clone())),
                    tokio::spawn(workflowexecution::run(ctx.clone())),
                    tokio::spawn(notification::run(ctx.clone())),
                ];
            }
        } else if !controller_tasks.is_empty() {
            // We are NOT leader; ensure the controllers are stopped.
            eprintln!("lost leadership; stopping controllers");
            for task in controller_tasks.drain(..) {
                task.abort();
            }
        }
    }
}
