use anyhow::{Context as _, Result, anyhow};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use k8s_openapi::{
    api::authentication::v1::{TokenReview, TokenReviewSpec},
    apimachinery::pkg::apis::meta::v1::Time,
    jiff::Timestamp,
};
use kube::{Api, ResourceExt, api::PostParams};
use kubernaut_common::{access_log, response};
use kubernaut_types::*;
use owo_colors::OwoColorize;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::clients::audit::AuditEvent;
use crate::context::Context;
use crate::util::patch::patch_status;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ClearanceRequest {
    reason: String,
}

/// Serves the authenticated block-clearance endpoint. Clearance is a
/// status write on the preserved Failed record, never a deletion, so the
/// audit trail stays intact.
pub async fn run_server(
    cancel: CancellationToken,
    port: u16,
    ctx: Arc<Context>,
) -> Result<()> {
    let app = Router::new()
        .route(
            "/api/v1/workflowexecutions/{namespace}/{name}/clearance",
            post(clear_block),
        )
        .route("/healthz", get(|| async { "ok" }))
        .layer(middleware::from_fn(access_log::internal))
        .with_state(ctx);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind clearance webhook to {addr}"))?;
    println!(
        "{}{}",
        "🔓 Starting clearance webhook • port=".green(),
        format!("{}", port).green().dimmed(),
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("serve clearance webhook")?;
    println!("{}", "🛑 Clearance webhook stopped gracefully.".red());
    Ok(())
}

/// Resolves the caller's identity from the bearer token via TokenReview.
/// The authenticated principal is the only source for `clearedBy`;
/// nothing from the request body or annotations carries authority.
async fn authenticate(ctx: &Context, headers: &HeaderMap) -> Result<String> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| anyhow!("missing bearer token"))?
        .to_string();
    let review = TokenReview {
        metadata: Default::default(),
        spec: TokenReviewSpec {
            token: Some(token),
            ..Default::default()
        },
        status: None,
    };
    let api: Api<TokenReview> = Api::all(ctx.client.clone());
    let reviewed = api
        .create(&PostParams::default(), &review)
        .await
        .context("submit TokenReview")?;
    let status = reviewed
        .status
        .ok_or_else(|| anyhow!("TokenReview returned no status"))?;
    if status.authenticated != Some(true) {
        return Err(anyhow!(
            "token rejected: {}",
            status.error.unwrap_or_else(|| "not authenticated".to_string())
        ));
    }
    status
        .user
        .and_then(|u| u.username)
        .ok_or_else(|| anyhow!("authenticated token carries no username"))
}

async fn clear_block(
    State(ctx): State<Arc<Context>>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<ClearanceRequest>,
) -> Response {
    let principal = match authenticate(&ctx, &headers).await {
        Ok(principal) => principal,
        Err(e) => return response::unauthorized(e),
    };
    if request.reason.trim().is_empty() {
        return response::bad_request(anyhow!("clearReason must not be empty"));
    }

    let api: Api<WorkflowExecution> = Api::namespaced(ctx.client.clone(), &namespace);
    let instance = match api.get(&name).await {
        Ok(instance) => instance,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            return response::not_found(anyhow!("WorkflowExecution '{namespace}/{name}' not found"));
        }
        Err(e) => return response::internal_server_error(anyhow!(e)),
    };

    let status = instance.status.clone().unwrap_or_default();
    if status.phase != WorkflowExecutionPhase::Failed {
        return response::conflict(anyhow!(
            "only Failed executions can be cleared (phase is {})",
            status.phase
        ));
    }
    if !status
        .failure_details
        .as_ref()
        .is_some_and(|d| d.was_execution_failure)
    {
        return response::conflict(anyhow!(
            "'{namespace}/{name}' did not fail during execution; nothing blocks routing"
        ));
    }
    if status.block_clearance.is_some() {
        return response::conflict(anyhow!("'{namespace}/{name}' is already cleared"));
    }

    let clearance = BlockClearance {
        cleared_at: Some(Time(Timestamp::now())),
        cleared_by: principal.clone(),
        clear_reason: request.reason.trim().to_string(),
        clear_method: "WebhookValidated".to_string(),
    };
    let clearance_for_status = clearance.clone();
    if let Err(e) = patch_status(
        ctx.client.clone(),
        &instance,
        move |status: &mut WorkflowExecutionStatus| {
            status.block_clearance = Some(clearance_for_status);
        },
    )
    .await
    {
        return response::internal_server_error(anyhow!(e));
    }

    println!(
        "🔓 {}",
        format!(
            "Cleared execution-failure block on '{}/{}' (by {}, reason: {})",
            namespace, name, principal, clearance.clear_reason
        )
        .green()
    );
    ctx.audit.emit(
        AuditEvent::controller("workflowexecution.block.cleared", "execution", "clear_block", "Cleared")
            .resource("WorkflowExecution", &instance.name_any(), &namespace)
            .correlation(&instance.spec.correlation_id)
            .actor("user", &principal)
            .data(serde_json::json!({
                "clearReason": clearance.clear_reason,
                "clearMethod": clearance.clear_method,
                "target": instance.spec.target.identity(),
            })),
    );
    Json(serde_json::json!({
        "cleared": true,
        "clearedBy": principal,
        "clearMethod": "WebhookValidated",
    }))
    .into_response()
}
