use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::Time,
    jiff::Timestamp,
};
use kube::{ResourceExt, runtime::controller::Action};
use kubernaut_types::*;
use owo_colors::OwoColorize;
use std::time::{Duration, Instant};

use super::circuit::CircuitBreaker;
use super::delivery::{
    self, ChannelProgress, NotificationPayload, channel_progress, completion_phase,
    effective_backoff,
};
use super::sanitize;
use crate::clients::audit::AuditEvent;
use crate::context::Context;
use crate::util::{self, Error, patch::patch_status};

fn terminal_audit(instance: &NotificationRequest, outcome: &str) -> AuditEvent {
    let event_type = format!(
        "notificationrequest.notification.{}",
        outcome.to_lowercase()
    );
    AuditEvent::controller(&event_type, "notification", "complete", outcome)
        .resource(
            "NotificationRequest",
            &instance.name_any(),
            instance.namespace().as_deref().unwrap_or_default(),
        )
        .correlation(&instance.spec.correlation_id)
}

/// Pending → Sending. A notification without channels has nowhere to
/// go and fails immediately.
pub async fn begin(ctx: &Context, instance: &NotificationRequest) -> Result<(), Error> {
    if instance.spec.channels.is_empty() {
        return fail(ctx, instance, "NoChannels", "spec.channels is empty").await;
    }
    let generation = instance.metadata.generation;
    patch_status(ctx.client.clone(), instance, move |status: &mut NotificationRequestStatus| {
        status.phase = NotificationPhase::Sending;
        status.observed_generation = generation;
        status.message = Some("Delivering notifications".to_string());
    })
    .await?;
    Ok(())
}

/// One delivery pass: every channel that is due gets exactly one attempt,
/// appended to the log. The log is the single source of truth, so the
/// whole pass is safe to repeat after a crash (at-least-once).
pub async fn process_channels(
    ctx: &Context,
    instance: &NotificationRequest,
) -> Result<Action, Error> {
    let namespace = instance.namespace().ok_or_else(|| {
        Error::UserInput("NotificationRequest is missing metadata.namespace".to_string())
    })?;
    let status = instance.status.clone().unwrap_or_default();
    let backoff = effective_backoff(
        &ctx.config.delivery_backoff,
        instance.spec.retry_policy.as_ref(),
    );
    let now_ts = Timestamp::now();
    let now = Instant::now();

    let payload = NotificationPayload {
        subject: instance.spec.subject.clone(),
        body: sanitize::sanitize(&instance.spec.body),
        notification_type: instance.spec.notification_type,
        priority: instance.spec.priority,
        recipients: instance.spec.recipients.clone(),
        correlation_id: instance.spec.correlation_id.clone(),
    };

    let mut new_entries: Vec<DeliveryAttempt> = Vec::new();
    let mut requeue: Option<Duration> = None;
    let mut shorten = |d: Duration| {
        requeue = Some(requeue.map_or(d, |r| r.min(d)));
    };

    for channel in &instance.spec.channels {
        match channel_progress(&status.delivery_attempts, &channel.name, &backoff, now_ts) {
            ChannelProgress::Succeeded | ChannelProgress::Exhausted => continue,
            ChannelProgress::Waiting { remaining } => shorten(remaining),
            ChannelProgress::Ready { attempts_so_far } => {
                let config = match delivery::resolve_channel_config(
                    ctx.client.clone(),
                    &namespace,
                    channel,
                )
                .await
                {
                    Ok(config) => config,
                    Err((reason, detail)) => {
                        eprintln!(
                            "⚠️ {}",
                            format!(
                                "Channel '{}' configuration error: {detail}",
                                channel.name
                            )
                            .yellow()
                        );
                        new_entries.push(DeliveryAttempt {
                            channel: channel.name.clone(),
                            status: DeliveryStatus::Failed,
                            reason: Some(reason),
                            detail: Some(detail),
                            duration_ms: None,
                            timestamp: Some(Time(now_ts)),
                        });
                        continue;
                    }
                };

                // An admitted request is always followed by an
                // on_success/on_failure report below; the breaker never
                // has a trial left dangling.
                let mut breakers = ctx.breakers.lock().await;
                let breaker = breakers
                    .entry(channel.name.clone())
                    .or_insert_with(CircuitBreaker::default);
                if !breaker.allow_request(now) {
                    #[cfg(feature = "metrics")]
                    util::metrics::set_circuit_state(
                        &channel.name,
                        breaker.state(now).as_gauge(),
                    );
                    if let Some(after) = breaker.retry_after(now) {
                        shorten(after.max(Duration::from_secs(1)));
                    }
                    drop(breakers);
                    // A skip is recorded once per outage, not once per
                    // reconcile, to keep the append-only log bounded.
                    let last_for_channel = status
                        .delivery_attempts
                        .iter()
                        .chain(new_entries.iter())
                        .filter(|a| a.channel == channel.name)
                        .next_back();
                    if last_for_channel.is_none_or(|a| a.status != DeliveryStatus::Skipped) {
                        new_entries.push(DeliveryAttempt {
                            channel: channel.name.clone(),
                            status: DeliveryStatus::Skipped,
                            reason: Some(DeliveryFailureReason::CircuitOpen),
                            detail: Some("circuit breaker open".to_string()),
                            duration_ms: None,
                            timestamp: Some(Time(now_ts)),
                        });
                    }
                    continue;
                }
                drop(breakers);

                let started = Instant::now();
                let outcome = delivery::deliver(&ctx.http, &config, &payload).await;
                let duration_ms = started.elapsed().as_millis() as u64;
                #[cfg(feature = "metrics")]
                util::metrics::observe_external_call(
                    "notification-channel",
                    if outcome.is_ok() { "success" } else { "failure" },
                    started.elapsed().as_secs_f64(),
                );

                let mut breakers = ctx.breakers.lock().await;
                let breaker = breakers
                    .entry(channel.name.clone())
                    .or_insert_with(CircuitBreaker::default);
                match outcome {
                    Ok(()) => {
                        breaker.on_success();
                        #[cfg(feature = "metrics")]
                        util::metrics::set_circuit_state(
                            &channel.name,
                            breaker.state(now).as_gauge(),
                        );
                        new_entries.push(DeliveryAttempt {
                            channel: channel.name.clone(),
                            status: DeliveryStatus::Succeeded,
                            reason: None,
                            detail: None,
                            duration_ms: Some(duration_ms),
                            timestamp: Some(Time(now_ts)),
                        });
                    }
                    Err((reason, detail)) => {
                        breaker.on_failure(now);
                        #[cfg(feature = "metrics")]
                        {
                            util::metrics::set_circuit_state(
                                &channel.name,
                                breaker.state(now).as_gauge(),
                            );
                            util::metrics::count_retry(
                                "notification-channel",
                                &reason.to_string(),
                            );
                        }
                        drop(breakers);
                        eprintln!(
                            "⚠️ {}",
                            format!(
                                "Delivery to '{}' failed (attempt {}): {detail}",
                                channel.name,
                                attempts_so_far + 1
                            )
                            .yellow()
                        );
                        if reason == DeliveryFailureReason::AuthFailure
                            && let Err(e) = util::events::publish_warning(
                                ctx.client.clone(),
                                instance,
                                "ChannelAuthFailure",
                                &format!("channel '{}': {detail}", channel.name),
                            )
                            .await
                        {
                            eprintln!(
                                "{}",
                                format!("Failed to publish warning event: {e}").red()
                            );
                        }
                        if !delivery::is_permanent(reason) {
                            shorten(backoff.jittered(backoff.next_delay(attempts_so_far)));
                        }
                        new_entries.push(DeliveryAttempt {
                            channel: channel.name.clone(),
                            status: DeliveryStatus::Failed,
                            reason: Some(reason),
                            detail: Some(detail),
                            duration_ms: Some(duration_ms),
                            timestamp: Some(Time(now_ts)),
                        });
                    }
                }
            }
        }
    }

    // Roll the log forward and decide whether every channel is settled.
    let mut combined = status.delivery_attempts.clone();
    combined.extend(new_entries.iter().cloned());
    let mut successful = 0u32;
    let mut failed = 0u32;
    let mut unsettled = false;
    for channel in &instance.spec.channels {
        match channel_progress(&combined, &channel.name, &backoff, now_ts) {
            ChannelProgress::Succeeded => successful += 1,
            ChannelProgress::Exhausted => failed += 1,
            _ => unsettled = true,
        }
    }

    if unsettled {
        patch_status(ctx.client.clone(), instance, move |status: &mut NotificationRequestStatus| {
            status.delivery_attempts.extend(new_entries);
            status.successful_deliveries = successful;
            status.failed_deliveries = failed;
        })
        .await?;
        return Ok(Action::requeue(requeue.unwrap_or(util::PROBE_INTERVAL)));
    }

    let phase = completion_phase(successful, failed);
    let message = format!(
        "{} of {} channels delivered",
        successful,
        instance.spec.channels.len()
    );
    let failed_total = combined
        .iter()
        .filter(|a| a.status == DeliveryStatus::Failed)
        .count();
    let message_for_status = message.clone();
    patch_status(ctx.client.clone(), instance, move |status: &mut NotificationRequestStatus| {
        status.delivery_attempts.extend(new_entries);
        status.successful_deliveries = successful;
        status.failed_deliveries = failed;
        status.phase = phase;
        status.completion_time = Some(Time(Timestamp::now()));
        status.message = Some(message_for_status);
    })
    .await?;
    println!(
        "📨 {}",
        format!(
            "NotificationRequest '{}' finished: {phase} ({message})",
            instance.name_any()
        )
        .green()
    );
    ctx.audit.emit(
        terminal_audit(instance, &phase.to_string()).data(serde_json::json!({
            "successfulDeliveries": successful,
            "failedDeliveries": failed,
            "totalAttempts": failed_total,
            "channels": instance.spec.channels.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
        })),
    );
    Ok(Action::await_change())
}

/// Any pre-terminal phase → Failed.
pub async fn fail(
    ctx: &Context,
    instance: &NotificationRequest,
    reason: &str,
    message: &str,
) -> Result<(), Error> {
    eprintln!(
        "❌ {}",
        format!(
            "NotificationRequest '{}' failed ({reason}): {message}",
            instance.name_any()
        )
        .red()
    );
    let message_owned = message.to_string();
    patch_status(ctx.client.clone(), instance, move |status: &mut NotificationRequestStatus| {
        status.phase = NotificationPhase::Failed;
        status.completion_time = Some(Time(Timestamp::now()));
        status.message = Some(message_owned);
    })
    .await?;
    #[cfg(feature = "metrics")]
    ctx.notification_metrics.count_failure("User", reason);
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

/// Deletion cleanup behind the finalizer. Deleting an in-flight
/// notification is the supported cancellation path, so it is recorded.
pub async fn cleanup(ctx: &Context, instance: &NotificationRequest) -> Result<(), Error> {
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
