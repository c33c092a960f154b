use k8s_openapi::{api::core::v1::Secret, jiff::Timestamp};
use kube::Api;
use kubernaut_types::{
    BusinessPriority, ChannelKind, DeliveryAttempt, DeliveryFailureReason, DeliveryStatus,
    NotificationChannel, NotificationType,
};
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::util::backoff::RetryBackoff;

/// Resolved transport settings for one channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub url: Option<String>,
    pub token: Option<String>,
}

/// JSON shape allowed in a channel Secret value. A plain URL string is
/// also accepted.
#[derive(Deserialize)]
struct SecretChannelConfig {
    url: String,
    token: Option<String>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub subject: String,
    /// Already sanitized; no channel ever sees the raw body.
    pub body: String,
    pub notification_type: NotificationType,
    pub priority: BusinessPriority,
    pub recipients: Vec<String>,
    pub correlation_id: String,
}

/// Looks up the channel's endpoint and credential. A missing secret
/// fails delivery on that channel only.
pub async fn resolve_channel_config(
    client: kube::Client,
    namespace: &str,
    channel: &NotificationChannel,
) -> Result<ChannelConfig, (DeliveryFailureReason, String)> {
    match channel.kind {
        ChannelKind::Console => Ok(ChannelConfig {
            kind: ChannelKind::Console,
            url: None,
            token: None,
        }),
        ChannelKind::Webhook => {
            let Some(secret_ref) = channel.secret_ref.as_ref() else {
                return Err((
                    DeliveryFailureReason::AuthFailure,
                    format!("channel '{}' has no secretRef", channel.name),
                ));
            };
            let api: Api<Secret> = Api::namespaced(client, namespace);
            let secret = api.get(&secret_ref.name).await.map_err(|e| {
                (
                    DeliveryFailureReason::AuthFailure,
                    format!("failed to read secret '{}': {e}", secret_ref.name),
                )
            })?;
            let value = secret
                .data
                .as_ref()
                .and_then(|d| d.get(&secret_ref.key))
                .ok_or_else(|| {
                    (
                        DeliveryFailureReason::AuthFailure,
                        format!(
                            "secret '{}' has no key '{}'",
                            secret_ref.name, secret_ref.key
                        ),
                    )
                })?;
            let raw = String::from_utf8(value.0.clone()).map_err(|_| {
                (
                    DeliveryFailureReason::AuthFailure,
                    format!("secret '{}' value is not UTF-8", secret_ref.name),
                )
            })?;
            let (url, token) = match serde_json::from_str::<SecretChannelConfig>(&raw) {
                Ok(cfg) => (cfg.url, cfg.token),
                Err(_) => (raw.trim().to_string(), None),
            };
            Ok(ChannelConfig {
                kind: ChannelKind::Webhook,
                url: Some(url),
                token,
            })
        }
    }
}

pub fn classify_delivery_status(status: u16) -> DeliveryFailureReason {
    match status {
        429 => DeliveryFailureReason::RateLimited,
        401 | 403 => DeliveryFailureReason::AuthFailure,
        s if (400..500).contains(&s) => DeliveryFailureReason::Malformed,
        _ => DeliveryFailureReason::ServiceUnavailable,
    }
}

pub fn classify_delivery_error(err: &reqwest::Error) -> DeliveryFailureReason {
    if let Some(status) = err.status() {
        return classify_delivery_status(status.as_u16());
    }
    if err.is_timeout() {
        return DeliveryFailureReason::NetworkTimeout;
    }
    let chain = format!("{err:?}").to_lowercase();
    if chain.contains("dns") {
        return DeliveryFailureReason::DNSFailure;
    }
    if chain.contains("certificate") || chain.contains("tls") {
        return DeliveryFailureReason::TLSValidationError;
    }
    DeliveryFailureReason::ServiceUnavailable
}

/// Failure reasons that retrying cannot fix; the channel is closed out
/// immediately instead of burning the remaining attempts.
pub fn is_permanent(reason: DeliveryFailureReason) -> bool {
    matches!(
        reason,
        DeliveryFailureReason::AuthFailure
            | DeliveryFailureReason::Malformed
            | DeliveryFailureReason::TLSValidationError
    )
}

/// One delivery attempt over the channel transport.
pub async fn deliver(
    http: &reqwest::Client,
    config: &ChannelConfig,
    payload: &NotificationPayload,
) -> Result<(), (DeliveryFailureReason, String)> {
    match config.kind {
        ChannelKind::Console => {
            println!(
                "📣 {} {}",
                format!("[{}]", payload.priority).cyan(),
                format!("{}: {}", payload.subject, payload.body).cyan().dimmed(),
            );
            Ok(())
        }
        ChannelKind::Webhook => {
            let url = config.url.as_deref().ok_or_else(|| {
                (
                    DeliveryFailureReason::AuthFailure,
                    "webhook channel has no URL".to_string(),
                )
            })?;
            let mut request = http.post(url).json(payload);
            if let Some(token) = config.token.as_deref() {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| (classify_delivery_error(&e), e.to_string()))?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err((
                    classify_delivery_status(status.as_u16()),
                    format!("webhook returned {status}"),
                ))
            }
        }
    }
}

/// Final phase from the per-channel outcome counts. Mixed results are
/// surfaced, not rounded up or down.
pub fn completion_phase(successful: u32, failed: u32) -> kubernaut_types::NotificationPhase {
    use kubernaut_types::NotificationPhase;
    if failed == 0 {
        NotificationPhase::Sent
    } else if successful == 0 {
        NotificationPhase::Failed
    } else {
        NotificationPhase::PartiallySent
    }
}

/// Applies the notification's retry-policy override on top of the
/// configured delivery schedule.
pub fn effective_backoff(
    base: &RetryBackoff,
    policy: Option<&kubernaut_types::RetryPolicy>,
) -> RetryBackoff {
    let Some(policy) = policy else {
        return base.clone();
    };
    RetryBackoff {
        initial_delay: policy
            .initial_delay_seconds
            .map(Duration::from_secs)
            .unwrap_or(base.initial_delay),
        max_delay: policy
            .max_delay_seconds
            .map(Duration::from_secs)
            .unwrap_or(base.max_delay),
        timeout: policy
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(base.timeout),
        max_attempts: policy.max_attempts.unwrap_or(base.max_attempts),
        jitter: base.jitter,
    }
}

/// Where one channel stands in its delivery schedule, derived entirely
/// from the append-only attempt log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelProgress {
    Succeeded,
    /// Failed for good: permanent error or attempts exhausted.
    Exhausted,
    /// Due for another attempt now; carries the failed-attempt count.
    Ready { attempts_so_far: u32 },
    /// Between attempts.
    Waiting { remaining: Duration },
}

pub fn channel_progress(
    attempts: &[DeliveryAttempt],
    channel: &str,
    backoff: &RetryBackoff,
    now: Timestamp,
) -> ChannelProgress {
    let entries: Vec<&DeliveryAttempt> =
        attempts.iter().filter(|a| a.channel == channel).collect();
    if entries
        .iter()
        .any(|a| a.status == DeliveryStatus::Succeeded)
    {
        return ChannelProgress::Succeeded;
    }
    let failed: Vec<&&DeliveryAttempt> = entries
        .iter()
        .filter(|a| a.status == DeliveryStatus::Failed)
        .collect();
    if failed
        .iter()
        .any(|a| a.reason.is_some_and(is_permanent))
    {
        return ChannelProgress::Exhausted;
    }
    let count = failed.len() as u32;
    if count >= backoff.max_attempts {
        return ChannelProgress::Exhausted;
    }
    if count == 0 {
        return ChannelProgress::Ready { attempts_so_far: 0 };
    }
    let last_failure = failed
        .iter()
        .filter_map(|a| a.timestamp.as_ref())
        .map(|t| t.0)
        .max();
    let Some(last) = last_failure else {
        return ChannelProgress::Ready {
            attempts_so_far: count,
        };
    };
    let due_in = backoff.next_delay(count - 1);
    let elapsed = Duration::try_from(now.duration_since(last)).unwrap_or(Duration::ZERO);
    if elapsed >= due_in {
        ChannelProgress::Ready {
            attempts_so_far: count,
        }
    } else {
        ChannelProgress::Waiting {
            remaining: due_in - elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn attempt(
        channel: &str,
        status: DeliveryStatus,
        reason: Option<DeliveryFailureReason>,
        secs_ago: i64,
        now: Timestamp,
    ) -> DeliveryAttempt {
        DeliveryAttempt {
            channel: channel.to_string(),
            status,
            reason,
            detail: None,
            duration_ms: Some(12),
            timestamp: Some(Time(
                now.checked_sub(k8s_openapi::jiff::SignedDuration::from_secs(secs_ago))
                    .unwrap(),
            )),
        }
    }

    fn backoff() -> RetryBackoff {
        RetryBackoff {
            max_attempts: 5,
            ..Default::default()
        }
    }

    #[test]
    fn untouched_channel_is_ready_immediately() {
        let now = Timestamp::now();
        assert_eq!(
            channel_progress(&[], "webhook", &backoff(), now),
            ChannelProgress::Ready { attempts_so_far: 0 }
        );
    }

    #[test]
    fn success_wins_regardless_of_earlier_failures() {
        let now = Timestamp::now();
        let attempts = vec![
            attempt(
                "webhook",
                DeliveryStatus::Failed,
                Some(DeliveryFailureReason::ServiceUnavailable),
                60,
                now,
            ),
            attempt("webhook", DeliveryStatus::Succeeded, None, 30, now),
        ];
        assert_eq!(
            channel_progress(&attempts, "webhook", &backoff(), now),
            ChannelProgress::Succeeded
        );
    }

    #[test]
    fn waits_out_the_schedule_between_failures() {
        let now = Timestamp::now();
        let attempts = vec![attempt(
            "webhook",
            DeliveryStatus::Failed,
            Some(DeliveryFailureReason::ServiceUnavailable),
            1,
            now,
        )];
        // First retry is due 5s after the failure; only 1s has passed.
        match channel_progress(&attempts, "webhook", &backoff(), now) {
            ChannelProgress::Waiting { remaining } => {
                assert!(remaining <= Duration::from_secs(4));
            }
            other => panic!("expected Waiting, got {other:?}"),
        }
    }

    #[test]
    fn becomes_ready_once_the_delay_has_passed() {
        let now = Timestamp::now();
        let attempts = vec![attempt(
            "webhook",
            DeliveryStatus::Failed,
            Some(DeliveryFailureReason::ServiceUnavailable),
            6,
            now,
        )];
        assert_eq!(
            channel_progress(&attempts, "webhook", &backoff(), now),
            ChannelProgress::Ready { attempts_so_far: 1 }
        );
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let now = Timestamp::now();
        let attempts: Vec<DeliveryAttempt> = (0..5)
            .map(|i| {
                attempt(
                    "webhook",
                    DeliveryStatus::Failed,
                    Some(DeliveryFailureReason::ServiceUnavailable),
                    300 - i * 30,
                    now,
                )
            })
            .collect();
        assert_eq!(
            channel_progress(&attempts, "webhook", &backoff(), now),
            ChannelProgress::Exhausted
        );
    }

    #[test]
    fn permanent_failure_exhausts_immediately() {
        let now = Timestamp::now();
        let attempts = vec![attempt(
            "webhook",
            DeliveryStatus::Failed,
            Some(DeliveryFailureReason::AuthFailure),
            1,
            now,
        )];
        assert_eq!(
            channel_progress(&attempts, "webhook", &backoff(), now),
            ChannelProgress::Exhausted
        );
    }

    #[test]
    fn skipped_entries_do_not_count_as_attempts() {
        let now = Timestamp::now();
        let attempts = vec![attempt(
            "webhook",
            DeliveryStatus::Skipped,
            Some(DeliveryFailureReason::CircuitOpen),
            1,
            now,
        )];
        assert_eq!(
            channel_progress(&attempts, "webhook", &backoff(), now),
            ChannelProgress::Ready { attempts_so_far: 0 }
        );
    }

    #[test]
    fn channels_are_tracked_independently() {
        let now = Timestamp::now();
        let attempts = vec![
            attempt("console", DeliveryStatus::Succeeded, None, 10, now),
            attempt(
                "webhook",
                DeliveryStatus::Failed,
                Some(DeliveryFailureReason::ServiceUnavailable),
                10,
                now,
            ),
        ];
        assert_eq!(
            channel_progress(&attempts, "console", &backoff(), now),
            ChannelProgress::Succeeded
        );
        assert_eq!(
            channel_progress(&attempts, "webhook", &backoff(), now),
            ChannelProgress::Ready { attempts_so_far: 1 }
        );
    }

    #[test]
    fn completion_phase_rollup() {
        use kubernaut_types::NotificationPhase;
        assert_eq!(completion_phase(2, 0), NotificationPhase::Sent);
        assert_eq!(completion_phase(0, 2), NotificationPhase::Failed);
        assert_eq!(completion_phase(1, 1), NotificationPhase::PartiallySent);
    }

    #[test]
    fn retry_policy_override_applies_partially() {
        use kubernaut_types::RetryPolicy;
        let base = backoff();
        let policy = RetryPolicy {
            max_attempts: Some(3),
            initial_delay_seconds: None,
            max_delay_seconds: Some(60),
            timeout_seconds: None,
        };
        let effective = effective_backoff(&base, Some(&policy));
        assert_eq!(effective.max_attempts, 3);
        assert_eq!(effective.max_delay, Duration::from_secs(60));
        assert_eq!(effective.initial_delay, base.initial_delay);
        assert_eq!(effective.timeout, base.timeout);
        assert_eq!(effective_backoff(&base, None), base);
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_delivery_status(429),
            DeliveryFailureReason::RateLimited
        );
        assert_eq!(
            classify_delivery_status(401),
            DeliveryFailureReason::AuthFailure
        );
        assert_eq!(
            classify_delivery_status(400),
            DeliveryFailureReason::Malformed
        );
        assert_eq!(
            classify_delivery_status(503),
            DeliveryFailureReason::ServiceUnavailable
        );
    }
}
