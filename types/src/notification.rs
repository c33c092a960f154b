use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::shared::{BusinessPriority, SecretKeyRef};

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationType {
    Escalation,
    #[default]
    Simple,
    StatusUpdate,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Console,
    Webhook,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Console => write!(f, "console"),
            ChannelKind::Webhook => write!(f, "webhook"),
        }
    }
}

/// A delivery destination. Webhook channels resolve their endpoint and
/// optional bearer token from the referenced Secret; console channels need
/// no configuration.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationChannel {
    pub name: String,
    #[serde(default)]
    pub kind: ChannelKind,
    pub secret_ref: Option<SecretKeyRef>,
}

/// Per-notification override of the delivery retry schedule.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub initial_delay_seconds: Option<u64>,
    pub max_delay_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "kubernaut.io",
    version = "v1",
    kind = "NotificationRequest",
    plural = "notificationrequests",
    derive = "PartialEq",
    status = "NotificationRequestStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.successfulDeliveries\", \"name\": \"SENT\", \"type\": \"integer\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequestSpec {
    #[serde(default)]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub priority: BusinessPriority,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub channels: Vec<NotificationChannel>,
    pub retry_policy: Option<RetryPolicy>,
    pub correlation_id: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum DeliveryStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Delivery failure taxonomy recorded in attempt entries.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum DeliveryFailureReason {
    NetworkTimeout,
    DNSFailure,
    TLSValidationError,
    RateLimited,
    ServiceUnavailable,
    AuthFailure,
    Malformed,
    CircuitOpen,
}

impl fmt::Display for DeliveryFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailureReason::NetworkTimeout => write!(f, "NetworkTimeout"),
            DeliveryFailureReason::DNSFailure => write!(f, "DNSFailure"),
            DeliveryFailureReason::TLSValidationError => write!(f, "TLSValidationError"),
            DeliveryFailureReason::RateLimited => write!(f, "RateLimited"),
            DeliveryFailureReason::ServiceUnavailable => write!(f, "ServiceUnavailable"),
            DeliveryFailureReason::AuthFailure => write!(f, "AuthFailure"),
            DeliveryFailureReason::Malformed => write!(f, "Malformed"),
            DeliveryFailureReason::CircuitOpen => write!(f, "CircuitOpen"),
        }
    }
}

/// Append-only record of one delivery attempt (or circuit-breaker skip).
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub channel: String,
    pub status: DeliveryStatus,
    pub reason: Option<DeliveryFailureReason>,
    pub detail: Option<String>,
    pub duration_ms: Option<u64>,
    pub timestamp: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequestStatus {
    pub phase: NotificationPhase,
    pub message: Option<String>,
    #[serde(default)]
    pub delivery_attempts: Vec<DeliveryAttempt>,
    #[serde(default)]
    pub successful_deliveries: u32,
    #[serde(default)]
    pub failed_deliveries: u32,
    pub observed_generation: Option<i64>,
    pub completion_time: Option<Time>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum NotificationPhase {
    #[default]
    Pending,
    Sending,
    Sent,
    Failed,
    PartiallySent,
}

impl NotificationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationPhase::Sent | NotificationPhase::Failed | NotificationPhase::PartiallySent
        )
    }
}

impl FromStr for NotificationPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(NotificationPhase::Pending),
            "Sending" => Ok(NotificationPhase::Sending),
            "Sent" => Ok(NotificationPhase::Sent),
            "Failed" => Ok(NotificationPhase::Failed),
            "PartiallySent" => Ok(NotificationPhase::PartiallySent),
            _ => Err(()),
        }
    }
}

impl fmt::Display for NotificationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationPhase::Pending => write!(f, "Pending"),
            NotificationPhase::Sending => write!(f, "Sending"),
            NotificationPhase::Sent => write!(f, "Sent"),
            NotificationPhase::Failed => write!(f, "Failed"),
            NotificationPhase::PartiallySent => write!(f, "PartiallySent"),
        }
    }
}
