use std::time::Duration;

use crate::util::backoff::RetryBackoff;

/// Immutable runtime configuration shared by every controller, resolved
/// once from flags/environment at startup.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace the controllers watch and create resources in.
    pub namespace: String,
    /// Minimum time between remediations of the same target.
    pub cooldown: Duration,
    /// Schedule for investigation-service retries.
    pub holmes_backoff: RetryBackoff,
    /// Schedule for notification channel deliveries.
    pub delivery_backoff: RetryBackoff,
    /// Service account the execution child runs as when the spec does
    /// not name one.
    pub default_service_account: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        OperatorConfig {
            namespace: "default".to_string(),
            cooldown: Duration::from_secs(300),
            holmes_backoff: RetryBackoff::default(),
            delivery_backoff: RetryBackoff {
                max_attempts: 5,
                ..Default::default()
            },
            default_service_account: "kubernaut-executor".to_string(),
        }
    }
}
