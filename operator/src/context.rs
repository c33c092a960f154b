use kube::client::Client;
use owo_colors::OwoColorize;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::util::colors::{ACTION_DIM, ACTION_VALUE};

use crate::clients::{audit::AuditClient, holmes::HolmesClient, policy::PolicyClient};
use crate::config::OperatorConfig;
use crate::notification::circuit::CircuitBreaker;

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Context injected into every `reconcile` and `on_error` invocation,
/// shared by the three controllers.
pub struct Context {
    /// Kubernetes client to make Kubernetes API requests with.
    pub client: Client,
    pub config: OperatorConfig,
    pub holmes: HolmesClient,
    pub policy: PolicyClient,
    pub audit: AuditClient,
    /// Shared transport for notification channel deliveries.
    pub http: reqwest::Client,
    /// Per-channel delivery breakers. Process-local; cold state is
    /// Closed.
    pub breakers: Mutex<HashMap<String, CircuitBreaker>>,

    last_action: Mutex<HashMap<(String, String, String), (String, Instant)>>,

    #[cfg(feature = "metrics")]
    pub analysis_metrics: ControllerMetrics,
    #[cfg(feature = "metrics")]
    pub workflow_metrics: ControllerMetrics,
    #[cfg(feature = "metrics")]
    pub notification_metrics: ControllerMetrics,
}

impl Context {
    pub fn new(
        client: Client,
        config: OperatorConfig,
        holmes: HolmesClient,
        policy: PolicyClient,
        audit: AuditClient,
    ) -> Self {
        Context {
            client,
            config,
            holmes,
            policy,
            audit,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("build notification HTTP client"),
            breakers: Mutex::new(HashMap::new()),
            last_action: Mutex::new(HashMap::new()),

            #[cfg(feature = "metrics")]
            analysis_metrics: ControllerMetrics::new("AIAnalysis"),
            #[cfg(feature = "metrics")]
            workflow_metrics: ControllerMetrics::new("WorkflowExecution"),
            #[cfg(feature = "metrics")]
            notification_metrics: ControllerMetrics::new("NotificationRequest"),
        }
    }

    /// Logs the chosen action once per change (or every five minutes for
    /// a repeating action) to keep steady-state reconciles quiet.
    pub async fn log_action(&self, kind: &str, namespace: &str, name: &str, action: &str) {
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        let value = {
            let mut la = self.last_action.lock().await;
            la.insert(key, (action.to_string(), Instant::now()))
        };
        if value.is_none_or(|(last_action, last_instant)| {
            last_action != action || last_instant.elapsed() > std::time::Duration::from_secs(300)
        }) {
            println!(
                "🔧 {}{}{}{}{}{}{}",
                kind.color(ACTION_VALUE),
                " ".color(ACTION_DIM),
                namespace.color(ACTION_VALUE),
                "/".color(ACTION_DIM),
                name.color(ACTION_VALUE),
                " ACTION: ".color(ACTION_DIM),
                action.color(ACTION_VALUE),
            );
        }
    }
}
