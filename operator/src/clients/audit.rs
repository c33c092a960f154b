use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;

/// Immutable audit record. The sink appends at-least-once; consumers
/// deduplicate by event identity.
#[derive(Serialize, Clone, Debug)]
pub struct AuditEvent {
    pub event_type: String,
    pub event_category: String,
    pub event_action: String,
    pub event_outcome: String,
    pub resource_kind: String,
    pub resource_name: String,
    pub resource_namespace: String,
    pub cluster: String,
    pub correlation_id: String,
    pub actor_type: String,
    pub actor_id: String,
    pub event_data: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Event written by a reconciler about one of its own resources.
    /// The cluster field is stamped by the client on emit.
    pub fn controller(
        event_type: &str,
        category: &str,
        action: &str,
        outcome: &str,
    ) -> AuditEvent {
        AuditEvent {
            event_type: event_type.to_string(),
            event_category: category.to_string(),
            event_action: action.to_string(),
            event_outcome: outcome.to_string(),
            resource_kind: String::new(),
            resource_name: String::new(),
            resource_namespace: String::new(),
            cluster: String::new(),
            correlation_id: String::new(),
            actor_type: "controller".to_string(),
            actor_id: crate::util::MANAGER_NAME.to_string(),
            event_data: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn resource(mut self, kind: &str, name: &str, namespace: &str) -> AuditEvent {
        self.resource_kind = kind.to_string();
        self.resource_name = name.to_string();
        self.resource_namespace = namespace.to_string();
        self
    }

    pub fn correlation(mut self, correlation_id: &str) -> AuditEvent {
        self.correlation_id = correlation_id.to_string();
        self
    }

    pub fn actor(mut self, actor_type: &str, actor_id: &str) -> AuditEvent {
        self.actor_type = actor_type.to_string();
        self.actor_id = actor_id.to_string();
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> AuditEvent {
        self.event_data = data;
        self
    }
}

/// Fire-and-forget audit writer. Transient sink failures are logged and
/// swallowed; a reconcile never fails because the sink is down.
#[derive(Clone)]
pub struct AuditClient {
    http: reqwest::Client,
    endpoint: String,
    cluster: String,
}

impl AuditClient {
    pub fn new(endpoint: String, cluster: String) -> AuditClient {
        AuditClient {
            http: reqwest::Client::new(),
            endpoint,
            cluster,
        }
    }

    pub fn emit(&self, mut event: AuditEvent) {
        event.cluster = self.cluster.clone();
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.post(&event).await {
                eprintln!(
                    "⚠️ {}",
                    format!(
                        "Failed to write audit event '{}' for {}/{}: {}",
                        event.event_type, event.resource_namespace, event.resource_name, e
                    )
                    .yellow()
                );
            }
        });
    }

    async fn post(&self, event: &AuditEvent) -> Result<(), reqwest::Error> {
        self.http
            .post(format!("{}/api/v1/events", self.endpoint))
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
