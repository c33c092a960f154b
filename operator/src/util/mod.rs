use owo_colors::OwoColorize;
use std::{future::Future, time::Duration};

pub mod backoff;
pub mod events;
pub mod patch;

#[cfg(feature = "metrics")]
pub mod metrics;

pub(crate) mod colors;

mod error;
mod finalizer;

pub use error::*;
pub use finalizer::*;

/// The default interval for requeuing a managed resource.
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on one reconcile invocation. Exceeding it requeues the
/// resource instead of tying up a worker.
pub(crate) const RECONCILE_DEADLINE: Duration = Duration::from_secs(30);

/// Runs one reconcile body under [`RECONCILE_DEADLINE`]. Progress is
/// stored in status after every action, so cutting a slow reconcile off
/// loses nothing.
pub(crate) async fn with_deadline<F>(
    kind: &str,
    name: &str,
    fut: F,
) -> Result<kube::runtime::controller::Action, Error>
where
    F: Future<Output = Result<kube::runtime::controller::Action, Error>>,
{
    match tokio::time::timeout(RECONCILE_DEADLINE, fut).await {
        Ok(result) => result,
        Err(_) => {
            eprintln!(
                "{}",
                format!(
                    "{kind} '{name}' reconcile exceeded {}s; requeueing",
                    RECONCILE_DEADLINE.as_secs()
                )
                .red()
            );
            Ok(kube::runtime::controller::Action::requeue(Duration::from_secs(5)))
        }
    }
}

/// Name of the kubernetes resource manager.
pub(crate) const MANAGER_NAME: &str = "kubernaut-operator";

/// Finalizer gating deletion until cleanup has run.
pub(crate) const FINALIZER: &str =
    const_format::concatcp!(kubernaut_types::API_GROUP, "/cleanup");

pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    use sha2::{Digest, Sha256};
    let spec_bytes = serde_json::to_vec(spec).unwrap();
    let mut hasher = Sha256::new();
    hasher.update(&spec_bytes);
    let result = hasher.finalize();
    hex::encode(result)
}
