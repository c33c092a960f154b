use clap::{Parser, Subcommand};
use kubernaut_common::args::{AuditArgs, HolmesArgs, PolicyArgs};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the controllers, the metrics server, and the clearance webhook
    Run(RunArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Namespace the controllers watch and create resources in
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Minimum time between remediations of the same target (e.g. 5m)
    #[arg(long, env = "COOLDOWN_PERIOD", default_value = "5m")]
    pub cooldown_period: String,

    /// Per-channel delivery attempt ceiling
    #[arg(long, env = "MAX_DELIVERY_ATTEMPTS", default_value_t = 5)]
    pub max_delivery_attempts: u32,

    /// Apply ±10% jitter to retry delays
    #[arg(long, env = "RETRY_JITTER", default_value_t = true)]
    pub retry_jitter: bool,

    /// Service account for execution children that do not name one
    #[arg(long, env = "DEFAULT_SERVICE_ACCOUNT", default_value = "kubernaut-executor")]
    pub default_service_account: String,

    /// Port of the authenticated block-clearance webhook
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 8089)]
    pub webhook_port: u16,

    /// Port of the Prometheus metrics endpoint; disabled when unset
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[command(flatten)]
    pub holmes: HolmesArgs,

    #[command(flatten)]
    pub policy: PolicyArgs,

    #[command(flatten)]
    pub audit: AuditArgs,
}
