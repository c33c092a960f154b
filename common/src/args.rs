use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct HolmesArgs {
    /// Base URL of the HolmesGPT investigation service
    #[arg(long, env = "HOLMES_ENDPOINT", default_value = "http://holmesgpt:8090")]
    pub holmes_endpoint: String,

    /// Per-request timeout for investigation calls, in seconds
    #[arg(long, env = "HOLMES_REQUEST_TIMEOUT_SECONDS", default_value_t = 30)]
    pub holmes_request_timeout_seconds: u64,

    /// Total wall-clock retry budget for one investigation (e.g. 5m)
    #[arg(long, env = "HOLMES_RETRY_BUDGET", default_value = "5m")]
    pub holmes_retry_budget: String,
}

#[derive(Parser, Debug, Clone)]
pub struct PolicyArgs {
    /// Base URL of the approval policy engine
    #[arg(long, env = "POLICY_ENDPOINT", default_value = "http://policy-engine:8181")]
    pub policy_endpoint: String,

    /// Location of the policy bundle evaluated for approval decisions
    #[arg(long, env = "POLICY_BUNDLE", default_value = "kubernaut/approval")]
    pub policy_bundle: String,
}

#[derive(Parser, Debug, Clone)]
pub struct AuditArgs {
    /// Base URL of the audit event sink
    #[arg(long, env = "AUDIT_ENDPOINT", default_value = "http://audit-sink:8070")]
    pub audit_endpoint: String,

    /// Cluster name stamped on every audit event
    #[arg(long, env = "CLUSTER_NAME", default_value = "default")]
    pub cluster_name: String,
}
