use http_body_util::Full;
use hyper::{Request, Response, body::Bytes, service::service_fn};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use lazy_static::lazy_static;
use owo_colors::OwoColorize;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec,
};

lazy_static! {
    static ref RECONCILIATIONS: IntCounterVec = register_int_counter_vec!(
        "kubernaut_reconciliations_total",
        "Reconcile invocations by kind and chosen action",
        &["kind", "action"]
    )
    .unwrap();
    static ref READ_DURATION: HistogramVec = register_histogram_vec!(
        "kubernaut_reconcile_read_duration_seconds",
        "Duration of the read phase of reconciliation",
        &["kind", "action"]
    )
    .unwrap();
    static ref WRITE_DURATION: HistogramVec = register_histogram_vec!(
        "kubernaut_reconcile_write_duration_seconds",
        "Duration of the write phase of reconciliation",
        &["kind", "action"]
    )
    .unwrap();
    static ref EXTERNAL_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "kubernaut_external_call_duration_seconds",
        "Duration of calls to external dependencies",
        &["target", "outcome"]
    )
    .unwrap();
    static ref RETRY_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "kubernaut_retry_attempts_total",
        "Retried external calls by target and error class",
        &["target", "error_type"]
    )
    .unwrap();
    static ref FAILURES: IntCounterVec = register_int_counter_vec!(
        "kubernaut_failures_total",
        "Reconcile failures by kind, category, and sub-reason",
        &["kind", "category", "sub_reason"]
    )
    .unwrap();
    static ref CIRCUIT_STATE: IntGaugeVec = register_int_gauge_vec!(
        "kubernaut_circuit_breaker_state",
        "Circuit breaker state per channel (0=closed, 1=open, 2=half-open)",
        &["channel"]
    )
    .unwrap();
}

/// Per-controller handles over the shared registry. Labels are fixed
/// cardinality: kind and action only, never per-CR names.
pub struct ControllerMetrics {
    kind: &'static str,
}

impl ControllerMetrics {
    pub fn new(kind: &'static str) -> Self {
        ControllerMetrics { kind }
    }

    pub fn count_reconcile(&self, action: &str) {
        RECONCILIATIONS.with_label_values(&[self.kind, action]).inc();
    }

    pub fn observe_read(&self, action: &str, seconds: f64) {
        READ_DURATION
            .with_label_values(&[self.kind, action])
            .observe(seconds);
    }

    pub fn start_write_timer(&self, action: &str) -> prometheus::HistogramTimer {
        WRITE_DURATION
            .with_label_values(&[self.kind, action])
            .start_timer()
    }

    pub fn count_failure(&self, category: &str, sub_reason: &str) {
        FAILURES
            .with_label_values(&[self.kind, category, sub_reason])
            .inc();
    }
}

pub fn observe_external_call(target: &str, outcome: &str, seconds: f64) {
    EXTERNAL_CALL_DURATION
        .with_label_values(&[target, outcome])
        .observe(seconds);
}

pub fn count_retry(target: &str, error_type: &str) {
    RETRY_ATTEMPTS.with_label_values(&[target, error_type]).inc();
}

pub fn set_circuit_state(channel: &str, state: i64) {
    CIRCUIT_STATE.with_label_values(&[channel]).set(state);
}

async fn serve_req(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    match req.uri().path() {
        "/metrics" => {
            let metric_families = prometheus::gather();
            let mut buf = Vec::new();
            if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buf) {
                eprintln!("{}", format!("Failed to encode metrics: {e}").red());
            }
            Ok(Response::new(Full::new(Bytes::from(buf))))
        }
        "/healthz" | "/readyz" => Ok(Response::new(Full::new(Bytes::from("ok")))),
        _ => Ok(Response::builder()
            .status(404)
            .body(Full::new(Bytes::from("not found")))
            .unwrap()),
    }
}

/// Serves the Prometheus registry over plain HTTP/1.
pub async fn run_metrics_server(port: u16) {
    let addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!(
                "{}",
                format!("🛑 Failed to bind metrics server to {addr}: {e}").red()
            );
            return;
        }
    };
    println!(
        "{}{}",
        "📈 Starting metrics server • port=".green(),
        format!("{}", port).green().dimmed(),
    );
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                eprintln!("{}", format!("metrics server accept failed: {e}").red());
                continue;
            }
        };
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection(io, service_fn(serve_req))
                .await
            {
                eprintln!("{}", format!("metrics connection error: {e}").red());
            }
        });
    }
}
