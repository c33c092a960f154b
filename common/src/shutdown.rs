use owo_colors::OwoColorize;

/// Resolves once the process should stop reconciling: SIGTERM from the
/// kubelet when the pod is torn down, or SIGINT when run from a
/// terminal. Callers cancel their controllers and let in-flight status
/// writes finish; progress lives in CR status, so nothing else needs
/// draining.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        let received = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "{}",
            format!("🛑 Received {received}; stopping controllers").red()
        );
    }

    #[cfg(not(unix))]
    {
        // Non-Unix hosts only see Ctrl+C.
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
        eprintln!("{}", "🛑 Received Ctrl+C; stopping controllers".red());
    }
}
