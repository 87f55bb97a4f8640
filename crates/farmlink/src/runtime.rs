//! Process-level plumbing shared by the binary: logging and Ctrl+C.

use tokio::sync::watch;

/// Initialize logging with env_logger.
///
/// Respects RUST_LOG environment variable. Defaults to "info" level.
/// Safe to call more than once; later calls are ignored.
pub fn setup_logging() {
    drop(
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .target(env_logger::Target::Stderr)
            .try_init(),
    );
}

/// Install a Ctrl+C handler and return a receiver that changes on the first signal.
///
/// Only one handler can be installed per process.
pub fn shutdown_signal() -> Result<watch::Receiver<()>, ctrlc::Error> {
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, shutting down gracefully...");
        shutdown_tx.send(()).ok();
    })?;
    Ok(shutdown_rx)
}
