//! Telemetry helpers for structured logging.

/// Install a default env-filtered `fmt` subscriber if none is set yet.
///
/// Embedding applications usually install their own subscriber; tests and
/// standalone tools call this once at startup. Safe to call repeatedly.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
