use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `tracing-subscriber` env-filter subscriber. Safe to call more than
/// once per process (tests call it from every fixture); only the first call wins.
pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
