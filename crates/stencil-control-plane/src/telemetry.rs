// Tracing initialisation
//
// Console logging only. RUST_LOG (or LOG_LEVEL) selects the filter;
// the default keeps the stencil crates at info.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "stencil_control_plane=info,stencil_storage=info";

/// Resolve the log filter from RUST_LOG, then LOG_LEVEL, then the default.
pub fn log_filter() -> EnvFilter {
    std::env::var("RUST_LOG")
        .ok()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
