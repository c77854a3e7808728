// ABOUTME: Tracing subscriber setup for the coderun binary
// ABOUTME: RUST_LOG overrides the default filter; output goes to stderr so stdout stays parseable

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

pub fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { DEFAULT_FILTER };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
