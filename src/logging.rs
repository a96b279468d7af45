use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "kestrel_bake=info";

/// Installs the stderr subscriber used by the binaries. `RUST_LOG` overrides the default filter.
/// Calling it twice is harmless.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}
