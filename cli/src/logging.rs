use tracing_subscriber::EnvFilter;

/// Installs a `tracing-subscriber` formatter gated by `RUST_LOG`, defaulting
/// to `info` and writing to stderr so stdout stays clean for command output.
pub fn init_logging() {
    let default_level = "info";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
