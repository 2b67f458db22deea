use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "ARTIFACT_LOG";

/// Initialize a tracing subscriber printing compact logs to stdout.
///
/// The filter comes from `ARTIFACT_LOG`, then `RUST_LOG`, then
/// `default_directive` (e.g. `"info"` or `"artifact_core=debug"`).
pub fn init(default_directive: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .compact();

    let filter_layer = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(default_directive))?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
