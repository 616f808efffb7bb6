//! Subscriber setup for binaries. Library code only emits `tracing` events.

use crate::error::{Error, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global stdout subscriber filtered at `level`.
///
/// `RUST_LOG` overrides `level` when set. Thread names are printed because
/// every pipeline stage runs on its own named thread.
///
/// # Errors
///
/// `Error::Logging` if a global subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_thread_names(true),
        )
        .try_init()
        .map_err(|e| Error::Logging(format!("failed to initialize logging: {e}")))?;

    tracing::debug!(level, "logging initialized");
    Ok(())
}
