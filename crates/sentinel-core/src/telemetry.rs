//! Tracing setup for SentinelOps binaries.
//!
//! [`init_tracing`] installs the global subscriber: an `EnvFilter` that
//! honours `RUST_LOG`, plus plain or JSON line formatting. Later calls are
//! no-ops.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `level` is the default verbosity used when `RUST_LOG` is unset. Logs go to
/// stderr so command output on stdout stays machine-readable.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if json {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    // A subscriber already installed (tests, embedding hosts) wins.
    result.ok();
}
