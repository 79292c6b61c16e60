//! Tracing setup for the `amem` binary and integration tests.
//!
//! Logs go to stderr. Stdout carries command output, and with `--json`
//! that output must stay parseable.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose spans are ours; everything else is held at `warn`.
const AMEM_TARGETS: &[&str] = &["amem_core", "amem_cli", "graph_state", "container_manager"];

/// Filter used when `RUST_LOG` is unset: AMEM crates at `level`, the
/// database driver and HTTP stack at `warn`.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(AMEM_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Install the global subscriber. Returns `false` when one was already set.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
    };
    installed.is_ok()
}
