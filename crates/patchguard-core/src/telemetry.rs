//! Log subscriber for the `patchguard` binary.
//!
//! Filter precedence: `PATCHGUARD_LOG`, then `RUST_LOG`, then the CLI
//! verbosity applied to the PatchGuard crates only. HTTP and runtime crates
//! stay at `warn` unless a filter variable says otherwise.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "PATCHGUARD_LOG";

const CRATES: &[&str] = &["patchguard_core", "patchguard_patcher", "patchguard_cli"];

/// Default directives: `warn` globally, `level` for PatchGuard's own crates.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(CRATES.iter().map(|krate| format!("{krate}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber on stderr. Later calls are no-ops.
///
/// With `json`, each line carries the enclosing `patchguard.run` span, so
/// events from one pipeline run can be grouped by `run_id`.
pub fn init_tracing(json: bool, level: Level) {
    let filter = env_filter(level);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
