//! Logging setup
//!
//! `tracing-subscriber` with an env filter. Debug builds print pretty
//! lines, release builds print JSON with the current span. Logs go to
//! stderr so command output on stdout stays machine readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for a configured level
///
/// Quiets sqlx statement logging unless the level is `trace`.
pub fn filter_directive(log_level: &str) -> String {
    let sqlx_level = if log_level == "trace" { "trace" } else { "warn" };
    format!(
        "{level},arbiter_engine={level},sqlx={sqlx}",
        level = log_level,
        sqlx = sqlx_level
    )
}

/// Install the global subscriber
///
/// Priority: `RUST_LOG` > `log_level` > "info". A second call is a no-op.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

/// Install the global subscriber at "info"
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}
