//! Logging bootstrap (SPEC_FULL.md §4.0), grounded on the teacher's
//! `gateway::observability::setup_logs`: an `EnvFilter` seeded from
//! `RUST_LOG`, backing a JSON `fmt` layer.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn setup_logs() {
    let log_level =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "evalengine=debug,warn".into());

    tracing_subscriber::registry()
        .with(log_level)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_target(false),
        )
        .init();
}
