//! Structured logging setup, shared by `kr-daemon` and `kr-shim`.
//!
//! A `tracing_subscriber::fmt` initialization: an `EnvFilter` seeded from
//! `RUST_LOG` (falling back to a sane per-crate default), target + thread
//! IDs on for daemon debugging. When `KR_LOG_SYSLOG` is set we drop ANSI
//! color and timestamps, since syslog (or whatever collects our stderr
//! under a service manager) adds its own.

use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber. Call once, as early as
/// possible, in every binary's `main`.
pub fn init(syslog_style: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kr=info,kr_enclave=debug"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if syslog_style {
        builder.with_ansi(false).without_time().init();
    } else {
        builder.with_thread_ids(true).init();
    }
}
