//! Timer defaults for the enclave request lifecycle (spec.md §5).
//!
//! Every waiter in `kr-enclave` races an "alert" timer against a "fail"
//! timer. Alert fires first and triggers a user-visible prompt plus a
//! push-wakeup; fail ends the request outright. Values are overridable so
//! tests can use the `SHORT` profile instead of waiting tens of seconds.

use std::time::Duration;

/// Timer budget for one request class (e.g. `sign`, `me`, `pair`).
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub me_alert: Duration,
    pub me_fail: Duration,
    pub pair_alert: Duration,
    pub pair_fail: Duration,
    pub sign_alert: Duration,
    pub sign_fail: Duration,
    /// Interval between `no_op` heartbeats that keep the relay queue alive.
    pub ack_delay: Duration,
}

impl Timeouts {
    /// Production defaults from spec.md §5.
    pub const fn defaults() -> Self {
        Self {
            me_alert: Duration::from_secs(5),
            me_fail: Duration::from_secs(20),
            pair_alert: Duration::from_secs(30),
            pair_fail: Duration::from_secs(120),
            sign_alert: Duration::from_secs(5),
            sign_fail: Duration::from_secs(20),
            ack_delay: Duration::from_secs(30),
        }
    }

    /// The `SHORT` profile spec.md §5 calls for in tests: same shape, tiny
    /// durations, so a test suite doesn't spend half a minute per scenario.
    pub const fn short() -> Self {
        Self {
            me_alert: Duration::from_millis(50),
            me_fail: Duration::from_millis(200),
            pair_alert: Duration::from_millis(50),
            pair_fail: Duration::from_millis(500),
            sign_alert: Duration::from_millis(50),
            sign_fail: Duration::from_millis(200),
            ack_delay: Duration::from_millis(500),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::defaults()
    }
}
