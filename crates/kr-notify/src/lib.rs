//! # kr-notify
//!
//! Named-fifo publish/subscribe notifier (spec.md §4.9), the out-of-band
//! channel the daemon uses to tell the SSH transport shim (`kr-shim`, a
//! separate process) to tear down a proxied connection.

mod error;
mod line;
mod listener;
mod notifier;

pub use error::NotifyError;
pub use line::{HOST_KEY_MISMATCH, REJECTED, STOP};
pub use listener::{Listener, Subscription};
pub use notifier::Notifier;
