//! # kr-transport
//!
//! Moves opaque ciphertext between a workstation and a phone through a
//! store-and-forward relay (spec.md §4.2). The relay's actual wire format
//! and push-wakeup mechanism are an explicit Open Question in spec.md §9 —
//! the source embeds a specific cloud SDK this workspace has no access to —
//! so they're abstracted behind the [`Transport`] trait. Any implementation
//! MUST preserve FIFO-per-queue and at-least-once delivery.
//!
//! Two implementations ship here, a trait with two interchangeable backends:
//! [`HttpRelayTransport`], a reference client against a generic polling/push
//! HTTP relay, and [`InMemoryTransport`], a fake used by `kr-enclave`'s
//! tests.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use kr_common::model::PairingSecret;
use thiserror::Error;

pub use http::HttpRelayTransport;
pub use memory::InMemoryTransport;

/// Errors the relay can produce. `Transient` triggers backoff-retry in the
/// inbound loop; `Auth` means the queue no longer exists and resets pairing
/// state (spec.md §4.2, §7).
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("transient relay error: {0}")]
    Transient(String),
    #[error("relay authentication/queue error: {0}")]
    Auth(String),
}

/// The relay contract C5 (`kr-enclave`) depends on. Implementations must be
/// `Send + Sync` so a single `Arc<dyn Transport>` can be shared across the
/// inbound-reader, heartbeat, and request-dispatch tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Provision the inbound/outbound queue pair for this pairing at the relay.
    async fn create_queues(&self, secret: &PairingSecret) -> Result<(), TransportError>;

    /// Tear down the queue pair. Called on unpair/re-pair.
    async fn delete_queues(&self, secret: &PairingSecret) -> Result<(), TransportError>;

    /// Push one opaque ciphertext to the phone's queue. Blocking; returns
    /// once the relay has acknowledged receipt. May trigger an out-of-band
    /// wakeup via `secret.push_endpoint` when present.
    async fn send(&self, secret: &PairingSecret, ciphertext: &[u8]) -> Result<(), TransportError>;

    /// Like `send`, but asks the relay to wake the phone with a
    /// user-visible prompt. Called at most once per request, with the exact
    /// same ciphertext already passed to `send`.
    async fn push_alert(
        &self,
        secret: &PairingSecret,
        prompt_text: &str,
        ciphertext: &[u8],
    ) -> Result<(), TransportError>;

    /// Long-poll the workstation's inbound queue. Returns a (possibly
    /// empty) batch in delivery order. The relay preserves FIFO per queue
    /// but may redeliver on retry — callers (`kr-enclave`) must be
    /// idempotent on `request_id`. Must be called by a single reader at a
    /// time; concurrent readers are forbidden by spec.md §4.2.
    async fn read(&self, secret: &PairingSecret) -> Result<Vec<Vec<u8>>, TransportError>;
}
