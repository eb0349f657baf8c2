//! The app-level error type every other `kr` crate ultimately wraps
//! (spec.md §7). Wire- and user-visible behavior differ per variant; see
//! each call site (`kr-agent`, `kr-control`) for how they're surfaced.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnclaveError {
    /// No pairing on disk or in memory. Never retried.
    #[error("not paired")]
    NotPaired,

    /// The fail timer elapsed before a response arrived. The alert timer
    /// elapsing does *not* produce this — it only triggers the alert
    /// callback and a push-wakeup; only the fail timer ends the request.
    #[error("request timed out waiting for a response")]
    Timeout,

    /// The phone explicitly declined the request. No retry.
    #[error("rejected by phone")]
    Rejected,

    /// The phone's view of the host key disagrees with the shim's.
    #[error("host key mismatch: {0}")]
    HostKeyMismatch(String),

    /// Relay-level error. `Transient` retries with backoff in the inbound
    /// loop; `Auth` resets pairing state.
    #[error("transport error: {0}")]
    Transport(#[from] kr_transport::TransportError),

    /// Malformed envelope. Dropped silently on the inbound path; bubbled up
    /// on outbound encode failures.
    #[error("codec error: {0}")]
    Codec(#[from] kr_codec::CodecError),

    /// Decryption/signature failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] kr_pairing::PairingError),

    /// Disk I/O failure while persisting pairing or profile state.
    #[error("persistence error: {0}")]
    Persistence(#[from] kr_persistence::PersistError),

    /// `unpair()` cancelled this request while it was pending.
    #[error("unpaired while request was in flight")]
    Unpaired,

    /// `stop()` cancelled this request.
    #[error("enclave stopped")]
    Stopped,
}
