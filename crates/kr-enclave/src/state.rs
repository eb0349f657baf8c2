//! Shared mutable state for one [`crate::Enclave`], guarded by a single
//! coarse mutex (spec.md §5: "`pending`, `host_auth_cache`,
//! `session_id_callbacks`, `cached_me`, and `secret` are protected by a
//! single coarse mutex... no I/O is performed under the mutex").

use std::collections::HashMap;

use kr_common::model::{HostAuth, PairingSecret, Profile, RequestId, Response};
use lru::LruCache;
use tokio::sync::oneshot;

use crate::error::EnclaveError;

/// Bound on `host_auth_cache` / `session_id_callbacks` — recent KEX replies
/// observed by the shim, or signers awaiting one. Unbounded growth would let
/// a flood of shim connections exhaust memory; callers that never resolve
/// naturally age out under LRU pressure.
const CACHE_CAPACITY: usize = 256;

/// Key shared between the shim's host-key observations and the agent's
/// signature requests: base64 of the raw SSH session-id bytes. Both sides
/// derive it independently from the same handshake, so no extra rendezvous
/// step is needed (see DESIGN.md for the Open Question this resolves).
pub type SessionIdKey = String;

pub(crate) struct PendingSlot {
    pub responder: oneshot::Sender<Result<Response, EnclaveError>>,
}

pub(crate) struct SharedState {
    pub paired: bool,
    pub secret: Option<PairingSecret>,
    pub cached_me: Option<Profile>,
    pub pending: HashMap<RequestId, PendingSlot>,
    pub host_auth_cache: LruCache<SessionIdKey, HostAuth>,
    pub session_id_callbacks: LruCache<SessionIdKey, oneshot::Sender<HostAuth>>,
    /// Guards against a stale redelivered `me` response overwriting a newer
    /// cache entry (spec.md §5 ordering guarantee). Set whenever a `me`
    /// request is dispatched; only a response whose `request_id` matches is
    /// allowed to update `cached_me`.
    pub last_me_request_id: Option<RequestId>,
}

impl SharedState {
    pub fn new() -> Self {
        let cap = std::num::NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is nonzero");
        Self {
            paired: false,
            secret: None,
            cached_me: None,
            pending: HashMap::new(),
            host_auth_cache: LruCache::new(cap),
            session_id_callbacks: LruCache::new(cap),
            last_me_request_id: None,
        }
    }
}
