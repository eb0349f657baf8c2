//! The enclave client (spec.md §4.5) — the hardest piece. Orchestrates
//! request dispatch, alert/fail timers, the inbound reader loop, the no-op
//! heartbeat, host-key-binding for signature requests, and profile caching.
//!
//! One struct owning an `Arc`'d transport plus a handful of focused async
//! methods, one per outbound operation. The timer race in
//! [`Enclave::dispatch`] is this crate's one genuinely novel piece: a
//! one-shot completion channel raced against two `tokio::time::sleep`
//! futures (spec.md §9).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kr_common::model::{
    HostAuth, MeRequest, NoOp, PairingSecret, Profile, Request, RequestId, Response, SignRequest,
};
use kr_common::timeouts::Timeouts;
use kr_persistence::PairingStore;
use kr_transport::{Transport, TransportError};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::EnclaveError;
use crate::state::{PendingSlot, SessionIdKey, SharedState};

/// Bounded wait for a `HostAuth` to arrive from the shim when a sign request
/// names a session the enclave hasn't observed yet (spec.md §4.5: "a short
/// bounded wait (≈1 s)").
const HOST_AUTH_WAIT: Duration = Duration::from_millis(1000);

/// Relay backoff after a transient read error, before the inbound loop
/// retries (spec.md §4.2, §7: "transient triggers backoff-retry").
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(500);

pub struct Enclave {
    state: AsyncMutex<SharedState>,
    /// Serializes persistence writes separately from `state`, so concurrent
    /// `me`/`pair` updates don't interleave their disk writes (spec.md §5).
    persist_lock: AsyncMutex<()>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn PairingStore>,
    timeouts: Timeouts,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Enclave {
    /// Construct a fresh enclave client, restoring any pairing persisted
    /// from a previous run. Does not start background tasks — call
    /// [`Enclave::start`] once the caller is ready.
    pub async fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn PairingStore>,
        timeouts: Timeouts,
    ) -> Arc<Self> {
        let mut state = SharedState::new();
        match store.load_pairing().await {
            Ok(secret) => {
                state.secret = Some(secret);
                state.paired = true;
            }
            Err(kr_persistence::PersistError::NotPresent) => {}
            Err(e) => warn!(error = %e, "failed to load persisted pairing, starting unpaired"),
        }
        if state.paired {
            state.cached_me = store.load_me().await.ok();
        }

        Arc::new(Self {
            state: AsyncMutex::new(state),
            persist_lock: AsyncMutex::new(()),
            transport,
            store,
            timeouts,
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub async fn is_paired(&self) -> bool {
        self.state.lock().await.paired
    }

    /// Start the inbound reader and heartbeat loops if a pairing is loaded.
    /// A no-op if called while unpaired; call again after [`Enclave::pair`].
    pub fn start(self: &Arc<Self>) {
        let handles = {
            let this = Arc::clone(self);
            let inbound = tokio::spawn(async move { this.inbound_loop().await });
            let this = Arc::clone(self);
            let heartbeat = tokio::spawn(async move { this.heartbeat_loop().await });
            vec![inbound, heartbeat]
        };
        self.tasks.lock().unwrap().extend(handles);
    }

    /// Cancel every outstanding request with `Stopped` and tear down
    /// background tasks. Idempotent.
    pub async fn stop(&self) {
        self.fail_all_pending(|| EnclaveError::Stopped).await;
        self.abort_tasks();
    }

    fn abort_tasks(&self) {
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    async fn fail_all_pending(&self, make_err: impl Fn() -> EnclaveError) {
        let mut state = self.state.lock().await;
        for (_, slot) in state.pending.drain() {
            let _ = slot.responder.send(Err(make_err()));
        }
    }

    // ─── Pairing lifecycle ────────────────────────────────────────────────

    /// Replace any existing pairing: generate fresh material, provision new
    /// relay queues, persist, and restart background tasks. Any requests
    /// still pending against the old pairing are cancelled with `Unpaired`.
    pub async fn pair(self: &Arc<Self>, workstation_name: impl Into<String>) -> Result<PairingSecret, EnclaveError> {
        self.fail_all_pending(|| EnclaveError::Unpaired).await;
        self.abort_tasks();

        if let Some(old_secret) = self.state.lock().await.secret.clone() {
            if let Err(e) = self.transport.delete_queues(&old_secret).await {
                warn!(error = %e, "failed to delete old relay queues during re-pair");
            }
        }

        let secret = kr_pairing::generate(workstation_name);
        self.transport.create_queues(&secret).await?;

        {
            let _guard = self.persist_lock.lock().await;
            self.store.save_pairing(&secret).await?;
            let _ = self.store.clear_me().await;
        }

        {
            let mut state = self.state.lock().await;
            state.secret = Some(secret.clone());
            state.paired = true;
            state.cached_me = None;
            state.last_me_request_id = None;
        }

        self.start();
        Ok(secret)
    }

    /// Tear down the current pairing: cancel pending requests, delete relay
    /// queues, and erase persisted state. Persists nothing afterward.
    pub async fn unpair(&self) -> Result<(), EnclaveError> {
        self.fail_all_pending(|| EnclaveError::Unpaired).await;
        self.abort_tasks();

        let secret = self.state.lock().await.secret.clone();
        if let Some(secret) = secret {
            if let Err(e) = self.transport.delete_queues(&secret).await {
                warn!(error = %e, "failed to delete relay queues during unpair");
            }
        }

        {
            let _guard = self.persist_lock.lock().await;
            let _ = self.store.clear_pairing().await;
            let _ = self.store.clear_me().await;
        }

        let mut state = self.state.lock().await;
        state.secret = None;
        state.paired = false;
        state.cached_me = None;
        state.last_me_request_id = None;
        Ok(())
    }

    // ─── Generic dispatch ─────────────────────────────────────────────────

    /// Dispatch `req` (which must already carry its final `request_id`) and
    /// wait for a matching response, an alert timeout (prompts once, via
    /// `on_alert`, then continues waiting), or a fail timeout (spec.md
    /// §4.5 steps 1-6).
    async fn dispatch(
        &self,
        req: Request,
        alert_timeout: Duration,
        fail_timeout: Duration,
        on_alert: impl FnOnce() -> String + Send,
    ) -> Result<Response, EnclaveError> {
        let secret = self.state.lock().await.secret.clone().ok_or(EnclaveError::NotPaired)?;
        let request_id = req.request_id;

        let bytes = kr_codec::encode_request(&req)?;
        let ciphertext = kr_pairing::encrypt(&secret, &bytes);

        let (tx, mut rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.pending.insert(request_id, PendingSlot { responder: tx });
        }

        if let Err(e) = self.transport.send(&secret, &ciphertext).await {
            self.state.lock().await.pending.remove(&request_id);
            return Err(e.into());
        }

        let alert_sleep = tokio::time::sleep(alert_timeout);
        tokio::pin!(alert_sleep);
        let fail_sleep = tokio::time::sleep(fail_timeout);
        tokio::pin!(fail_sleep);
        let mut on_alert = Some(on_alert);

        loop {
            tokio::select! {
                result = &mut rx => {
                    self.state.lock().await.pending.remove(&request_id);
                    return result.unwrap_or(Err(EnclaveError::Stopped));
                }
                _ = &mut alert_sleep, if on_alert.is_some() => {
                    let callback = on_alert.take().expect("guarded by on_alert.is_some()");
                    let prompt_text = callback();
                    if let Err(e) = self.transport.push_alert(&secret, &prompt_text, &ciphertext).await {
                        debug!(error = %e, "push_alert failed, continuing to wait for fail timeout");
                    }
                }
                _ = &mut fail_sleep => {
                    self.state.lock().await.pending.remove(&request_id);
                    return Err(EnclaveError::Timeout);
                }
            }
        }
    }

    // ─── Profile caching ──────────────────────────────────────────────────

    /// Non-blocking profile lookup for the agent's `List` operation
    /// (spec.md §4.5). Returns the cached profile, if any, without network
    /// I/O; optionally kicks off a background refresh.
    pub async fn request_me(self: &Arc<Self>, send_unsolicited_if_cached: bool) -> Option<Profile> {
        let cached = self.state.lock().await.cached_me.clone();
        if cached.is_some() && send_unsolicited_if_cached {
            self.spawn_background_me_refresh();
        }
        cached
    }

    /// Blocking profile fetch used by `GET /pair` (spec.md §4.7): waits,
    /// using the `pair_alert`/`pair_fail` timeouts, for either a cached
    /// profile or the phone's pairing-confirmation `me` response.
    pub async fn await_pairing_confirmation(&self) -> Result<Profile, EnclaveError> {
        if let Some(profile) = self.state.lock().await.cached_me.clone() {
            return Ok(profile);
        }
        if !self.is_paired().await {
            return Err(EnclaveError::NotPaired);
        }

        let request_id = RequestId::generate();
        self.state.lock().await.last_me_request_id = Some(request_id);
        let req = me_request(request_id);
        let response = self
            .dispatch(req, self.timeouts.pair_alert, self.timeouts.pair_fail, || {
                "Confirm pairing on your phone".to_string()
            })
            .await?;
        self.apply_response_side_effects(&response).await;
        response.me_response.as_ref().map(Profile::from).ok_or(EnclaveError::Timeout)
    }

    fn spawn_background_me_refresh(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if !this.is_paired().await {
                return;
            }
            let request_id = RequestId::generate();
            this.state.lock().await.last_me_request_id = Some(request_id);
            let req = me_request(request_id);
            // Fire-and-forget: failures (including timeout) are swallowed,
            // the cache simply stays as it was.
            if let Ok(response) = this
                .dispatch(req, this.timeouts.me_alert, this.timeouts.me_fail, || {
                    "Confirm sign-in on your phone".to_string()
                })
                .await
            {
                this.apply_response_side_effects(&response).await;
            }
        });
    }

    // ─── Signing ──────────────────────────────────────────────────────────

    /// Attempt to request a signature, binding host-auth first (spec.md
    /// §4.5 "Signing path specialisation"). Returns the response and the
    /// phone's protocol version (for signature-format selection by `kr-agent`).
    pub async fn request_signature(
        &self,
        mut sign_request: SignRequest,
        session_id_key: SessionIdKey,
        on_alert: impl FnOnce() -> String + Send,
    ) -> Result<(Response, u32), EnclaveError> {
        sign_request.host_auth = self.await_host_auth(&session_id_key).await;

        let request_id = RequestId::generate();
        let mut req = base_request(request_id);
        req.sign_request = Some(sign_request);

        let response = self.dispatch(req, self.timeouts.sign_alert, self.timeouts.sign_fail, on_alert).await?;
        self.apply_response_side_effects(&response).await;

        let enclave_version = response.enclave_version.unwrap_or(1);

        if let Some(sign_resp) = &response.sign_response {
            if let Some(err) = &sign_resp.error {
                if err == "rejected" {
                    return Err(EnclaveError::Rejected);
                }
                if let Some(detail) = err.strip_prefix("host public key mismatched") {
                    return Err(EnclaveError::HostKeyMismatch(detail.trim_start_matches(':').trim().to_string()));
                }
            }
        }

        Ok((response, enclave_version))
    }

    /// Deliver a `HostAuth` captured by the shim (spec.md §4.8) to whichever
    /// signer is waiting on `session_id_key`, or cache it for a signer that
    /// hasn't asked yet.
    pub async fn deliver_host_auth(&self, session_id_key: SessionIdKey, host_auth: HostAuth) {
        let mut state = self.state.lock().await;
        if let Some(tx) = state.session_id_callbacks.pop(&session_id_key) {
            let _ = tx.send(host_auth);
        } else {
            state.host_auth_cache.put(session_id_key, host_auth);
        }
    }

    async fn await_host_auth(&self, session_id_key: &SessionIdKey) -> Option<HostAuth> {
        {
            let mut state = self.state.lock().await;
            if let Some(cached) = state.host_auth_cache.pop(session_id_key) {
                return Some(cached);
            }
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.session_id_callbacks.put(session_id_key.clone(), tx);
        }

        match tokio::time::timeout(HOST_AUTH_WAIT, rx).await {
            Ok(Ok(host_auth)) => Some(host_auth),
            _ => {
                self.state.lock().await.session_id_callbacks.pop(session_id_key);
                None
            }
        }
    }

    /// Dispatch a `git_sign`/`hosts` request body and wait for its response,
    /// using the same alert/fail timeouts as signing (spec.md §4.7's
    /// `/enclave` route: "sign/git_sign/hosts -> live with prompt
    /// callback"). Unlike [`Enclave::request_signature`], no host-auth is
    /// attached — that binding is specific to SSH signature payloads.
    pub async fn request_passthrough(
        &self,
        mut req: Request,
        on_alert: impl FnOnce() -> String + Send,
    ) -> Result<Response, EnclaveError> {
        req.request_id = RequestId::generate();
        let response = self.dispatch(req, self.timeouts.sign_alert, self.timeouts.sign_fail, on_alert).await?;
        self.apply_response_side_effects(&response).await;
        Ok(response)
    }

    // ─── Background loops ─────────────────────────────────────────────────

    async fn inbound_loop(self: Arc<Self>) {
        loop {
            let secret = match self.state.lock().await.secret.clone() {
                Some(s) => s,
                None => return,
            };
            match self.transport.read(&secret).await {
                Ok(batch) => {
                    for ciphertext in batch {
                        self.handle_inbound_message(&secret, &ciphertext).await;
                    }
                }
                Err(TransportError::Transient(msg)) => {
                    debug!(error = %msg, "transient relay read error, backing off");
                    tokio::time::sleep(TRANSIENT_BACKOFF).await;
                }
                Err(TransportError::Auth(msg)) => {
                    warn!(error = %msg, "relay auth error, resetting pairing state");
                    self.fail_all_pending(|| EnclaveError::Transport(TransportError::Auth(msg.clone()))).await;
                    let mut state = self.state.lock().await;
                    state.paired = false;
                    state.secret = None;
                    return;
                }
            }
        }
    }

    async fn handle_inbound_message(&self, secret: &PairingSecret, ciphertext: &[u8]) {
        let plaintext = match kr_pairing::decrypt(secret, ciphertext) {
            Ok(p) => p,
            Err(_) => return,
        };
        let response = match kr_codec::decode_response(&plaintext) {
            Ok(r) => r,
            Err(_) => return,
        };

        let matched = self.state.lock().await.pending.remove(&response.request_id);
        if let Some(slot) = matched {
            let _ = slot.responder.send(Ok(response.clone()));
        }

        self.apply_response_side_effects(&response).await;
    }

    /// Apply the cache/persistence side effects every response carries,
    /// regardless of whether it matched a pending slot (spec.md §4.5:
    /// "If response.me is present..." / "If response.approved_until
    /// present...").
    async fn apply_response_side_effects(&self, response: &Response) {
        if let Some(me_body) = &response.me_response {
            let is_fresh = {
                let state = self.state.lock().await;
                state.last_me_request_id == Some(response.request_id) || state.last_me_request_id.is_none()
            };
            if is_fresh {
                let profile = Profile::from(me_body);
                let changed = {
                    let mut state = self.state.lock().await;
                    let changed = state.cached_me.as_ref() != Some(&profile);
                    state.cached_me = Some(profile.clone());
                    changed
                };
                if changed {
                    let _guard = self.persist_lock.lock().await;
                    if let Err(e) = self.store.save_me(&profile).await {
                        warn!(error = %e, "failed to persist cached profile");
                    }
                }
            }
        }

        if let Some(approved_until) = response.approved_until {
            let secret = {
                let mut state = self.state.lock().await;
                if let Some(secret) = state.secret.as_mut() {
                    secret.approved_until = Some(approved_until);
                    Some(secret.clone())
                } else {
                    None
                }
            };
            if let Some(secret) = secret {
                let _guard = self.persist_lock.lock().await;
                if let Err(e) = self.store.save_pairing(&secret).await {
                    warn!(error = %e, "failed to persist approved_until update");
                }
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.timeouts.ack_delay).await;
            let secret = match self.state.lock().await.secret.clone() {
                Some(s) => s,
                None => return,
            };
            let req = no_op_request(RequestId::generate());
            let Ok(bytes) = kr_codec::encode_request(&req) else { continue };
            let ciphertext = kr_pairing::encrypt(&secret, &bytes);
            // Dropped silently on failure (spec.md §4.5: "sole purpose is
            // relay-side liveness").
            let _ = self.transport.send(&secret, &ciphertext).await;
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn base_request(request_id: RequestId) -> Request {
    Request {
        request_id,
        unix_seconds: unix_now(),
        send_ack: None,
        version: kr_codec::PROTOCOL_VERSION,
        me_request: None,
        sign_request: None,
        git_sign_request: None,
        hosts_request: None,
        unpair_request: None,
        no_op: None,
    }
}

fn me_request(request_id: RequestId) -> Request {
    let mut req = base_request(request_id);
    req.me_request = Some(MeRequest {});
    req
}

fn no_op_request(request_id: RequestId) -> Request {
    let mut req = base_request(request_id);
    req.no_op = Some(NoOp {});
    req
}
