//! The SSH-agent adapter itself (spec.md §4.6): one task per accepted
//! connection (spec.md §5), speaking the length-prefixed wire protocol and
//! routing List/Sign through the enclave, everything else straight through
//! to the upstream agent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use kr_common::model::SignRequest;
use kr_enclave::{Enclave, EnclaveError};
use kr_notify::Notifier;
use sha2::{Digest, Sha256};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::session_sig;
use crate::upstream;
use crate::wire::{self, Identity, Reader};

/// How long to wait after publishing a kill-session notification before
/// returning the signature failure, so the shim has a chance to read it
/// before its connection is torn down (spec.md §4.6 step 6: "delay ≈ 1s").
const SESSION_KILL_DELAY: Duration = Duration::from_secs(1);

pub struct AgentServer {
    enclave: Arc<Enclave>,
    upstream_sock: Option<PathBuf>,
    notifier: Arc<Notifier>,
}

impl AgentServer {
    pub fn new(enclave: Arc<Enclave>, upstream_sock: Option<PathBuf>, notifier: Arc<Notifier>) -> Arc<Self> {
        Arc::new(Self { enclave, upstream_sock, notifier })
    }

    /// Accept connections forever, one task per connection (spec.md §5's
    /// `Agent` task). Returns only if the listener itself errors out.
    pub async fn serve(self: Arc<Self>, listener: UnixListener) -> std::io::Result<()> {
        loop {
            let (stream, _addr) = listener.accept().await?;
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(stream).await {
                    debug!(error = %e, "ssh-agent connection ended");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: UnixStream) -> Result<(), AgentError> {
        loop {
            let body = match wire::read_frame(&mut stream).await {
                Ok(b) => b,
                Err(AgentError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            };
            let reply = self.dispatch(&body).await;
            wire::write_frame(&mut stream, &reply).await?;
        }
    }

    async fn dispatch(&self, body: &[u8]) -> Vec<u8> {
        let Some(&msg_type) = body.first() else { return wire::encode_failure() };
        let result = match msg_type {
            wire::SSH_AGENTC_REQUEST_IDENTITIES => self.handle_list().await,
            wire::SSH_AGENTC_SIGN_REQUEST => self.handle_sign(body).await,
            wire::SSH_AGENTC_ADD_IDENTITY
            | wire::SSH_AGENTC_ADD_ID_CONSTRAINED
            | wire::SSH_AGENTC_REMOVE_IDENTITY
            | wire::SSH_AGENTC_REMOVE_ALL_IDENTITIES
            | wire::SSH_AGENTC_LOCK
            | wire::SSH_AGENTC_UNLOCK
            | wire::SSH_AGENTC_EXTENSION => self.forward_to_upstream(body).await,
            _ => Ok(wire::encode_failure()),
        };
        result.unwrap_or_else(|e| {
            warn!(error = %e, "ssh-agent request failed");
            wire::encode_failure()
        })
    }

    async fn forward_to_upstream(&self, body: &[u8]) -> Result<Vec<u8>, AgentError> {
        match &self.upstream_sock {
            Some(sock) => upstream::forward_raw(sock, body).await,
            None => Ok(wire::encode_failure()),
        }
    }

    /// spec.md §4.6 "List": cached paired-profile key first, then whatever
    /// the upstream agent reports. If unpaired, still return the upstream
    /// list, after a one-line notice.
    async fn handle_list(&self) -> Result<Vec<u8>, AgentError> {
        let mut identities = Vec::new();

        match self.enclave.request_me(false).await {
            Some(profile) => identities.push(Identity { key_blob: profile.ssh_wire_public_key, comment: profile.email }),
            None => {
                let _ = self.notifier.publish(None, "kr: not paired, ssh key list is upstream-only").await;
            }
        }

        if let Some(sock) = &self.upstream_sock {
            match upstream::list_identities(sock).await {
                Ok(mut upstream_ids) => identities.append(&mut upstream_ids),
                Err(e) => warn!(error = %e, "failed to list upstream agent identities"),
            }
        }

        Ok(wire::encode_identities_answer(&identities))
    }

    /// spec.md §4.6 "Sign"/"SignWithFlags".
    async fn handle_sign(&self, body: &[u8]) -> Result<Vec<u8>, AgentError> {
        let req = wire::parse_sign_request(body)?;

        if let Some(sock) = &self.upstream_sock {
            if let Ok(upstream_ids) = upstream::list_identities(sock).await {
                if upstream_ids.iter().any(|id| id.key_blob == req.key_blob) {
                    let (format, raw_sig) = upstream::sign(sock, &req.key_blob, &req.data, req.flags).await?;
                    return Ok(wire::encode_sign_response(&format, &raw_sig));
                }
            }
        }

        let parsed = session_sig::parse(&req.data)?;
        let session_id_key = kr_common::session::session_id_key(&parsed.session_id);
        let fingerprint = hex::encode(Sha256::digest(&req.key_blob));

        let sign_request = SignRequest {
            public_key_fingerprint: fingerprint,
            data: B64.encode(&parsed.stripped),
            host_auth: None,
        };

        let outcome = self
            .enclave
            .request_signature(sign_request, session_id_key.clone(), || "Approve SSH sign-in?".to_string())
            .await;

        match outcome {
            Ok((response, enclave_version)) => {
                let Some(sig_body) = response.sign_response.and_then(|s| s.signature) else {
                    return Ok(wire::encode_failure());
                };
                let format = if kr_codec::supports_rsa_sha2(enclave_version) {
                    parsed.algorithm
                } else {
                    key_type_of(&req.key_blob)?
                };
                let raw_sig = B64.decode(&sig_body.signature).map_err(|e| AgentError::MalformedPayload(e.to_string()))?;
                Ok(wire::encode_sign_response(&format, &raw_sig))
            }
            Err(EnclaveError::Rejected) => {
                self.kill_session(&session_id_key, kr_notify::REJECTED).await;
                Ok(wire::encode_failure())
            }
            Err(EnclaveError::HostKeyMismatch(_)) => {
                self.kill_session(&session_id_key, kr_notify::HOST_KEY_MISMATCH).await;
                Ok(wire::encode_failure())
            }
            Err(_) => Ok(wire::encode_failure()),
        }
    }

    async fn kill_session(&self, session_id_key: &str, token: &str) {
        if let Err(e) = self.notifier.publish(Some(session_id_key), token).await {
            warn!(error = %e, "failed to publish session-kill notification");
        }
        tokio::time::sleep(SESSION_KILL_DELAY).await;
    }
}

fn key_type_of(key_blob: &[u8]) -> Result<String, AgentError> {
    Reader::new(key_blob).read_utf8_string()
}
