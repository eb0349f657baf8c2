//! Delegation to the upstream agent named by `SSH_AUTH_SOCK` (spec.md §4.6:
//! "all mutation operations are forwarded to an upstream agent ... the
//! phone-backed agent is append-only"). Each call opens its own short-lived
//! connection — the same "connect, do one exchange, drop" shape the
//! reference `SshAgentClient` uses synchronously, translated to `tokio`.

use std::path::Path;

use tokio::net::UnixStream;

use crate::error::AgentError;
use crate::wire::{self, Identity};

/// Fetch the upstream agent's identity list (spec.md §4.6 "List": "followed
/// by the upstream agent's keys").
pub async fn list_identities(sock: &Path) -> Result<Vec<Identity>, AgentError> {
    let mut stream = UnixStream::connect(sock).await?;
    wire::write_frame(&mut stream, &wire::encode_request_identities()).await?;
    let body = wire::read_frame(&mut stream).await?;
    wire::parse_identities_answer(&body)
}

/// Ask the upstream agent to sign `data` with the key named by `key_blob`
/// (spec.md §4.6 "Sign": "if the key fingerprint matches any key returned
/// by the upstream agent, delegate directly to it").
pub async fn sign(sock: &Path, key_blob: &[u8], data: &[u8], flags: u32) -> Result<(String, Vec<u8>), AgentError> {
    let mut stream = UnixStream::connect(sock).await?;
    wire::write_frame(&mut stream, &wire::encode_sign_request(key_blob, data, flags)).await?;
    let body = wire::read_frame(&mut stream).await?;
    wire::parse_sign_response(&body)
}

/// Forward a raw client message verbatim (Add/Remove/RemoveAll/Lock/Unlock/
/// Extension — spec.md §4.6: "mutation operations are forwarded ... the
/// phone-backed agent is append-only") and return the upstream's raw reply.
pub async fn forward_raw(sock: &Path, body: &[u8]) -> Result<Vec<u8>, AgentError> {
    let mut stream = UnixStream::connect(sock).await?;
    wire::write_frame(&mut stream, body).await?;
    wire::read_frame(&mut stream).await
}
