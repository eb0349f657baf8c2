//! The session-id key shared between `kr-agent` (awaiting host-auth for a
//! signature request) and `kr-shim` (delivering host-auth captured from a
//! KEX reply) — both sides derive it independently from the same raw SSH
//! session-id bytes, so no extra rendezvous step between the two processes
//! is needed (spec.md §4.5, §4.8).

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

/// Base64 of the raw session-id bytes observed in a KEX exchange or a
/// publickey-auth signed blob.
pub fn session_id_key(session_id: &[u8]) -> String {
    B64.encode(session_id)
}
