//! Wire and on-disk data types shared by every `kr` crate (spec.md §3).
//!
//! These types carry no I/O and no business logic — encoding lives in
//! `kr-codec`, encryption in `kr-pairing`, persistence in `kr-persistence`.
//! Field names match the wire vocabulary in spec.md exactly (`me_request`,
//! `sign_request`, ...), keeping Rust field names aligned with what actually
//! goes over the wire.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ─── Identifiers ──────────────────────────────────────────────────────────

/// A 128-bit random request identifier (spec.md §3: "128-bit random").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a fresh random request id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Pairing material ─────────────────────────────────────────────────────

/// Ed25519 keypair bytes used for workstation-side key confirmation.
///
/// Stored as raw bytes rather than `ed25519_dalek` types so this crate (the
/// dependency-free foundation layer) doesn't need to depend on the signing
/// crate; `kr-pairing` reconstructs a `SigningKey`/`VerifyingKey` from these
/// bytes when it needs to sign or verify.
pub type Ed25519PublicBytes = [u8; 32];
pub type Ed25519SecretBytes = [u8; 32];

/// One live pairing between this workstation and a phone (spec.md §3).
///
/// `Debug` is hand-written below to redact `symmetric_key` and
/// `workstation_secret_key` — spec.md §8 requires that no symmetric-key byte
/// pattern is ever emitted to logs, and a derived `Debug` would happily print
/// both.
#[derive(Clone, Serialize, Deserialize)]
pub struct PairingSecret {
    /// 32-byte shared secret used for authenticated symmetric encryption.
    /// Immutable once set; unique per pairing (spec.md §4.1 invariants).
    pub symmetric_key: [u8; 32],
    pub workstation_public_key: Ed25519PublicBytes,
    pub workstation_secret_key: Ed25519SecretBytes,
    pub workstation_name: String,
    /// Deterministic function of `symmetric_key` — see `kr_pairing::derive_queue_uuid`.
    pub queue_uuid: Uuid,
    /// Push-wakeup token registered by the phone; absent until its first response.
    pub push_endpoint: Option<String>,
    /// Advisory: below this monotonic unix timestamp, signing requests may
    /// skip the user prompt. The phone remains authoritative; this is only
    /// used to pick the alert-vs-no-alert prompt UX.
    pub approved_until: Option<i64>,
    pub tracking_id: Option<String>,
}

impl fmt::Debug for PairingSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingSecret")
            .field("symmetric_key", &"<redacted>")
            .field("workstation_public_key", &B64.encode(self.workstation_public_key))
            .field("workstation_secret_key", &"<redacted>")
            .field("workstation_name", &self.workstation_name)
            .field("queue_uuid", &self.queue_uuid)
            .field("push_endpoint", &self.push_endpoint.is_some())
            .field("approved_until", &self.approved_until)
            .field("tracking_id", &self.tracking_id)
            .finish()
    }
}

/// The subset of `PairingSecret` safe to hand to the phone via QR code
/// (spec.md §4.1 `wire_representation`, §6 "Pairing payload"). Deliberately
/// excludes `workstation_secret_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingToken {
    /// `pk` — workstation public key, base64.
    #[serde(rename = "pk")]
    pub workstation_public_key: String,
    /// `n` — human-readable workstation label.
    #[serde(rename = "n")]
    pub workstation_name: String,
    /// `c` — symmetric key, base64. Present only on the workstation side;
    /// the phone learns it by scanning the QR code that embeds this token.
    #[serde(rename = "c")]
    pub symmetric_key: String,
    /// `v` — protocol version.
    #[serde(rename = "v")]
    pub version: u32,
}

// ─── Cached profile ───────────────────────────────────────────────────────

/// The paired phone's identity, cached after the first successful `me`
/// response (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// SSH wire-format public key bytes.
    pub ssh_wire_public_key: Vec<u8>,
    pub email: String,
}

impl Profile {
    /// SHA-256 fingerprint of `ssh_wire_public_key`, hex-encoded.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.ssh_wire_public_key);
        hex::encode(digest)
    }
}

// ─── Host auth ────────────────────────────────────────────────────────────

/// Host-key material opportunistically captured by the SSH transport shim
/// from the server's KEX reply (spec.md §3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostAuth {
    /// Host public key, SSH wire format.
    pub host_key: Vec<u8>,
    /// Signature over the session id, proving the server holds `host_key`'s
    /// private half.
    pub signature: Vec<u8>,
    pub host_names: Vec<String>,
}

// ─── Request / Response envelopes ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub public_key_fingerprint: String,
    /// Base64-encoded payload to sign.
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_auth: Option<HostAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnpairRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoOp {}

/// Top-level request envelope. Exactly one of the `Option` body fields is
/// populated per spec.md §3 — enforced by [`Request::body`], not by the
/// wire shape itself (the source reflects this with `omitempty` JSON tags;
/// we mirror it with `Option<T>` + `skip_serializing_if`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: RequestId,
    pub unix_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_ack: Option<bool>,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub me_request: Option<MeRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_request: Option<SignRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_sign_request: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts_request: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unpair_request: Option<UnpairRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_op: Option<NoOp>,
}

/// Which body variant a [`Request`] (or [`Response`]) actually carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Me,
    Sign,
    GitSign,
    Hosts,
    Unpair,
    NoOp,
}

impl Request {
    /// Determine which of the one-of body fields is populated.
    ///
    /// Returns `None` if zero or more than one are set — callers treat that
    /// as a codec error, never as "pick the first one".
    pub fn kind(&self) -> Option<RequestKind> {
        let present = [
            self.me_request.is_some(),
            self.sign_request.is_some(),
            self.git_sign_request.is_some(),
            self.hosts_request.is_some(),
            self.unpair_request.is_some(),
            self.no_op.is_some(),
        ];
        if present.iter().filter(|p| **p).count() != 1 {
            return None;
        }
        if self.me_request.is_some() {
            Some(RequestKind::Me)
        } else if self.sign_request.is_some() {
            Some(RequestKind::Sign)
        } else if self.git_sign_request.is_some() {
            Some(RequestKind::GitSign)
        } else if self.hosts_request.is_some() {
            Some(RequestKind::Hosts)
        } else if self.unpair_request.is_some() {
            Some(RequestKind::Unpair)
        } else {
            Some(RequestKind::NoOp)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponseBody {
    pub ssh_wire_public_key: String,
    pub email: String,
}

impl From<&MeResponseBody> for Profile {
    fn from(body: &MeResponseBody) -> Self {
        Profile {
            ssh_wire_public_key: B64.decode(&body.ssh_wire_public_key).unwrap_or_default(),
            email: body.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureBody {
    /// SSH signature format name, e.g. `"ssh-ed25519"`, `"rsa-sha2-256"`.
    pub format: String,
    /// Base64-encoded raw signature bytes.
    pub signature: String,
}

/// At most one of `signature` / `error` is populated (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResponseBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Top-level response envelope, mirrors [`Request::request_id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub me_response: Option<MeResponseBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_response: Option<SignResponseBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sns_endpoint_arn: Option<String>,
    /// The phone's protocol version, used by `kr-enclave::request_signature`
    /// to pick a signature format (spec.md §4.5, §9 Open Questions: "a
    /// single version comparison ... does not enumerate the version
    /// boundary"). Absent on older peers; treated as version 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclave_version: Option<u32>,
}
