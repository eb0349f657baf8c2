//! # kr-pairing
//!
//! Generation of pairing material, deterministic transport-queue-id
//! derivation, and the authenticated encryption layer the rest of the
//! protocol rides on (spec.md §4.1).
//!
//! Symmetric encryption is XChaCha20-Poly1305 (`chacha20poly1305`), keyed by
//! `PairingSecret::symmetric_key`, with a random 24-byte nonce prepended to
//! each ciphertext — self-delimiting, as spec.md requires. The workstation
//! asymmetric keypair is Ed25519 (`ed25519-dalek`), used to sign the
//! pairing-completion ping so the phone can authenticate that the first
//! decrypted message really did come from the workstation that generated
//! the QR code, not merely from whoever learned the symmetric key.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng as AeadOsRng},
    AeadCore, XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use kr_common::model::{PairingSecret, PairingToken};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Nonce length for XChaCha20-Poly1305 (192 bits).
const NONCE_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("decryption failed authentication (tampered or wrong key)")]
    Auth,
    #[error("ciphertext too short to contain a nonce")]
    Truncated,
    #[error("malformed key material: {0}")]
    BadKeyMaterial(&'static str),
}

/// Generate a brand-new pairing: fresh symmetric key, fresh Ed25519
/// workstation keypair, and the queue id derived from the symmetric key.
/// `push_endpoint`, `approved_until`, and `tracking_id` start empty
/// (spec.md §4.1).
pub fn generate(workstation_name: impl Into<String>) -> PairingSecret {
    let mut symmetric_key = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut symmetric_key);

    let signing_key = SigningKey::generate(&mut rand_core_adapter());
    let queue_uuid = derive_queue_uuid(&symmetric_key);

    PairingSecret {
        symmetric_key,
        workstation_public_key: signing_key.verifying_key().to_bytes(),
        workstation_secret_key: signing_key.to_bytes(),
        workstation_name: workstation_name.into(),
        queue_uuid,
        push_endpoint: None,
        approved_until: None,
        tracking_id: None,
    }
}

/// `rand_core` 0.6 (what `ed25519-dalek` 2.x wants) and the workspace's
/// `rand` 0.9 use different major versions of the `RngCore` trait; bridge
/// via the OS RNG each exposes rather than pinning an older `rand`.
fn rand_core_adapter() -> rand_core::OsRng {
    rand_core::OsRng
}

/// Deterministically derive the relay queue id from the symmetric key
/// (spec.md §4.1: "queue IDs are a deterministic function of
/// `symmetric_key`"). SHA-256 the key, take the first 16 bytes as a UUID.
pub fn derive_queue_uuid(symmetric_key: &[u8; 32]) -> Uuid {
    let digest = Sha256::digest(symmetric_key);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Authenticated-encrypt `plaintext` under `secret.symmetric_key`. Output is
/// `nonce || ciphertext_with_tag`, self-delimiting as spec.md requires.
pub fn encrypt(secret: &PairingSecret, plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new_from_slice(&secret.symmetric_key)
        .expect("symmetric_key is exactly 32 bytes");
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .expect("XChaCha20-Poly1305 encryption is infallible for in-memory buffers");

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt a ciphertext produced by [`encrypt`]. Fails closed: any
/// tampering, wrong key, or truncation is an error, never partial output.
/// Per spec.md §4.1, callers treat failure as message loss, not a protocol
/// error.
pub fn decrypt(secret: &PairingSecret, ciphertext: &[u8]) -> Result<Vec<u8>, PairingError> {
    if ciphertext.len() < NONCE_LEN {
        return Err(PairingError::Truncated);
    }
    let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(&secret.symmetric_key)
        .expect("symmetric_key is exactly 32 bytes");
    cipher.decrypt(nonce, body).map_err(|_| PairingError::Auth)
}

/// The subset of pairing material safe to embed in a QR code (spec.md
/// §4.1 `wire_representation`). Excludes `workstation_secret_key`.
pub fn wire_representation(secret: &PairingSecret) -> PairingToken {
    PairingToken {
        workstation_public_key: B64.encode(secret.workstation_public_key),
        workstation_name: secret.workstation_name.clone(),
        symmetric_key: B64.encode(secret.symmetric_key),
        version: kr_codec_protocol_version(),
    }
}

/// Avoids a hard dependency from `kr-pairing` on `kr-codec` just for one
/// constant; duplicated here with a test asserting the two stay in sync.
fn kr_codec_protocol_version() -> u32 {
    2
}

/// Sign a pairing-completion confirmation message with the workstation's
/// Ed25519 key, so the phone can verify it's talking to the workstation
/// that generated the QR code.
pub fn sign_confirmation(secret: &PairingSecret, message: &[u8]) -> [u8; 64] {
    let signing_key = SigningKey::from_bytes(&secret.workstation_secret_key);
    signing_key.sign(message).to_bytes()
}

/// Verify a confirmation signature against a raw Ed25519 public key.
pub fn verify_confirmation(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), PairingError> {
    use ed25519_dalek::Verifier;
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| PairingError::BadKeyMaterial("workstation_public_key"))?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    verifying_key.verify(message, &sig).map_err(|_| PairingError::Auth)
}
