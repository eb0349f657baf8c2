//! Integration tests for the six scenarios in spec.md §8, driven against
//! [`InMemoryTransport`] and [`MemoryStore`] standing in for the relay and
//! disk. A background task plays the role of "the phone": it drains
//! whatever the enclave sent outbound, decrypts/decodes it, and pushes back
//! a canned response.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Signer, SigningKey};
use kr_common::model::{
    HostAuth, MeResponseBody, PairingSecret, Response, SignResponseBody, SignatureBody,
};
use kr_common::timeouts::Timeouts;
use kr_enclave::Enclave;
use kr_persistence::MemoryStore;
use kr_transport::InMemoryTransport;
use sha2::{Digest, Sha256};

/// Spawn the mock phone: for every outbound ciphertext, decode the request
/// and hand it to `respond` to build the matching response.
fn spawn_mock_phone(
    transport: Arc<InMemoryTransport>,
    secret: PairingSecret,
    respond: impl Fn(kr_common::model::Request) -> Response + Send + 'static,
) {
    tokio::spawn(async move {
        loop {
            for msg in transport.drain_outbound().await {
                let Ok(plaintext) = kr_pairing::decrypt(&secret, &msg.ciphertext) else { continue };
                let Ok(req) = kr_codec::decode_request(&plaintext) else { continue };
                let response = respond(req);
                let bytes = kr_codec::encode_response(&response).unwrap();
                let ciphertext = kr_pairing::encrypt(&secret, &bytes);
                transport.push_inbound(ciphertext).await;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
}

fn test_signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn ssh_wire_ed25519_pubkey(verifying: &ed25519_dalek::VerifyingKey) -> Vec<u8> {
    // Minimal SSH wire encoding for an ed25519 public key: three
    // length-prefixed fields (type name, then the raw key).
    let mut out = Vec::new();
    for field in [b"ssh-ed25519".as_slice(), verifying.as_bytes().as_slice()] {
        out.extend_from_slice(&(field.len() as u32).to_be_bytes());
        out.extend_from_slice(field);
    }
    out
}

async fn make_enclave() -> (Arc<Enclave>, Arc<InMemoryTransport>) {
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(MemoryStore::new());
    let enclave = Enclave::new(transport.clone(), store, Timeouts::short()).await;
    enclave.start();
    (enclave, transport)
}

#[tokio::test]
async fn pair_then_me_happy_path() {
    let (enclave, transport) = make_enclave().await;
    let signing_key = test_signing_key();
    let wire_key = ssh_wire_ed25519_pubkey(&signing_key.verifying_key());

    let secret = enclave.pair("laptop").await.unwrap();
    spawn_mock_phone(transport.clone(), secret.clone(), {
        let wire_key = wire_key.clone();
        move |req| {
            let mut resp = blank_response(req.request_id);
            if req.me_request.is_some() {
                resp.me_response = Some(MeResponseBody {
                    ssh_wire_public_key: base64_encode(&wire_key),
                    email: "k@example.com".into(),
                });
            }
            resp
        }
    });

    let profile = enclave.await_pairing_confirmation().await.unwrap();
    assert_eq!(profile.email, "k@example.com");
    assert_eq!(profile.ssh_wire_public_key, wire_key);
}

#[tokio::test]
async fn sign_with_approval() {
    let (enclave, transport) = make_enclave().await;
    let signing_key = test_signing_key();
    let wire_key = ssh_wire_ed25519_pubkey(&signing_key.verifying_key());
    let data = Sha256::digest(b"hello").to_vec();

    let secret = enclave.pair("laptop").await.unwrap();
    spawn_mock_phone(transport.clone(), secret.clone(), {
        let signing_key_bytes = signing_key.to_bytes();
        move |req| {
            let mut resp = blank_response(req.request_id);
            if let Some(sign_req) = &req.sign_request {
                let sig_key = SigningKey::from_bytes(&signing_key_bytes);
                let data = base64_decode(&sign_req.data);
                let signature = sig_key.sign(&data);
                resp.sign_response = Some(SignResponseBody {
                    signature: Some(SignatureBody {
                        format: "ssh-ed25519".into(),
                        signature: base64_encode(&signature.to_bytes()),
                    }),
                    error: None,
                });
            }
            resp
        }
    });

    let fingerprint = sha256_hex(&wire_key);
    let sign_request = kr_common::model::SignRequest {
        public_key_fingerprint: fingerprint,
        data: base64_encode(&data),
        host_auth: None,
    };
    let (response, _version) = enclave
        .request_signature(sign_request, "session-a".to_string(), || "approve?".to_string())
        .await
        .unwrap();

    let sig_body = response.sign_response.unwrap().signature.unwrap();
    assert_eq!(sig_body.format, "ssh-ed25519");
    let sig_bytes = base64_decode(&sig_body.signature);
    let sig_array: [u8; 64] = sig_bytes.try_into().expect("signature is 64 bytes");
    let signature = ed25519_dalek::Signature::from_bytes(&sig_array);
    use ed25519_dalek::Verifier;
    signing_key.verifying_key().verify(&data, &signature).unwrap();
}

#[tokio::test]
async fn alert_then_success() {
    // sign_alert=50ms, sign_fail=200ms (Timeouts::short()). Delay the mock
    // phone's reply past the alert deadline but well short of the fail
    // deadline, and confirm exactly one push_alert happened before success.
    let (enclave, transport) = make_enclave().await;
    let secret = enclave.pair("laptop").await.unwrap();

    let transport_for_phone = transport.clone();
    let secret_for_phone = secret.clone();
    tokio::spawn(async move {
        loop {
            let outbound = transport_for_phone.drain_outbound().await;
            if let Some(msg) = outbound.into_iter().find(|m| m.alert_prompt.is_none()) {
                tokio::time::sleep(Duration::from_millis(120)).await;
                let plaintext = kr_pairing::decrypt(&secret_for_phone, &msg.ciphertext).unwrap();
                let req = kr_codec::decode_request(&plaintext).unwrap();
                let mut resp = blank_response(req.request_id);
                resp.sign_response = Some(SignResponseBody {
                    signature: Some(SignatureBody { format: "ssh-ed25519".into(), signature: base64_encode(b"sig") }),
                    error: None,
                });
                let bytes = kr_codec::encode_response(&resp).unwrap();
                let ciphertext = kr_pairing::encrypt(&secret_for_phone, &bytes);
                transport_for_phone.push_inbound(ciphertext).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let alert_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let alert_count2 = alert_count.clone();
    let sign_request = kr_common::model::SignRequest {
        public_key_fingerprint: "deadbeef".into(),
        data: base64_encode(b"payload"),
        host_auth: None,
    };

    let (response, _v) = enclave
        .request_signature(sign_request, "session-b".to_string(), move || {
            alert_count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            "approve?".to_string()
        })
        .await
        .unwrap();

    assert_eq!(alert_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(response.sign_response.unwrap().signature.is_some());

    let remaining = transport.drain_outbound().await;
    assert_eq!(remaining.len(), 1, "expected exactly the push_alert message left undrained");
    assert!(remaining[0].alert_prompt.is_some());
}

#[tokio::test]
async fn rejection_propagates() {
    let (enclave, transport) = make_enclave().await;
    let secret = enclave.pair("laptop").await.unwrap();
    spawn_mock_phone(transport.clone(), secret.clone(), move |req| {
        let mut resp = blank_response(req.request_id);
        if req.sign_request.is_some() {
            resp.sign_response = Some(SignResponseBody { signature: None, error: Some("rejected".into()) });
        }
        resp
    });

    let sign_request = kr_common::model::SignRequest {
        public_key_fingerprint: "deadbeef".into(),
        data: base64_encode(b"payload"),
        host_auth: None,
    };
    let err = enclave
        .request_signature(sign_request, "session-c".to_string(), || "approve?".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, kr_enclave::EnclaveError::Rejected));
}

#[tokio::test]
async fn host_key_mismatch_propagates() {
    let (enclave, transport) = make_enclave().await;
    let secret = enclave.pair("laptop").await.unwrap();
    spawn_mock_phone(transport.clone(), secret.clone(), move |req| {
        let mut resp = blank_response(req.request_id);
        if req.sign_request.is_some() {
            resp.sign_response = Some(SignResponseBody {
                signature: None,
                error: Some("host public key mismatched: expected X got Y".into()),
            });
        }
        resp
    });

    let sign_request = kr_common::model::SignRequest {
        public_key_fingerprint: "deadbeef".into(),
        data: base64_encode(b"payload"),
        host_auth: None,
    };
    let err = enclave
        .request_signature(sign_request, "session-d".to_string(), || "approve?".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, kr_enclave::EnclaveError::HostKeyMismatch(_)));
}

#[tokio::test]
async fn unpaired_me_fails_closed() {
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(MemoryStore::new());
    let enclave = Enclave::new(transport, store, Timeouts::short()).await;
    enclave.start();

    assert!(!enclave.is_paired().await);
    assert!(enclave.request_me(false).await.is_none());
    let err = enclave.await_pairing_confirmation().await.unwrap_err();
    assert!(matches!(err, kr_enclave::EnclaveError::NotPaired));
}

#[tokio::test]
async fn host_auth_delivered_before_sign_is_attached() {
    let (enclave, transport) = make_enclave().await;
    let secret = enclave.pair("laptop").await.unwrap();

    let host_auth = HostAuth { host_key: vec![1, 2, 3], signature: vec![4, 5, 6], host_names: vec!["example.com".into()] };
    enclave.deliver_host_auth("session-e".to_string(), host_auth.clone()).await;

    let seen_host_auth = Arc::new(std::sync::Mutex::new(None));
    let seen_host_auth2 = seen_host_auth.clone();
    spawn_mock_phone(transport.clone(), secret.clone(), move |req| {
        let mut resp = blank_response(req.request_id);
        if let Some(sign_req) = &req.sign_request {
            *seen_host_auth2.lock().unwrap() = sign_req.host_auth.clone();
            resp.sign_response = Some(SignResponseBody {
                signature: Some(SignatureBody { format: "ssh-ed25519".into(), signature: base64_encode(b"sig") }),
                error: None,
            });
        }
        resp
    });

    let sign_request = kr_common::model::SignRequest {
        public_key_fingerprint: "deadbeef".into(),
        data: base64_encode(b"payload"),
        host_auth: None,
    };
    enclave
        .request_signature(sign_request, "session-e".to_string(), || "approve?".to_string())
        .await
        .unwrap();

    let observed = seen_host_auth.lock().unwrap().clone().expect("host_auth should have been attached");
    assert_eq!(observed.host_key, host_auth.host_key);
}

// ─── Test helpers ───────────────────────────────────────────────────────────

fn blank_response(request_id: kr_common::model::RequestId) -> Response {
    Response {
        request_id,
        me_response: None,
        sign_response: None,
        tracking_id: None,
        approved_until: None,
        sns_endpoint_arn: None,
        enclave_version: Some(2),
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Vec<u8> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.decode(s).unwrap()
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
