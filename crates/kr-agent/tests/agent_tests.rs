//! Integration tests driving [`kr_agent::AgentServer`] over a real Unix
//! socket, against an in-memory enclave (mock phone) and a tiny fake
//! upstream ssh-agent (also a Unix socket), mirroring the "mock phone"
//! harness in `kr-enclave`'s integration tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Signer, SigningKey};
use kr_agent::AgentServer;
use kr_common::model::{MeResponseBody, PairingSecret, Response, SignResponseBody, SignatureBody};
use kr_common::timeouts::Timeouts;
use kr_enclave::Enclave;
use kr_notify::{Listener, Notifier};
use kr_persistence::MemoryStore;
use kr_transport::InMemoryTransport;
use tokio::net::{UnixListener, UnixStream};

// ─── Minimal client-side wire helpers (duplicated here deliberately — this
// file plays the role of an external program like `ssh`, which doesn't
// reach into kr-agent's private wire module) ─────────────────────────────

const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
const SSH_AGENT_SIGN_RESPONSE: u8 = 14;
const SSH_AGENTC_REMOVE_ALL_IDENTITIES: u8 = 19;
const SSH_AGENT_SUCCESS: u8 = 6;
const SSH_AGENT_FAILURE: u8 = 5;
const SSH_MSG_USERAUTH_REQUEST: u8 = 50;

async fn send_frame(stream: &mut UnixStream, body: &[u8]) {
    use tokio::io::AsyncWriteExt;
    stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();
}

async fn recv_frame(stream: &mut UnixStream) -> Vec<u8> {
    use tokio::io::AsyncReadExt;
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    body
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}
fn push_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    push_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn encode_sign_request(key_blob: &[u8], data: &[u8], flags: u32) -> Vec<u8> {
    let mut buf = vec![SSH_AGENTC_SIGN_REQUEST];
    push_string(&mut buf, key_blob);
    push_string(&mut buf, data);
    push_u32(&mut buf, flags);
    buf
}

fn parse_identities_answer(body: &[u8]) -> Vec<(Vec<u8>, String)> {
    assert_eq!(body[0], SSH_AGENT_IDENTITIES_ANSWER);
    let count = u32::from_be_bytes(body[1..5].try_into().unwrap());
    let mut out = Vec::new();
    let mut idx = 5;
    for _ in 0..count {
        let len = u32::from_be_bytes(body[idx..idx + 4].try_into().unwrap()) as usize;
        idx += 4;
        let key_blob = body[idx..idx + len].to_vec();
        idx += len;
        let len = u32::from_be_bytes(body[idx..idx + 4].try_into().unwrap()) as usize;
        idx += 4;
        let comment = String::from_utf8(body[idx..idx + len].to_vec()).unwrap();
        idx += len;
        out.push((key_blob, comment));
    }
    out
}

fn parse_sign_response(body: &[u8]) -> (String, Vec<u8>) {
    assert_eq!(body[0], SSH_AGENT_SIGN_RESPONSE);
    let blob_len = u32::from_be_bytes(body[1..5].try_into().unwrap()) as usize;
    let blob = &body[5..5 + blob_len];
    let fmt_len = u32::from_be_bytes(blob[0..4].try_into().unwrap()) as usize;
    let format = String::from_utf8(blob[4..4 + fmt_len].to_vec()).unwrap();
    let mut idx = 4 + fmt_len;
    let sig_len = u32::from_be_bytes(blob[idx..idx + 4].try_into().unwrap()) as usize;
    idx += 4;
    let sig = blob[idx..idx + sig_len].to_vec();
    (format, sig)
}

fn ssh_wire_ed25519_pubkey(verifying: &ed25519_dalek::VerifyingKey) -> Vec<u8> {
    let mut out = Vec::new();
    push_string(&mut out, b"ssh-ed25519");
    push_string(&mut out, verifying.as_bytes());
    out
}

/// Build the RFC 4252 §7 pubkey-auth signed blob `kr-agent` expects.
fn pubkey_auth_payload(session_id: &[u8], algorithm: &str, key_blob: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    push_string(&mut buf, session_id);
    buf.push(SSH_MSG_USERAUTH_REQUEST);
    push_string(&mut buf, b"alice");
    push_string(&mut buf, b"ssh-connection");
    push_string(&mut buf, b"publickey");
    buf.push(1);
    push_string(&mut buf, algorithm.as_bytes());
    push_string(&mut buf, key_blob);
    buf
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
fn base64_decode(s: &str) -> Vec<u8> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.decode(s).unwrap()
}

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

/// Spawn a tiny fake upstream ssh-agent holding exactly one key.
fn spawn_fake_upstream(sock: PathBuf, key_blob: Vec<u8>, comment: &'static str) {
    tokio::spawn(async move {
        let listener = UnixListener::bind(&sock).unwrap();
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let key_blob = key_blob.clone();
            tokio::spawn(async move {
                loop {
                    let body = recv_frame(&mut stream).await;
                    let reply = match body.first() {
                        Some(&SSH_AGENTC_REQUEST_IDENTITIES) => {
                            let mut out = vec![SSH_AGENT_IDENTITIES_ANSWER];
                            push_u32(&mut out, 1);
                            push_string(&mut out, &key_blob);
                            push_string(&mut out, comment.as_bytes());
                            out
                        }
                        Some(&SSH_AGENTC_SIGN_REQUEST) => {
                            let mut out = vec![SSH_AGENT_SIGN_RESPONSE];
                            let mut inner = Vec::new();
                            push_string(&mut inner, b"ssh-ed25519");
                            push_string(&mut inner, b"upstream-signature-bytes");
                            push_string(&mut out, &inner);
                            out
                        }
                        _ => vec![SSH_AGENT_SUCCESS],
                    };
                    send_frame(&mut stream, &reply).await;
                }
            });
        }
    });
}

struct Harness {
    agent_sock: PathBuf,
    notify_path: PathBuf,
    _tmp: tempfile::TempDir,
}

async fn start_agent(upstream_sock: Option<PathBuf>, enclave: Arc<Enclave>) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let agent_sock = tmp.path().join("agent.sock");
    let notify_path = tmp.path().join("notify");

    let notifier = Arc::new(Notifier::new(&notify_path).unwrap());
    let server = AgentServer::new(enclave, upstream_sock, notifier);
    let listener = UnixListener::bind(&agent_sock).unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    Harness { agent_sock, notify_path, _tmp: tmp }
}

async fn make_enclave() -> (Arc<Enclave>, Arc<InMemoryTransport>) {
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(MemoryStore::new());
    let enclave = Enclave::new(transport.clone(), store, Timeouts::short()).await;
    enclave.start();
    (enclave, transport)
}

#[tokio::test]
async fn list_returns_paired_profile_then_upstream_keys() {
    let (enclave, transport) = make_enclave().await;
    let signing_key = SigningKey::from_bytes(&[9u8; 32]);
    let wire_key = ssh_wire_ed25519_pubkey(&signing_key.verifying_key());

    let secret = enclave.pair("laptop").await.unwrap();
    spawn_mock_phone(transport.clone(), secret.clone(), {
        let wire_key = wire_key.clone();
        move |req| {
            let mut resp = blank_response(req.request_id);
            if req.me_request.is_some() {
                resp.me_response =
                    Some(MeResponseBody { ssh_wire_public_key: base64_encode(&wire_key), email: "k@example.com".into() });
            }
            resp
        }
    });
    enclave.await_pairing_confirmation().await.unwrap();

    let upstream_tmp = tempfile::tempdir().unwrap();
    let upstream_sock_path = upstream_tmp.path().join("upstream.sock");
    let upstream_key = b"upstream-key-blob".to_vec();
    spawn_fake_upstream(upstream_sock_path.clone(), upstream_key.clone(), "upstream@host");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let harness = start_agent(Some(upstream_sock_path), enclave).await;
    let mut client = UnixStream::connect(&harness.agent_sock).await.unwrap();
    send_frame(&mut client, &[SSH_AGENTC_REQUEST_IDENTITIES]).await;
    let reply = recv_frame(&mut client).await;
    let identities = parse_identities_answer(&reply);

    assert_eq!(identities.len(), 2);
    assert_eq!(identities[0], (wire_key, "k@example.com".to_string()));
    assert_eq!(identities[1], (upstream_key, "upstream@host".to_string()));
}

#[tokio::test]
async fn sign_delegates_to_upstream_when_key_matches_upstream() {
    let (enclave, _transport) = make_enclave().await;
    let upstream_tmp = tempfile::tempdir().unwrap();
    let upstream_sock_path = upstream_tmp.path().join("upstream.sock");
    let upstream_key = b"upstream-only-key".to_vec();
    spawn_fake_upstream(upstream_sock_path.clone(), upstream_key.clone(), "someone@host");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let harness = start_agent(Some(upstream_sock_path), enclave).await;
    let mut client = UnixStream::connect(&harness.agent_sock).await.unwrap();
    send_frame(&mut client, &encode_sign_request(&upstream_key, b"some-data", 0)).await;
    let reply = recv_frame(&mut client).await;
    let (format, sig) = parse_sign_response(&reply);
    assert_eq!(format, "ssh-ed25519");
    assert_eq!(sig, b"upstream-signature-bytes");
}

#[tokio::test]
async fn sign_routes_unmatched_key_through_the_enclave() {
    let (enclave, transport) = make_enclave().await;
    let signing_key = SigningKey::from_bytes(&[3u8; 32]);
    let wire_key = ssh_wire_ed25519_pubkey(&signing_key.verifying_key());

    let secret = enclave.pair("laptop").await.unwrap();
    spawn_mock_phone(transport.clone(), secret, {
        let signing_key_bytes = signing_key.to_bytes();
        move |req| {
            let mut resp = blank_response(req.request_id);
            if let Some(sign_req) = &req.sign_request {
                let sig_key = SigningKey::from_bytes(&signing_key_bytes);
                let data = base64_decode(&sign_req.data);
                let signature = sig_key.sign(&data);
                resp.sign_response = Some(SignResponseBody {
                    signature: Some(SignatureBody { format: "ssh-ed25519".into(), signature: base64_encode(&signature.to_bytes()) }),
                    error: None,
                });
            }
            resp
        }
    });

    let harness = start_agent(None, enclave).await;
    let mut client = UnixStream::connect(&harness.agent_sock).await.unwrap();
    let payload = pubkey_auth_payload(b"session-123", "ssh-ed25519", &wire_key);
    send_frame(&mut client, &encode_sign_request(&wire_key, &payload, 0)).await;
    let reply = recv_frame(&mut client).await;
    let (format, sig_bytes) = parse_sign_response(&reply);
    assert_eq!(format, "ssh-ed25519");

    let sig_array: [u8; 64] = sig_bytes.try_into().unwrap();
    let signature = ed25519_dalek::Signature::from_bytes(&sig_array);
    use ed25519_dalek::Verifier;
    // Verify against the *stripped* payload (session-id + userauth prefix,
    // minus the redundant trailing public-key blob), matching what
    // kr-agent actually asked the phone to sign.
    let stripped_len = payload.len() - (4 + wire_key.len());
    signing_key.verifying_key().verify(&payload[..stripped_len], &signature).unwrap();
}

#[tokio::test]
async fn rejected_signature_publishes_kill_notification() {
    let (enclave, transport) = make_enclave().await;
    let wire_key = b"some-wire-key".to_vec();

    let secret = enclave.pair("laptop").await.unwrap();
    spawn_mock_phone(transport.clone(), secret, move |req| {
        let mut resp = blank_response(req.request_id);
        if req.sign_request.is_some() {
            resp.sign_response = Some(SignResponseBody { signature: None, error: Some("rejected".into()) });
        }
        resp
    });

    let harness = start_agent(None, enclave).await;
    let listener = Listener::open(&harness.notify_path).unwrap();
    let mut subscription = listener.subscribe(Some(kr_common::session::session_id_key(b"session-xyz")));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut client = UnixStream::connect(&harness.agent_sock).await.unwrap();
    let payload = pubkey_auth_payload(b"session-xyz", "ssh-ed25519", &wire_key);
    send_frame(&mut client, &encode_sign_request(&wire_key, &payload, 0)).await;
    let reply = recv_frame(&mut client).await;
    assert_eq!(reply, vec![SSH_AGENT_FAILURE]);

    let token = tokio::time::timeout(Duration::from_secs(2), subscription.recv()).await.unwrap();
    assert_eq!(token.as_deref(), Some(kr_notify::REJECTED));
}

#[tokio::test]
async fn mutation_request_without_upstream_fails_closed() {
    let (enclave, _transport) = make_enclave().await;
    let harness = start_agent(None, enclave).await;
    let mut client = UnixStream::connect(&harness.agent_sock).await.unwrap();
    send_frame(&mut client, &[SSH_AGENTC_REMOVE_ALL_IDENTITIES]).await;
    let reply = recv_frame(&mut client).await;
    assert_eq!(reply, vec![SSH_AGENT_FAILURE]);
}

#[tokio::test]
async fn mutation_request_is_forwarded_when_upstream_present() {
    let (enclave, _transport) = make_enclave().await;
    let upstream_tmp = tempfile::tempdir().unwrap();
    let upstream_sock_path = upstream_tmp.path().join("upstream.sock");
    spawn_fake_upstream(upstream_sock_path.clone(), vec![], "unused");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let harness = start_agent(Some(upstream_sock_path), enclave).await;
    let mut client = UnixStream::connect(&harness.agent_sock).await.unwrap();
    send_frame(&mut client, &[SSH_AGENTC_REMOVE_ALL_IDENTITIES]).await;
    let reply = recv_frame(&mut client).await;
    assert_eq!(reply, vec![SSH_AGENT_SUCCESS]);
}
