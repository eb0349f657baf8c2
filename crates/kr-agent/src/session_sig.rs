//! Extracts the SSH session-id and signature algorithm from a
//! `SSH_AGENTC_SIGN_REQUEST`'s `data` field (spec.md §4.6 step 2): `ssh`
//! asks the agent to sign the RFC 4252 §7 "publickey authentication"
//! structure, which embeds the session id up front and a redundant copy of
//! the public key at the tail. We pull both out and strip the tail before
//! handing the remainder to the enclave, since the phone already knows the
//! key from its fingerprint.

use crate::error::AgentError;
use crate::wire::Reader;

/// `SSH_MSG_USERAUTH_REQUEST`, RFC 4252 §5.
const SSH_MSG_USERAUTH_REQUEST: u8 = 50;

pub struct ParsedSignPayload {
    pub session_id: Vec<u8>,
    pub algorithm: String,
    /// `data` with the trailing (redundant) public-key blob field removed.
    pub stripped: Vec<u8>,
}

/// Parse `data` as an RFC 4252 §7 publickey-auth signed blob:
/// `string session_id, byte SSH_MSG_USERAUTH_REQUEST, string user, string
/// service, string "publickey", boolean TRUE, string algorithm, string
/// public_key_blob`.
///
/// Fails closed (spec.md §4.6: "Unsupported key types fail closed") on
/// anything that doesn't match this exact shape — a non-auth signing
/// request isn't one this enclave is allowed to forward to the phone.
pub fn parse(data: &[u8]) -> Result<ParsedSignPayload, AgentError> {
    let mut r = Reader::new(data);
    let session_id = r.read_string()?;

    if r.read_u8()? != SSH_MSG_USERAUTH_REQUEST {
        return Err(AgentError::UnsupportedKeyType("payload is not a userauth request".into()));
    }
    let _user_name = r.read_string()?;
    let _service_name = r.read_string()?;
    let method = r.read_utf8_string()?;
    if method != "publickey" {
        return Err(AgentError::UnsupportedKeyType(format!("unsupported auth method {method}")));
    }
    if !r.read_bool()? {
        return Err(AgentError::UnsupportedKeyType("not a has-signature publickey request".into()));
    }
    let algorithm = r.read_utf8_string()?;
    let before_key_blob = r.consumed();
    let _public_key_blob = r.read_string()?;
    if !r.remaining().is_empty() {
        return Err(AgentError::MalformedPayload("trailing bytes after public key blob".into()));
    }

    Ok(ParsedSignPayload { session_id, algorithm, stripped: data[..before_key_blob].to_vec() })
}
