//! SSH-agent wire protocol framing (spec.md §4.6): big-endian
//! length-prefixed messages, message type byte first. Grounded in the
//! message numbering and manual buffer packing used by the reference
//! `ssh_agent.rs` client in the example pack, generalized to the server
//! (accepting) half over `tokio::io::{AsyncRead, AsyncWrite}`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::AgentError;

// ─── Message type bytes (draft-miller-ssh-agent) ───────────────────────────

pub const SSH_AGENT_FAILURE: u8 = 5;
pub const SSH_AGENT_SUCCESS: u8 = 6;
pub const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
pub const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
pub const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
pub const SSH_AGENT_SIGN_RESPONSE: u8 = 14;
pub const SSH_AGENTC_ADD_IDENTITY: u8 = 17;
pub const SSH_AGENTC_REMOVE_IDENTITY: u8 = 18;
pub const SSH_AGENTC_REMOVE_ALL_IDENTITIES: u8 = 19;
pub const SSH_AGENTC_ADD_ID_CONSTRAINED: u8 = 25;
pub const SSH_AGENTC_LOCK: u8 = 22;
pub const SSH_AGENTC_UNLOCK: u8 = 23;
pub const SSH_AGENTC_EXTENSION: u8 = 27;
pub const SSH_AGENT_EXTENSION_FAILURE: u8 = 28;

/// RFC 8332 signature flags.
pub const SSH_AGENT_RSA_SHA2_256: u32 = 0x02;
pub const SSH_AGENT_RSA_SHA2_512: u32 = 0x04;

/// Read one length-prefixed message body (type byte + payload) from `r`.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>, AgentError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await?;
    Ok(body)
}

/// Write one length-prefixed message body to `w`.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, body: &[u8]) -> Result<(), AgentError> {
    w.write_all(&(body.len() as u32).to_be_bytes()).await?;
    w.write_all(body).await?;
    w.flush().await?;
    Ok(())
}

// ─── Structured field access ────────────────────────────────────────────────

/// Cursor over a message body for reading the length-prefixed/fixed-width
/// fields the protocol is built from.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8, AgentError> {
        let b = *self.buf.get(self.pos).ok_or_else(too_short)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u32(&mut self) -> Result<u32, AgentError> {
        let end = self.pos.checked_add(4).ok_or_else(too_short)?;
        let slice = self.buf.get(self.pos..end).ok_or_else(too_short)?;
        self.pos = end;
        Ok(u32::from_be_bytes(slice.try_into().expect("slice is 4 bytes")))
    }

    pub fn read_bool(&mut self) -> Result<bool, AgentError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a length-prefixed byte string.
    pub fn read_string(&mut self) -> Result<Vec<u8>, AgentError> {
        let len = self.read_u32()? as usize;
        let end = self.pos.checked_add(len).ok_or_else(too_short)?;
        let slice = self.buf.get(self.pos..end).ok_or_else(too_short)?;
        self.pos = end;
        Ok(slice.to_vec())
    }

    pub fn read_utf8_string(&mut self) -> Result<String, AgentError> {
        String::from_utf8(self.read_string()?).map_err(|e| AgentError::MalformedPayload(e.to_string()))
    }

    /// Everything from the cursor's current position to the end of the buffer.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Bytes consumed so far — used to slice off a trailing field rather
    /// than reconstruct it.
    pub fn consumed(&self) -> usize {
        self.pos
    }
}

fn too_short() -> AgentError {
    AgentError::MalformedPayload("message ended before expected field".into())
}

/// Accumulates fields in wire order.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn push_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn push_string(&mut self, bytes: &[u8]) -> &mut Self {
        self.push_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// ─── Typed message bodies ───────────────────────────────────────────────────

/// One entry in an `SSH_AGENT_IDENTITIES_ANSWER` (spec.md §4.6 "List").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub key_blob: Vec<u8>,
    pub comment: String,
}

pub fn encode_identities_answer(identities: &[Identity]) -> Vec<u8> {
    let mut w = Writer::new();
    w.push_u8(SSH_AGENT_IDENTITIES_ANSWER).push_u32(identities.len() as u32);
    for id in identities {
        w.push_string(&id.key_blob).push_string(id.comment.as_bytes());
    }
    w.into_bytes()
}

pub fn parse_identities_answer(body: &[u8]) -> Result<Vec<Identity>, AgentError> {
    let mut r = Reader::new(body);
    let msg_type = r.read_u8()?;
    if msg_type != SSH_AGENT_IDENTITIES_ANSWER {
        return Err(AgentError::MalformedPayload(format!("expected IDENTITIES_ANSWER, got {msg_type}")));
    }
    let count = r.read_u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key_blob = r.read_string()?;
        let comment = r.read_utf8_string()?;
        out.push(Identity { key_blob, comment });
    }
    Ok(out)
}

pub fn encode_request_identities() -> Vec<u8> {
    vec![SSH_AGENTC_REQUEST_IDENTITIES]
}

/// A parsed `SSH_AGENTC_SIGN_REQUEST` (also used for `SignWithFlags` — the
/// wire shape is identical, the flags field is simply nonzero).
pub struct SignRequestMsg {
    pub key_blob: Vec<u8>,
    pub data: Vec<u8>,
    pub flags: u32,
}

pub fn parse_sign_request(body: &[u8]) -> Result<SignRequestMsg, AgentError> {
    let mut r = Reader::new(body);
    let msg_type = r.read_u8()?;
    if msg_type != SSH_AGENTC_SIGN_REQUEST {
        return Err(AgentError::MalformedPayload(format!("expected SIGN_REQUEST, got {msg_type}")));
    }
    Ok(SignRequestMsg { key_blob: r.read_string()?, data: r.read_string()?, flags: r.read_u32()? })
}

pub fn encode_sign_request(key_blob: &[u8], data: &[u8], flags: u32) -> Vec<u8> {
    let mut w = Writer::new();
    w.push_u8(SSH_AGENTC_SIGN_REQUEST).push_string(key_blob).push_string(data).push_u32(flags);
    w.into_bytes()
}

/// The inner `string format, string raw_signature` pair used both inside
/// `SSH_AGENT_SIGN_RESPONSE` and inside a pubkey-auth userauth signature.
pub fn encode_sign_response(format: &str, raw_signature: &[u8]) -> Vec<u8> {
    let mut inner = Writer::new();
    inner.push_string(format.as_bytes()).push_string(raw_signature);
    let mut outer = Writer::new();
    outer.push_u8(SSH_AGENT_SIGN_RESPONSE).push_string(&inner.into_bytes());
    outer.into_bytes()
}

pub fn parse_sign_response(body: &[u8]) -> Result<(String, Vec<u8>), AgentError> {
    let mut r = Reader::new(body);
    let msg_type = r.read_u8()?;
    if msg_type != SSH_AGENT_SIGN_RESPONSE {
        return Err(AgentError::MalformedPayload(format!("expected SIGN_RESPONSE, got {msg_type}")));
    }
    let blob = r.read_string()?;
    let mut inner = Reader::new(&blob);
    let format = inner.read_utf8_string()?;
    let raw_signature = inner.read_string()?;
    Ok((format, raw_signature))
}

pub fn encode_failure() -> Vec<u8> {
    vec![SSH_AGENT_FAILURE]
}
