//! # kr-codec
//!
//! Encode/decode `Request`/`Response` envelopes (spec.md §4.3). Purely
//! functional: no I/O, no globals, no clock reads. Unknown JSON fields are
//! ignored on decode (`serde`'s default behavior for structs without
//! `deny_unknown_fields`), so older/newer peers can add fields without
//! breaking each other.

use kr_common::model::{Request, Response};
use thiserror::Error;

/// The protocol version this build of `kr` speaks. Bumped whenever a wire
/// field is added that older peers must not choke on.
pub const PROTOCOL_VERSION: u32 = 2;

/// Enclave/phone-side protocol versions from this value onward support
/// requesting RSA-SHA2-256/512 signatures (spec.md §4.5, §9 Open Questions).
/// The capability check is preserved verbatim but the exact version
/// boundary is unspecified; `2` is this implementation's choice, recorded
/// in DESIGN.md.
pub const MIN_VERSION_RSA_SHA2: u32 = 2;

/// Does an enclave/phone at protocol version `enclave_version` support
/// RSA-SHA2-256/512 signature formats?
pub fn supports_rsa_sha2(enclave_version: u32) -> bool {
    enclave_version >= MIN_VERSION_RSA_SHA2
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope carries zero or more than one body variant")]
    AmbiguousBody,
}

/// Encode a `Request` to its canonical JSON wire form.
pub fn encode_request(req: &Request) -> Result<Vec<u8>, CodecError> {
    if req.kind().is_none() {
        return Err(CodecError::AmbiguousBody);
    }
    Ok(serde_json::to_vec(req)?)
}

/// Decode a `Request` from JSON bytes, rejecting envelopes that don't carry
/// exactly one body variant.
pub fn decode_request(bytes: &[u8]) -> Result<Request, CodecError> {
    let req: Request = serde_json::from_slice(bytes)?;
    if req.kind().is_none() {
        return Err(CodecError::AmbiguousBody);
    }
    Ok(req)
}

/// Encode a `Response` to its canonical JSON wire form.
pub fn encode_response(resp: &Response) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(resp)?)
}

/// Decode a `Response` from JSON bytes. Unlike `Request`, a `Response` with
/// no body is valid (an ack-only `no_op` acknowledgment, or a bare
/// `approved_until` update), so no body-arity check is applied here.
pub fn decode_response(bytes: &[u8]) -> Result<Response, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}
