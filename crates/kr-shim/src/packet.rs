//! KEX-reply packet sniffer (spec.md §4.8): wraps the server->client half of
//! the proxied TCP stream in an `AsyncRead` adapter that watches the plain
//! SSH binary-packet framing for the key-exchange reply and extracts
//! `(host_key, signature)`, without buffering or delaying the bytes it
//! passes through to `tokio::io::copy`.
//!
//! Grounded in the same "wrap one stream half in a thin adapter that
//! inspects, never blocks" shape as `kr-agent::wire::Reader` reads a
//! length-prefixed structure, generalized here to run incrementally across
//! however many `poll_read` calls it takes for a full packet to arrive.

use std::pin::Pin;
use std::task::{Context, Poll};

use kr_common::model::HostAuth;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc::UnboundedSender;

/// SSH key-exchange reply, reused by both classic Diffie-Hellman
/// (`diffie-hellman-group*`) and elliptic-curve (`curve25519-sha256`, ...)
/// methods — the message number is shared, and both encode the same three
/// length-prefixed fields after it: host key blob, the method's ephemeral
/// public value, and the signature.
const SSH_MSG_KEXDH_REPLY: u8 = 31;
/// Once either side sends this, transport encryption begins; nothing after
/// it is parseable without the session keys, so sniffing stops here.
const SSH_MSG_NEWKEYS: u8 = 21;

pub struct KexSniffer<R> {
    inner: R,
    state: SniffState,
}

impl<R> KexSniffer<R> {
    pub fn new(inner: R, host_names: Vec<String>, on_host_auth: UnboundedSender<HostAuth>) -> Self {
        Self { inner, state: SniffState::new(host_names, on_host_auth) }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for KexSniffer<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if poll.is_ready() {
            this.state.feed(&buf.filled()[before..]);
        }
        poll
    }
}

struct SniffState {
    done: bool,
    ident_seen: bool,
    buf: Vec<u8>,
    host_names: Vec<String>,
    on_host_auth: UnboundedSender<HostAuth>,
}

impl SniffState {
    fn new(host_names: Vec<String>, on_host_auth: UnboundedSender<HostAuth>) -> Self {
        Self { done: false, ident_seen: false, buf: Vec::new(), host_names, on_host_auth }
    }

    /// Incorporate newly-read bytes and advance as far as a complete
    /// packet is available. Pure CPU work — never awaits, never blocks the
    /// stream it's observing.
    fn feed(&mut self, bytes: &[u8]) {
        if self.done {
            return;
        }
        self.buf.extend_from_slice(bytes);

        loop {
            if !self.ident_seen {
                let Some(eol) = find_crlf(&self.buf) else { return };
                self.buf.drain(..eol + 2);
                self.ident_seen = true;
                continue;
            }

            // uint32 packet_length, byte padding_length, then the payload.
            if self.buf.len() < 5 {
                return;
            }
            let packet_length = u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) as usize;
            if packet_length == 0 || packet_length > 256 * 1024 {
                self.done = true; // not a sane SSH packet; give up quietly
                return;
            }
            if self.buf.len() < 4 + packet_length {
                return; // wait for the rest of this packet
            }
            let padding_length = self.buf[4] as usize;
            if padding_length + 1 > packet_length {
                self.done = true;
                return;
            }
            let payload_len = packet_length - padding_length - 1;
            let payload = self.buf[5..5 + payload_len].to_vec();
            self.buf.drain(..4 + packet_length);

            match payload.first() {
                Some(&SSH_MSG_NEWKEYS) => {
                    self.done = true;
                    return;
                }
                Some(&SSH_MSG_KEXDH_REPLY) => {
                    if let Some((host_key, signature)) = parse_kexdh_reply(&payload) {
                        let _ = self.on_host_auth.send(HostAuth {
                            host_key,
                            signature,
                            host_names: self.host_names.clone(),
                        });
                    }
                    self.done = true;
                    return;
                }
                _ => continue,
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse `SSH_MSG_KEXDH_REPLY`/`SSH_MSG_KEX_ECDH_REPLY`: one message-type
/// byte followed by three length-prefixed fields (host key, the method's
/// ephemeral value, signature). We only need the first and third.
fn parse_kexdh_reply(payload: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut pos = 1; // skip message type
    let host_key = read_string(payload, &mut pos)?;
    let _ephemeral = read_string(payload, &mut pos)?;
    let signature = read_string(payload, &mut pos)?;
    Some((host_key, signature))
}

fn read_string(buf: &[u8], pos: &mut usize) -> Option<Vec<u8>> {
    let len = u32::from_be_bytes(buf.get(*pos..*pos + 4)?.try_into().ok()?) as usize;
    let start = *pos + 4;
    let bytes = buf.get(start..start + len)?.to_vec();
    *pos = start + len;
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn encode_kexdh_reply(host_key: &[u8], ephemeral: &[u8], signature: &[u8]) -> Vec<u8> {
        let mut payload = vec![SSH_MSG_KEXDH_REPLY];
        for field in [host_key, ephemeral, signature] {
            payload.extend_from_slice(&(field.len() as u32).to_be_bytes());
            payload.extend_from_slice(field);
        }
        let padding_length: u8 = 4;
        let packet_length = 1 + payload.len() + padding_length as usize;
        let mut packet = Vec::new();
        packet.extend_from_slice(&(packet_length as u32).to_be_bytes());
        packet.push(padding_length);
        packet.extend_from_slice(&payload);
        packet.extend_from_slice(&vec![0u8; padding_length as usize]);
        packet
    }

    #[tokio::test]
    async fn extracts_host_key_and_signature_from_a_kexdh_reply() {
        let mut wire = b"SSH-2.0-OpenSSH_9.6\r\n".to_vec();
        wire.extend_from_slice(&encode_kexdh_reply(b"host-key-bytes", b"ephemeral", b"sig-bytes"));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sniffer = KexSniffer::new(wire.as_slice(), vec!["example.com".into()], tx);
        let mut sink = Vec::new();
        sniffer.read_to_end(&mut sink).await.unwrap();
        assert_eq!(sink, wire);

        let captured = rx.try_recv().unwrap();
        assert_eq!(captured.host_key, b"host-key-bytes");
        assert_eq!(captured.signature, b"sig-bytes");
        assert_eq!(captured.host_names, vec!["example.com".to_string()]);
    }

    #[tokio::test]
    async fn newkeys_before_any_reply_stops_sniffing_without_panicking() {
        let mut wire = b"SSH-2.0-OpenSSH_9.6\r\n".to_vec();
        let payload = vec![SSH_MSG_NEWKEYS];
        let padding_length: u8 = 4;
        let packet_length = 1 + padding_length as usize;
        wire.extend_from_slice(&(packet_length as u32).to_be_bytes());
        wire.push(padding_length);
        wire.extend_from_slice(&payload);
        wire.extend_from_slice(&[0u8; 4]);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sniffer = KexSniffer::new(wire.as_slice(), vec!["example.com".into()], tx);
        let mut sink = Vec::new();
        sniffer.read_to_end(&mut sink).await.unwrap();
        assert_eq!(sink, wire);
        assert!(rx.try_recv().is_err());
    }
}
