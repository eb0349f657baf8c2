//! In-memory fake relay, used by `kr-enclave`'s test suite and anywhere
//! else that needs a `Transport` without a real network.
//!
//! Models the relay from the outside: `send`/`push_alert` append to an
//! "outbound" queue a test can inspect (what the phone would have
//! received), and a test drives the "phone's" behavior by pushing encoded
//! responses onto the inbound queue that `read` drains. FIFO order is
//! preserved per queue, matching the real relay's contract.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use kr_common::model::PairingSecret;
use tokio::sync::{Mutex, Notify};

use crate::{Transport, TransportError};

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub ciphertext: Vec<u8>,
    pub alert_prompt: Option<String>,
}

struct Inner {
    inbound: VecDeque<Vec<u8>>,
    outbound: Vec<OutboundMessage>,
    queues_exist: bool,
    /// When set, `read`/`send`/`push_alert` all fail with this error —
    /// lets tests exercise the transient/auth retry paths in `kr-enclave`.
    fail_with: Option<TransportError>,
}

/// An in-memory stand-in for the relay. Cheap to clone (`Arc` inside).
#[derive(Clone)]
pub struct InMemoryTransport {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                inbound: VecDeque::new(),
                outbound: Vec::new(),
                queues_exist: false,
                fail_with: None,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Test hook: enqueue a ciphertext as if the phone had sent it.
    pub async fn push_inbound(&self, ciphertext: Vec<u8>) {
        let mut inner = self.inner.lock().await;
        inner.inbound.push_back(ciphertext);
        self.notify.notify_waiters();
    }

    /// Test hook: drain everything sent to the phone so far.
    pub async fn drain_outbound(&self) -> Vec<OutboundMessage> {
        let mut inner = self.inner.lock().await;
        std::mem::take(&mut inner.outbound)
    }

    /// Test hook: make every subsequent call fail with `error` until cleared.
    pub async fn fail_with(&self, error: Option<TransportError>) {
        self.inner.lock().await.fail_with = error;
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn create_queues(&self, _secret: &PairingSecret) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if let Some(err) = inner.fail_with.clone() {
            return Err(err);
        }
        inner.queues_exist = true;
        Ok(())
    }

    async fn delete_queues(&self, _secret: &PairingSecret) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if let Some(err) = inner.fail_with.clone() {
            return Err(err);
        }
        inner.queues_exist = false;
        inner.inbound.clear();
        inner.outbound.clear();
        Ok(())
    }

    async fn send(&self, _secret: &PairingSecret, ciphertext: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if let Some(err) = inner.fail_with.clone() {
            return Err(err);
        }
        inner.outbound.push(OutboundMessage { ciphertext: ciphertext.to_vec(), alert_prompt: None });
        Ok(())
    }

    async fn push_alert(
        &self,
        _secret: &PairingSecret,
        prompt_text: &str,
        ciphertext: &[u8],
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if let Some(err) = inner.fail_with.clone() {
            return Err(err);
        }
        inner.outbound.push(OutboundMessage {
            ciphertext: ciphertext.to_vec(),
            alert_prompt: Some(prompt_text.to_owned()),
        });
        Ok(())
    }

    async fn read(&self, _secret: &PairingSecret) -> Result<Vec<Vec<u8>>, TransportError> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(err) = inner.fail_with.clone() {
                    return Err(err);
                }
                if !inner.inbound.is_empty() {
                    return Ok(inner.inbound.drain(..).collect());
                }
            }
            // Long-poll: wait for a push or a short tick, whichever first,
            // so a fake relay with nothing queued doesn't spin the CPU.
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
            }
        }
    }
}
