//! Reference relay client over generic polling/push HTTP endpoints.
//!
//! A `reqwest` client with a fixed base URL, one method per relay
//! operation, errors mapped onto this crate's error type rather than
//! leaking `reqwest::Error`. The real product points this at a specific
//! cloud queue service; since that SDK is out of scope (spec.md §1, §9),
//! this client instead speaks a small generic protocol any store-and-forward
//! relay can implement:
//!
//! - `PUT  {base}/queues/{queue_uuid}` — create queue pair
//! - `DELETE {base}/queues/{queue_uuid}` — delete queue pair
//! - `POST {base}/queues/{queue_uuid}/outbound` — body = base64 ciphertext,
//!   optional `?alert=<prompt>` to request a push wakeup
//! - `GET  {base}/queues/{queue_uuid}/inbound` — long-poll, returns a JSON
//!   array of base64 ciphertexts

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use kr_common::model::PairingSecret;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{Transport, TransportError};

pub struct HttpRelayTransport {
    base_url: String,
    http: Client,
}

impl HttpRelayTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(35))
            .user_agent(concat!("kr-transport/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build reqwest client");
        Self { base_url: base_url.into(), http }
    }

    fn queue_url(&self, secret: &PairingSecret, suffix: &str) -> String {
        format!("{}/queues/{}{}", self.base_url, secret.queue_uuid, suffix)
    }

    fn classify(status: StatusCode, body: String) -> TransportError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            TransportError::Auth(body)
        } else {
            TransportError::Transient(body)
        }
    }
}

#[derive(Deserialize)]
struct InboundBatch {
    #[serde(default)]
    messages: Vec<String>,
}

#[async_trait]
impl Transport for HttpRelayTransport {
    async fn create_queues(&self, secret: &PairingSecret) -> Result<(), TransportError> {
        let resp = self
            .http
            .put(self.queue_url(secret, ""))
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }
        Ok(())
    }

    async fn delete_queues(&self, secret: &PairingSecret) -> Result<(), TransportError> {
        let resp = self
            .http
            .delete(self.queue_url(secret, ""))
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }
        Ok(())
    }

    async fn send(&self, secret: &PairingSecret, ciphertext: &[u8]) -> Result<(), TransportError> {
        let resp = self
            .http
            .post(self.queue_url(secret, "/outbound"))
            .body(B64.encode(ciphertext))
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }
        Ok(())
    }

    async fn push_alert(
        &self,
        secret: &PairingSecret,
        prompt_text: &str,
        ciphertext: &[u8],
    ) -> Result<(), TransportError> {
        let url = format!(
            "{}?alert={}",
            self.queue_url(secret, "/outbound"),
            urlencode(prompt_text)
        );
        let resp = self
            .http
            .post(url)
            .body(B64.encode(ciphertext))
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }
        Ok(())
    }

    async fn read(&self, secret: &PairingSecret) -> Result<Vec<Vec<u8>>, TransportError> {
        let resp = self
            .http
            .get(self.queue_url(secret, "/inbound"))
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }
        let batch: InboundBatch = resp
            .json()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        batch
            .messages
            .into_iter()
            .map(|m| B64.decode(&m).map_err(|e| TransportError::Transient(e.to_string())))
            .collect()
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
