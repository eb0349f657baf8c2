//! Handlers for the five endpoints spec.md §4.7 names. Each is a thin
//! `Router<Arc<AppState>>` handler: extract state, call into the enclave,
//! map the result to a JSON body.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use kr_common::model::{MeResponseBody, PairingToken, Profile, Request, RequestKind, Response};
use serde::Deserialize;

use crate::error::ControlError;
use crate::server::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/version", get(version))
        .route("/pair", put(pair).get(get_pair).delete(unpair))
        .route("/enclave", put(enclave))
        .route("/ping", get(ping))
}

/// Version string reported by `GET /version`: the *protocol* version the
/// CLI negotiates against, not the crate version.
async fn version() -> String {
    kr_codec::PROTOCOL_VERSION.to_string()
}

async fn ping() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct PairingOptions {
    pub workstation_name: String,
}

/// `PUT /pair` hands the CLI exactly the QR-code payload (spec.md §4.1
/// `wire_representation`), never the raw `PairingSecret`: `workstation_secret_key`
/// never leaves the daemon (see DESIGN.md's Open Question on the §8
/// no-`symmetric_key`-over-the-control-surface invariant for why
/// `symmetric_key` itself is still present here).
async fn pair(
    State(state): State<Arc<AppState>>,
    Json(opts): Json<PairingOptions>,
) -> Result<Json<PairingToken>, ControlError> {
    let secret = state.enclave.pair(opts.workstation_name).await?;
    Ok(Json(kr_pairing::wire_representation(&secret)))
}

#[derive(Debug, serde::Serialize)]
struct ProfileResponse {
    ssh_wire_public_key_base64: String,
    email: String,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
        Self { ssh_wire_public_key_base64: B64.encode(&profile.ssh_wire_public_key), email: profile.email }
    }
}

async fn get_pair(State(state): State<Arc<AppState>>) -> Result<Json<ProfileResponse>, ControlError> {
    let profile = state.enclave.await_pairing_confirmation().await.map_err(|e| match e {
        kr_enclave::EnclaveError::NotPaired | kr_enclave::EnclaveError::Timeout => ControlError::NotPaired,
        other => ControlError::Enclave(other),
    })?;
    Ok(Json(profile.into()))
}

async fn unpair(State(state): State<Arc<AppState>>) -> Result<StatusCode, ControlError> {
    state.enclave.unpair().await?;
    Ok(StatusCode::OK)
}

async fn enclave(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Request>,
) -> Result<Json<Response>, ControlError> {
    let kind = req.kind().ok_or_else(|| ControlError::BadRequest("request body must set exactly one of the one-of fields".into()))?;

    let response = match kind {
        RequestKind::Me => {
            let profile = state.enclave.await_pairing_confirmation().await?;
            Response {
                request_id: req.request_id,
                me_response: Some(MeResponseBody {
                    ssh_wire_public_key: base64_encode(&profile.ssh_wire_public_key),
                    email: profile.email,
                }),
                sign_response: None,
                tracking_id: None,
                approved_until: None,
                sns_endpoint_arn: None,
                enclave_version: None,
            }
        }
        RequestKind::Sign => {
            let sign_request = req.sign_request.clone().expect("RequestKind::Sign implies sign_request is Some");
            let session_id_key = String::new();
            let (response, _enclave_version) = state
                .enclave
                .request_signature(sign_request, session_id_key, || "Approve request?".to_string())
                .await?;
            response
        }
        RequestKind::GitSign | RequestKind::Hosts | RequestKind::NoOp => {
            state.enclave.request_passthrough(req, || "Approve request?".to_string()).await?
        }
        RequestKind::Unpair => {
            state.enclave.unpair().await?;
            Response {
                request_id: req.request_id,
                me_response: None,
                sign_response: None,
                tracking_id: None,
                approved_until: None,
                sns_endpoint_arn: None,
                enclave_version: None,
            }
        }
    };

    Ok(Json(response))
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    B64.encode(bytes)
}
