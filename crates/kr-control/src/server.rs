//! Router assembly and the Unix-socket accept loop (spec.md §4.7: "the
//! control server is *not* a remote surface; it MUST bind only to
//! process-local transports").
//!
//! One `Router<Arc<AppState>>`, `.with_state` once, served over
//! `hyper-util`'s `TowerToHyperService` + `tokio::net::UnixListener` instead
//! of a TCP listener, with a connection-per-task accept loop.

use std::io;
use std::sync::Arc;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::service::TowerToHyperService;
use kr_enclave::Enclave;
use tokio::net::UnixListener;
use tracing::warn;

use crate::routes;

pub struct AppState {
    pub enclave: Arc<Enclave>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    routes::router().with_state(state)
}

/// Accept connections on `listener` forever, each served by its own task.
/// Returns only if the listener itself errors out; per-connection errors are
/// logged and otherwise swallowed, so one bad client can't take down the
/// server.
pub async fn serve_unix(listener: UnixListener, router: Router) -> io::Result<()> {
    let hyper_service = TowerToHyperService::new(router);
    loop {
        let (stream, _addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let hyper_service = hyper_service.clone();
        tokio::spawn(async move {
            if let Err(e) = AutoBuilder::new(TokioExecutor::new()).serve_connection(io, hyper_service).await {
                warn!(error = %e, "control server connection ended with an error");
            }
        });
    }
}
