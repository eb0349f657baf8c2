//! Host-auth socket listener (spec.md §5 `HostAuth listener` task, §6): the
//! one task that accepts connections from `kr-shim`, decodes exactly one
//! JSON `HostAuth` per connection, and delivers it to the enclave.
//!
//! Shaped like `kr-agent::agent::AgentServer::serve`'s accept loop, but each
//! connection carries a single value rather than a request/response
//! sequence — spec.md §6: "no framing beyond 'one JSON value per
//! connection'; connection close ends the message."

use std::sync::Arc;

use kr_common::model::HostAuth;
use kr_enclave::Enclave;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

/// Accept connections from `listener` forever, one task per connection.
/// Returns only if the listener itself errors out.
pub async fn serve(listener: UnixListener, enclave: Arc<Enclave>) -> std::io::Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let enclave = Arc::clone(&enclave);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, enclave).await {
                debug!(error = %e, "host-auth connection ended without a usable HostAuth");
            }
        });
    }
}

async fn handle_connection(mut stream: UnixStream, enclave: Arc<Enclave>) -> std::io::Result<()> {
    let mut body = Vec::new();
    stream.read_to_end(&mut body).await?;

    let host_auth: HostAuth = match serde_json::from_slice(&body) {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, "malformed HostAuth on the host-auth socket");
            return Ok(());
        }
    };

    // spec.md §4.8/§3: the correlation key is derived from the captured
    // signature payload, not the true SSH session id the shim cannot
    // observe (see DESIGN.md).
    let session_id_key = kr_common::session::session_id_key(&host_auth.signature);
    enclave.deliver_host_auth(session_id_key, host_auth).await;
    Ok(())
}
