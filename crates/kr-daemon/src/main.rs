//! `kr-daemon`: the binary wiring pairing, transport, persistence, the
//! enclave, the ssh-agent adapter, the control server, and the host-auth
//! listener into one running process (spec.md §5): build each service's
//! state/router, then run all of them concurrently and propagate the first
//! failure.

mod hostauth;

use std::path::Path;
use std::sync::Arc;

use kr_agent::AgentServer;
use kr_common::timeouts::Timeouts;
use kr_control::{build_router, serve_unix, AppState};
use kr_enclave::Enclave;
use kr_notify::Notifier;
use kr_persistence::FilesystemStore;
use kr_transport::HttpRelayTransport;
use tokio::net::UnixListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = kr_common::config::init();
    kr_common::logging::init(config.log_syslog);

    tracing::info!("starting kr-daemon");

    let store = Arc::new(FilesystemStore::new(&config.state_dir)?);
    let transport = Arc::new(HttpRelayTransport::new(config.relay_url.clone()));
    let enclave = Enclave::new(transport, store, Timeouts::defaults()).await;
    enclave.start();

    let notifier = Arc::new(Notifier::new(&config.notify_path)?);
    let agent = AgentServer::new(Arc::clone(&enclave), config.upstream_agent_sock.clone(), notifier);

    let control_router = build_router(Arc::new(AppState { enclave: Arc::clone(&enclave) }));

    let control_listener = bind_unix_listener(&config.control_sock)?;
    let agent_listener = bind_unix_listener(&config.agent_sock)?;
    let hostauth_listener = bind_unix_listener(&config.hostauth_sock)?;

    tracing::info!(
        control = %config.control_sock.display(),
        agent = %config.agent_sock.display(),
        hostauth = %config.hostauth_sock.display(),
        "listening",
    );

    tokio::try_join!(
        async move { serve_unix(control_listener, control_router).await.map_err(anyhow::Error::from) },
        async move { agent.serve(agent_listener).await.map_err(anyhow::Error::from) },
        async move { hostauth::serve(hostauth_listener, enclave).await.map_err(anyhow::Error::from) },
    )?;

    Ok(())
}

/// Bind a Unix socket at `path`, removing a stale socket file left behind
/// by a previous run (a crash, or `kill -9`) first.
fn bind_unix_listener(path: &Path) -> std::io::Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    UnixListener::bind(path)
}
