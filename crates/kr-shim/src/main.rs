//! `kr-shim` (spec.md §4.8, C8): the binary `ssh`'s `ProxyCommand` invokes as
//! `kr-shim <host> <port>`. Forwards stdin/stdout to a plain TCP connection
//! the same way an `ssh -W` "netcat" ProxyCommand would, while sniffing the
//! plaintext key-exchange reply for `(host_key, signature)` to hand to the
//! daemon, and watching the notifier for a reason to tear the connection
//! down early.
//!
//! Stateless between invocations (spec.md §4.8): everything this process
//! learns lives only in memory for the lifetime of one proxied connection.

mod error;
mod packet;

use std::path::{Path, PathBuf};

use kr_common::model::HostAuth;
use kr_notify::Listener;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ShimError;
use crate::packet::KexSniffer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = kr_common::config::init();
    kr_common::logging::init(config.log_syslog);

    let mut args = std::env::args().skip(1);
    let host = args.next().ok_or(ShimError::BadUsage)?;
    let port: u16 = args.next().ok_or(ShimError::BadUsage)?.parse().map_err(|_| ShimError::BadUsage)?;

    let remote = TcpStream::connect((host.as_str(), port)).await?;
    let (remote_read, mut remote_write) = remote.into_split();

    let (host_auth_tx, mut host_auth_rx) = mpsc::unbounded_channel();
    let mut sniffed = KexSniffer::new(remote_read, vec![host.clone()], host_auth_tx);

    let cancel = CancellationToken::new();

    let hostauth_sock = config.hostauth_sock.clone();
    let notify_path = config.notify_path.clone();
    let cancel_for_delivery = cancel.clone();
    tokio::spawn(async move {
        while let Some(host_auth) = host_auth_rx.recv().await {
            if let Err(e) = deliver_host_auth(&hostauth_sock, &host_auth).await {
                warn!(error = %e, "failed to deliver host-auth to the daemon");
                continue;
            }
            // spec.md §4.8: "this session's signature prefix" — see
            // DESIGN.md for why this is derived from the captured
            // signature rather than the true SSH session id.
            let prefix = kr_common::session::session_id_key(&host_auth.signature);
            spawn_kill_subscription(notify_path.clone(), prefix, cancel_for_delivery.clone());
        }
    });

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    tokio::select! {
        _ = cancel.cancelled() => {}
        res = tokio::io::copy(&mut stdin, &mut remote_write) => { res?; }
        res = tokio::io::copy(&mut sniffed, &mut stdout) => { res?; }
    }

    Ok(())
}

/// Deliver one `HostAuth` to the daemon's host-auth socket: connect, write
/// exactly one JSON value, close (spec.md §6: "no framing beyond 'one JSON
/// value per connection'; connection close ends the message").
async fn deliver_host_auth(sock: &Path, host_auth: &HostAuth) -> std::io::Result<()> {
    let mut stream = UnixStream::connect(sock).await?;
    let body = serde_json::to_vec(host_auth)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&body).await?;
    stream.shutdown().await
}

/// Tail the notifier for `STOP`/`REJECTED`/`HOST_KEY_MISMATCH` tagged
/// `prefix`, and cancel the proxy loop on the first one (spec.md §4.8).
fn spawn_kill_subscription(notify_path: PathBuf, prefix: String, cancel: CancellationToken) {
    tokio::spawn(async move {
        let listener = match Listener::open(&notify_path) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "failed to open notifier fifo");
                return;
            }
        };
        let mut sub = listener.subscribe(Some(prefix));
        while let Some(line) = sub.recv().await {
            if matches!(line.as_str(), kr_notify::STOP | kr_notify::REJECTED | kr_notify::HOST_KEY_MISMATCH) {
                cancel.cancel();
                return;
            }
        }
    });
}
