//! Reader side of the notifier (spec.md §4.9): tails the fifo and
//! demultiplexes by `[prefix]`, fanning out in-process to however many
//! subscribers actually want a given line via a `broadcast::channel` — one
//! source, many listeners — just sourced from a fifo instead of an
//! in-memory event.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::NotifyError;
use crate::line::parse_line;

const HUB_CAPACITY: usize = 256;

#[derive(Clone)]
struct Line {
    prefix: Option<String>,
    body: String,
}

/// Owns the single real reader of one fifo; hands out in-process
/// subscriptions filtered by prefix.
pub struct Listener {
    hub: broadcast::Sender<Line>,
    _reader_task: tokio::task::JoinHandle<()>,
}

impl Listener {
    /// Start tailing the fifo at `path`, creating it if necessary.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, NotifyError> {
        let path = path.into();
        match mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR) {
            Ok(()) => {}
            Err(nix::Error::EEXIST) => {}
            Err(e) => return Err(NotifyError::Mkfifo(e)),
        }

        let (hub, _) = broadcast::channel(HUB_CAPACITY);
        let hub_for_task = hub.clone();
        let blocking_task = tokio::task::spawn_blocking(move || read_loop(&path, hub_for_task));
        let reader_task = tokio::spawn(async move {
            if let Err(e) = blocking_task.await {
                warn!(error = %e, "notifier reader task panicked");
            }
        });

        Ok(Self { hub, _reader_task: reader_task })
    }

    /// Subscribe to lines tagged `prefix`, plus any unprefixed ("to all")
    /// line. A `None` filter receives only unprefixed lines.
    pub fn subscribe(&self, prefix: Option<String>) -> Subscription {
        Subscription { prefix, rx: self.hub.subscribe() }
    }
}

/// One subscriber's filtered view of the notifier stream.
pub struct Subscription {
    prefix: Option<String>,
    rx: broadcast::Receiver<Line>,
}

impl Subscription {
    /// Wait for the next line addressed to this subscription, skipping
    /// lines meant for other prefixes.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(line) => {
                    let delivered = match (&line.prefix, &self.prefix) {
                        (None, _) => true,
                        (Some(p), Some(mine)) => p == mine,
                        (Some(_), None) => false,
                    };
                    if delivered {
                        return Some(line.body);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Blocking fifo tail loop, run on a `spawn_blocking` thread.
///
/// Opened read-write (not read-only) so this process always holds a write
/// end too — otherwise a fifo opened `O_RDONLY` delivers `EOF` every time
/// the last writer disconnects, turning the tail into a busy-poll loop.
fn read_loop(path: &Path, hub: broadcast::Sender<Line>) {
    let file = match std::fs::OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to open notifier fifo for reading");
            return;
        }
    };
    let mut reader = std::io::BufReader::new(file);
    let mut buf = String::new();
    loop {
        buf.clear();
        match reader.read_line(&mut buf) {
            Ok(0) => continue,
            Ok(_) => {
                let trimmed = buf.trim_end_matches('\n');
                let (prefix, body) = parse_line(trimmed);
                let _ = hub.send(Line { prefix: prefix.map(str::to_string), body: body.to_string() });
            }
            Err(e) => {
                warn!(error = %e, "notifier fifo read error, stopping tail");
                return;
            }
        }
    }
}
