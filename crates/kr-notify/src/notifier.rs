//! Writer side of the notifier (spec.md §4.9): the daemon publishes
//! sentinel lines that the shim, tailing the same fifo, reacts to.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::error::NotifyError;
use crate::line::format_line;

/// A handle to a named-fifo notifier. Construction ensures the fifo exists;
/// publishing never blocks the caller on an absent reader.
pub struct Notifier {
    path: PathBuf,
}

impl Notifier {
    /// Ensure the fifo at `path` exists, creating it `0600` if not.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, NotifyError> {
        let path = path.into();
        match mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR) {
            Ok(()) => {}
            Err(nix::Error::EEXIST) => {}
            Err(e) => return Err(NotifyError::Mkfifo(e)),
        }
        Ok(Self { path })
    }

    /// Publish one line, optionally tagged with `prefix` (spec.md §4.9,
    /// §4.6's "kill this session" notification). If no reader currently has
    /// the fifo open, the line is dropped silently rather than blocking the
    /// caller — matches the fire-and-forget treatment of `push_alert`/the
    /// heartbeat elsewhere in this codebase.
    pub async fn publish(&self, prefix: Option<&str>, body: &str) -> Result<(), NotifyError> {
        let line = format_line(prefix, body);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_line_nonblocking(&path, &line))
            .await
            .expect("blocking publish task panicked")
    }
}

fn write_line_nonblocking(path: &Path, line: &str) -> Result<(), NotifyError> {
    let opened = std::fs::OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path);

    let mut file = match opened {
        Ok(f) => f,
        // No reader has the fifo open yet (ENXIO on a nonblocking writer
        // open): nothing to deliver to, drop the line.
        Err(e) if e.raw_os_error() == Some(libc::ENXIO) => return Ok(()),
        Err(e) => return Err(NotifyError::Io(e)),
    };

    writeln!(file, "{line}").map_err(NotifyError::Io)
}
