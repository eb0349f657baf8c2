use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("fifo I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fifo creation failed: {0}")]
    Mkfifo(#[from] nix::Error),
}
