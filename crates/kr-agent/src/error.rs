use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed ssh-agent payload: {0}")]
    MalformedPayload(String),
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),
}
