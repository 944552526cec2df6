use thiserror::Error;

pub type Result<T> = std::result::Result<T, CairnError>;

#[derive(Debug, Error)]
pub enum CairnError {
    #[error("invalid parameter: {0}")]
    InvalidParams(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("decryption failed: wrong passphrase")]
    WrongKey,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),

    #[error("repository is locked by another process (lock: {0})")]
    Locked(String),

    #[error("repository not found at '{0}'")]
    RepoNotFound(String),

    #[error("repository already exists at '{0}'")]
    RepoAlreadyExists(String),

    #[error("packfile is full")]
    PackfileFull,

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl CairnError {
    /// Whether a retry at the repository level may succeed.
    /// Only backend I/O failures are transient; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            CairnError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}
