//! Error types for minidfs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Membership ===
    #[error("namespace epoch mismatch: coordinator has {expected}, caller has {actual}")]
    EpochMismatch { expected: i64, actual: i64 },

    #[error("data server {0} is not registered")]
    Unregistered(String),

    // === Namespace ===
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    // === Commands ===
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    // === Storage ===
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch for block {block_id}: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        block_id: String,
        stored: u32,
        computed: u32,
    },

    #[error("block {0} holds no data lines")]
    EmptyBlock(String),

    #[error("block {0} not held on this server")]
    BlockNotFound(String),

    // === Network ===
    #[error("network failure: {0}")]
    Network(String),

    #[error("rpc failed: {0}")]
    Rpc(String),

    // === Config ===
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is it worth retrying this error after a delay?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Rpc(_))
    }

    /// Convert to a gRPC status so the taxonomy survives the wire.
    pub fn into_status(self) -> tonic::Status {
        use tonic::Code;
        let code = match &self {
            Error::EpochMismatch { .. } | Error::Unregistered(_) => Code::FailedPrecondition,
            Error::NotFound(_) | Error::BlockNotFound(_) => Code::NotFound,
            Error::NotADirectory(_) | Error::InvalidPath(_) | Error::InvalidConfig(_) => {
                Code::InvalidArgument
            }
            Error::AlreadyExists(_) => Code::AlreadyExists,
            Error::UnsupportedCommand(_) => Code::Unimplemented,
            Error::ChecksumMismatch { .. } => Code::DataLoss,
            Error::EmptyBlock(_) => Code::OutOfRange,
            Error::Network(_) | Error::Rpc(_) => Code::Unavailable,
            Error::Io(_) | Error::Other(_) => Code::Internal,
        };
        tonic::Status::new(code, self.to_string())
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Rpc(format!("{}: {}", status.code(), status.message()))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("json: {}", e))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

/// Did this RPC status come from an epoch fence?
pub fn is_epoch_mismatch(status: &tonic::Status) -> bool {
    status.code() == tonic::Code::FailedPrecondition && status.message().contains("epoch mismatch")
}
