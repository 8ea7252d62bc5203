//! Error types for the fingerprint index engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("fingerprint not found: {0}")]
    FingerprintNotFound(u32),

    #[error("fingerprint id out of range: {0}")]
    FingerprintIdOutOfRange(u64),

    #[error("version mismatch: expected {expected}, current {current}")]
    VersionMismatch { expected: u64, current: u64 },

    #[error("corrupt segment {0}: {1}")]
    CorruptSegment(String, String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("shutting down")]
    ShuttingDown,

    #[error("bad index name: {0}")]
    BadIndexName(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("wal full")]
    WalFull,
}

impl IndexError {
    /// Error code used as the machine-readable HTTP body tag and for
    /// picking the response status in the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::IndexNotFound(_) => "INDEX_NOT_FOUND",
            IndexError::IndexAlreadyExists(_) => "INDEX_ALREADY_EXISTS",
            IndexError::FingerprintNotFound(_) => "FINGERPRINT_NOT_FOUND",
            IndexError::FingerprintIdOutOfRange(_) => "FINGERPRINT_ID_OUT_OF_RANGE",
            IndexError::VersionMismatch { .. } => "VERSION_MISMATCH",
            IndexError::CorruptSegment(_, _) => "CORRUPT_SEGMENT",
            IndexError::Io(_) => "IO_ERROR",
            IndexError::MsgpackEncode(_) | IndexError::MsgpackDecode(_) => "IO_ERROR",
            IndexError::Json(_) => "BAD_REQUEST",
            IndexError::DeadlineExceeded => "DEADLINE_EXCEEDED",
            IndexError::ShuttingDown => "SHUTTING_DOWN",
            IndexError::BadIndexName(_) => "BAD_INDEX_NAME",
            IndexError::BadRequest(_) => "BAD_REQUEST",
            IndexError::WalFull => "IO_ERROR",
        }
    }

    /// HTTP status code this error maps to (§7 disposition column).
    pub fn status(&self) -> u16 {
        match self {
            IndexError::IndexNotFound(_) => 404,
            IndexError::IndexAlreadyExists(_) => 409,
            IndexError::FingerprintNotFound(_) => 404,
            IndexError::FingerprintIdOutOfRange(_) => 400,
            IndexError::VersionMismatch { .. } => 409,
            IndexError::CorruptSegment(_, _) => 500,
            IndexError::Io(_) | IndexError::MsgpackEncode(_) | IndexError::MsgpackDecode(_) => 500,
            IndexError::Json(_) => 400,
            IndexError::DeadlineExceeded => 200, // partial result, not an error to the caller
            IndexError::ShuttingDown => 503,
            IndexError::BadIndexName(_) => 400,
            IndexError::BadRequest(_) => 400,
            IndexError::WalFull => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_kind() {
        assert_eq!(IndexError::IndexNotFound("t1".into()).code(), "INDEX_NOT_FOUND");
        assert_eq!(
            IndexError::VersionMismatch { expected: 1, current: 2 }.code(),
            "VERSION_MISMATCH"
        );
    }

    #[test]
    fn status_matches_disposition() {
        assert_eq!(IndexError::FingerprintNotFound(7).status(), 404);
        assert_eq!(IndexError::VersionMismatch { expected: 1, current: 2 }.status(), 409);
        assert_eq!(IndexError::ShuttingDown.status(), 503);
    }
}
