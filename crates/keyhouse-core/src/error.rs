//! Error Types for KeyHouse
//!
//! Every fallible operation in the workspace returns `Result<T>` aliased to
//! `Result<T, KvError>`. A `KvError` pairs one of six abstract kinds with a
//! human-readable message; the kinds map onto the canonical wire codes used
//! in per-key and per-partition `status` fields.
//!
//! ## Kinds
//!
//! - `InvalidArgument` (3): malformed request, bad encoding, wrong arg type
//! - `DeadlineExceeded` (4): UDF or RPC timeout
//! - `NotFound` (5): key absent from the cache (per-key, not request-level)
//! - `PermissionDenied` (7): HPKE decryption failed, unknown key id
//! - `Internal` (13): invariant violation, skipped records, bad UDF output
//! - `Unavailable` (14): remote shard unreachable or key not yet loaded
//!
//! ## Propagation
//!
//! Per-key failures ride inline in lookup responses and never fail the
//! partition. Per-partition failures (UDF errors) fail that partition only.
//! Request-level failures surface as an inner Binary HTTP status while the
//! outer transport still succeeds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Abstract failure kinds, with canonical wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    PermissionDenied,
    Internal,
    Unavailable,
}

impl ErrorKind {
    /// Canonical numeric code carried in wire-level `status` fields.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => 3,
            ErrorKind::DeadlineExceeded => 4,
            ErrorKind::NotFound => 5,
            ErrorKind::PermissionDenied => 7,
            ErrorKind::Internal => 13,
            ErrorKind::Unavailable => 14,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            3 => ErrorKind::InvalidArgument,
            4 => ErrorKind::DeadlineExceeded,
            5 => ErrorKind::NotFound,
            7 => ErrorKind::PermissionDenied,
            14 => ErrorKind::Unavailable,
            _ => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::DeadlineExceeded => "DeadlineExceeded",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::Internal => "Internal",
            ErrorKind::Unavailable => "Unavailable",
        };
        f.write_str(name)
    }
}

/// The workspace-wide error type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct KvError {
    pub kind: ErrorKind,
    pub message: String,
}

impl KvError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The wire-level status representation of this error.
    pub fn to_status(&self) -> Status {
        Status {
            code: self.kind.code(),
            message: self.message.clone(),
        }
    }
}

impl From<serde_json::Error> for KvError {
    fn from(err: serde_json::Error) -> Self {
        KvError::invalid_argument(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KvError>;

/// Wire-level status, embedded in lookup values and partition outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Status {
            code: 0,
            message: "ok".to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl From<KvError> for Status {
    fn from(err: KvError) -> Self {
        err.to_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_roundtrip() {
        for kind in [
            ErrorKind::InvalidArgument,
            ErrorKind::DeadlineExceeded,
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::Internal,
            ErrorKind::Unavailable,
        ] {
            assert_eq!(ErrorKind::from_code(kind.code()), kind);
        }
    }

    #[test]
    fn test_unknown_code_maps_to_internal() {
        assert_eq!(ErrorKind::from_code(0), ErrorKind::Internal);
        assert_eq!(ErrorKind::from_code(99), ErrorKind::Internal);
    }

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = KvError::internal("Skipped some records");
        assert_eq!(err.to_string(), "Internal: Skipped some records");
    }

    #[test]
    fn test_to_status() {
        let status = KvError::not_found("Key not found").to_status();
        assert_eq!(status.code, 5);
        assert_eq!(status.message, "Key not found");
        assert!(!status.is_ok());
    }

    #[test]
    fn test_status_serde_shape() {
        let status = Status {
            code: 13,
            message: "UDF execution error".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["code"], 13);
        assert_eq!(json["message"], "UDF execution error");
    }

    #[test]
    fn test_status_message_defaults_empty() {
        let status: Status = serde_json::from_str(r#"{"code":5}"#).unwrap();
        assert_eq!(status.code, 5);
        assert_eq!(status.message, "");
    }
}
