//! Error types for the SILTA bridge
//!
//! Every transport failure is translated into a [`BridgeError`] carrying
//! one canonical [`ErrorKind`], a human message, and the structured
//! details the peer attached to its status. Callers of the transport
//! adapter never see `tonic` types.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tonic_types::StatusExt;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Canonical, transport-independent error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Caller supplied an invalid argument
    InvalidArgument,
    /// Referenced entity does not exist
    NotFound,
    /// Entity already exists
    AlreadyExists,
    /// Caller lacks permission
    PermissionDenied,
    /// Quota or rate ceiling exhausted
    ResourceExhausted,
    /// System not in the required state
    FailedPrecondition,
    /// Operation aborted, typically a concurrency conflict
    Aborted,
    /// Value outside the valid range
    OutOfRange,
    /// Operation not implemented by the peer
    Unimplemented,
    /// Internal fault
    Internal,
    /// Peer unavailable, retry may help
    Unavailable,
    /// Unrecoverable data loss or corruption
    DataLoss,
    /// Missing or invalid credentials
    Unauthenticated,
    /// Deadline expired before completion
    DeadlineExceeded,
    /// Operation cancelled by the caller
    Canceled,
    /// Unclassified failure
    Unknown,
}

impl ErrorKind {
    /// Canonical SCREAMING_SNAKE_CASE name, used as the metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorKind::Aborted => "ABORTED",
            ErrorKind::OutOfRange => "OUT_OF_RANGE",
            ErrorKind::Unimplemented => "UNIMPLEMENTED",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::DataLoss => "DATA_LOSS",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorKind::Canceled => "CANCELED",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<tonic::Code> for ErrorKind {
    fn from(code: tonic::Code) -> Self {
        match code {
            tonic::Code::InvalidArgument => ErrorKind::InvalidArgument,
            tonic::Code::NotFound => ErrorKind::NotFound,
            tonic::Code::AlreadyExists => ErrorKind::AlreadyExists,
            tonic::Code::PermissionDenied => ErrorKind::PermissionDenied,
            tonic::Code::ResourceExhausted => ErrorKind::ResourceExhausted,
            tonic::Code::FailedPrecondition => ErrorKind::FailedPrecondition,
            tonic::Code::Aborted => ErrorKind::Aborted,
            tonic::Code::OutOfRange => ErrorKind::OutOfRange,
            tonic::Code::Unimplemented => ErrorKind::Unimplemented,
            tonic::Code::Internal => ErrorKind::Internal,
            tonic::Code::Unavailable => ErrorKind::Unavailable,
            tonic::Code::DataLoss => ErrorKind::DataLoss,
            tonic::Code::Unauthenticated => ErrorKind::Unauthenticated,
            tonic::Code::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            tonic::Code::Cancelled => ErrorKind::Canceled,
            _ => ErrorKind::Unknown,
        }
    }
}

impl From<ErrorKind> for tonic::Code {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::InvalidArgument => tonic::Code::InvalidArgument,
            ErrorKind::NotFound => tonic::Code::NotFound,
            ErrorKind::AlreadyExists => tonic::Code::AlreadyExists,
            ErrorKind::PermissionDenied => tonic::Code::PermissionDenied,
            ErrorKind::ResourceExhausted => tonic::Code::ResourceExhausted,
            ErrorKind::FailedPrecondition => tonic::Code::FailedPrecondition,
            ErrorKind::Aborted => tonic::Code::Aborted,
            ErrorKind::OutOfRange => tonic::Code::OutOfRange,
            ErrorKind::Unimplemented => tonic::Code::Unimplemented,
            ErrorKind::Internal => tonic::Code::Internal,
            ErrorKind::Unavailable => tonic::Code::Unavailable,
            ErrorKind::DataLoss => tonic::Code::DataLoss,
            ErrorKind::Unauthenticated => tonic::Code::Unauthenticated,
            ErrorKind::DeadlineExceeded => tonic::Code::DeadlineExceeded,
            ErrorKind::Canceled => tonic::Code::Cancelled,
            ErrorKind::Unknown => tonic::Code::Unknown,
        }
    }
}

/// One structured detail extracted from a peer status
///
/// Mirrors the `google.rpc` detail payloads, preserving provenance
/// without exposing transport types.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum ErrorDetail {
    /// Per-field validation failures
    BadRequest {
        /// `(field, description)` pairs
        field_violations: Vec<(String, String)>,
    },
    /// Identifiers for correlating the failed request
    RequestInfo {
        /// Peer-assigned request id
        request_id: String,
        /// Opaque serving data from the peer
        serving_data: String,
    },
    /// Machine-readable reason and domain
    ErrorInfo {
        /// Stable reason token
        reason: String,
        /// Logical domain, e.g. a service name
        domain: String,
        /// Additional key/value context
        metadata: HashMap<String, String>,
    },
    /// Failed preconditions
    PreconditionFailure {
        /// `(type, subject, description)` triples
        violations: Vec<(String, String, String)>,
    },
    /// Exceeded quotas
    QuotaFailure {
        /// `(subject, description)` pairs
        violations: Vec<(String, String)>,
    },
    /// Detail the bridge does not model
    Other(String),
}

/// A transport failure mapped to the canonical taxonomy
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct BridgeError {
    /// Canonical kind
    pub kind: ErrorKind,
    /// Human-readable message from the peer or the bridge itself
    pub message: String,
    /// Structured details carried by the underlying status
    pub details: Vec<ErrorDetail>,
}

impl BridgeError {
    /// Create an error with no structured details
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Failed to establish or borrow a transport connection
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Map a peer status into the taxonomy, extracting its details
    pub fn from_status(status: tonic::Status) -> Self {
        let mut details = Vec::new();

        if let Some(bad_request) = status.get_details_bad_request() {
            details.push(ErrorDetail::BadRequest {
                field_violations: bad_request
                    .field_violations
                    .into_iter()
                    .map(|v| (v.field, v.description))
                    .collect(),
            });
        }
        if let Some(info) = status.get_details_request_info() {
            details.push(ErrorDetail::RequestInfo {
                request_id: info.request_id,
                serving_data: info.serving_data,
            });
        }
        if let Some(info) = status.get_details_error_info() {
            details.push(ErrorDetail::ErrorInfo {
                reason: info.reason,
                domain: info.domain,
                metadata: info.metadata.into_iter().collect(),
            });
        }
        if let Some(failure) = status.get_details_precondition_failure() {
            details.push(ErrorDetail::PreconditionFailure {
                violations: failure
                    .violations
                    .into_iter()
                    .map(|v| (v.r#type, v.subject, v.description))
                    .collect(),
            });
        }
        if let Some(failure) = status.get_details_quota_failure() {
            details.push(ErrorDetail::QuotaFailure {
                violations: failure
                    .violations
                    .into_iter()
                    .map(|v| (v.subject, v.description))
                    .collect(),
            });
        }

        Self {
            kind: ErrorKind::from(status.code()),
            message: status.message().to_string(),
            details,
        }
    }
}

impl From<tonic::Status> for BridgeError {
    fn from(status: tonic::Status) -> Self {
        Self::from_status(status)
    }
}

impl From<tonic::transport::Error> for BridgeError {
    fn from(err: tonic::transport::Error) -> Self {
        Self::new(ErrorKind::Unavailable, err.to_string())
    }
}

impl From<BridgeError> for tonic::Status {
    fn from(err: BridgeError) -> Self {
        tonic::Status::new(err.kind.into(), err.message)
    }
}

/// Errors returned synchronously by the service discovery registry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No service with the requested id
    #[error("service not found")]
    NotFound,

    /// Registration rejected, the message names the missing field
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Registry used before `start` or after `stop`
    #[error("registry not initialized")]
    NotInitialized,
}

impl From<RegistryError> for BridgeError {
    fn from(err: RegistryError) -> Self {
        let kind = match err {
            RegistryError::NotFound => ErrorKind::NotFound,
            RegistryError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            RegistryError::NotInitialized => ErrorKind::FailedPrecondition,
        };
        BridgeError::new(kind, err.to_string())
    }
}

impl From<RegistryError> for tonic::Status {
    fn from(err: RegistryError) -> Self {
        BridgeError::from(err).into()
    }
}
