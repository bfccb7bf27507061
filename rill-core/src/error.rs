//! The error taxonomy shared by callers and handlers.
use tonic::{Code, Status};

/// Type alias for the standard boxed error used in generic bounds.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything that can go wrong with a call, classified.
///
/// Handler-level validation errors (`InvalidArgument`, `EmptyAggregation`)
/// become the single terminal outcome of their call and are never retried.
/// `Cancelled` and `DeadlineExceeded` short-circuit every pending send and
/// receive on the affected call.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// A request message failed handler-level validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A client-streaming aggregate was half-closed after zero inputs.
    #[error("empty aggregation: {0}")]
    EmptyAggregation(String),
    /// A send or receive was attempted in a state that forbids it.
    #[error("invalid call state: {0}")]
    InvalidCallState(&'static str),
    #[error("call cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// Transport-level failure, not otherwise classified.
    #[error("channel error: {0}")]
    Channel(#[source] BoxError),
    /// The callee answered with a status this taxonomy does not cover.
    #[error("rpc failed: {0}")]
    Remote(Status),
}

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::InvalidArgument => RpcError::InvalidArgument(status.message().to_string()),
            Code::FailedPrecondition => RpcError::EmptyAggregation(status.message().to_string()),
            Code::Cancelled => RpcError::Cancelled,
            Code::DeadlineExceeded => RpcError::DeadlineExceeded,
            _ => RpcError::Remote(status),
        }
    }
}

impl From<RpcError> for Status {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::InvalidArgument(msg) => Status::invalid_argument(msg),
            RpcError::EmptyAggregation(msg) => Status::failed_precondition(msg),
            RpcError::InvalidCallState(msg) => Status::internal(msg),
            RpcError::Cancelled => Status::cancelled("call cancelled"),
            RpcError::DeadlineExceeded => Status::deadline_exceeded("deadline exceeded"),
            RpcError::Channel(e) => Status::unavailable(e.to_string()),
            RpcError::Remote(status) => status,
        }
    }
}
