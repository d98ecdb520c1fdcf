//! Error types for socialgraph

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("Store error: {0}")]
    Store(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Shard range mismatch: stored {stored}, configured {configured}")]
    RangeMismatch { stored: String, configured: String },

    // === Participant Errors ===
    #[error("Nodes {node1} and {node2} are outside shard range {range}")]
    OutOfRange {
        node1: i64,
        node2: i64,
        range: String,
    },

    #[error("Timed out waiting for shard lock (txn {0})")]
    LockTimeout(String),

    // === 2PC Errors ===
    #[error("Prepare failed on {shard}: {reason}")]
    PrepareFailed { shard: String, reason: String },

    #[error("Commit failed on {shard}: {reason}")]
    CommitFailed { shard: String, reason: String },

    // === Consensus Errors ===
    #[error("Not leader: current leader is {0}")]
    NotLeader(String),

    // === Network Errors ===
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::NotLeader(_)
                | Error::LockTimeout(_)
        )
    }

    /// Transport-level failures leave the remote side in an unknown state.
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::Grpc(_)
        )
    }

    /// Convert to gRPC status for RPC responses
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            Error::NotLeader(leader) => {
                let mut status = tonic::Status::new(Code::FailedPrecondition, self.to_string());
                if let Ok(value) = leader.parse() {
                    status.metadata_mut().insert("leader", value);
                }
                status
            }
            Error::OutOfRange { .. } | Error::InvalidConfig(_) => {
                tonic::Status::new(Code::InvalidArgument, self.to_string())
            }
            Error::Timeout(_) | Error::LockTimeout(_) => {
                tonic::Status::new(Code::DeadlineExceeded, self.to_string())
            }
            Error::ConnectionFailed(_) => tonic::Status::new(Code::Unavailable, self.to_string()),
            Error::Grpc(status) => status.clone(),
            _ => tonic::Status::new(Code::Internal, self.to_string()),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Corrupted(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Corrupted(e.to_string())
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        Error::ConnectionFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::NotLeader("coord-2".into()).is_retryable());
        assert!(Error::Timeout("prepare".into()).is_retryable());
        assert!(!Error::Store("disk full".into()).is_retryable());
    }

    #[test]
    fn test_not_leader_status_carries_hint() {
        let status = Error::NotLeader("coord-2".into()).to_grpc_status();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        assert_eq!(status.metadata().get("leader").unwrap(), "coord-2");
    }
}
