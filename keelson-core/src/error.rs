//! Error taxonomy for the messaging core.
//!
//! Every fallible operation in the workspace returns [`KeelsonResult`].
//! Variants are grouped by where they originate: pipe capacity, wire
//! framing, endpoint handling, and the underlying transport. Helper
//! predicates classify errors the way callers react to them, so retry
//! loops never match on variants directly.

use thiserror::Error;

/// Unified error type for keelson crates.
#[derive(Error, Debug)]
pub enum KeelsonError {
    /// The outbound pipe is at its high-water mark.
    #[error("pipe is full (high-water mark reached)")]
    PipeFull,

    /// The inbound pipe has no flushed message available.
    #[error("pipe is empty")]
    PipeEmpty,

    /// The peer endpoint has terminated the pipe.
    #[error("pipe terminated by peer")]
    PipeTerminated,

    /// A wire frame violated the framing protocol.
    #[error("malformed frame: {0}")]
    Framing(String),

    /// A frame exceeded the configured maximum message size.
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge { size: u64, max: u64 },

    /// The endpoint string could not be parsed.
    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),

    /// No in-process listener is bound at the target address.
    #[error("no listener at inproc address `{0}`")]
    AddressNotFound(String),

    /// An in-process address is already bound.
    #[error("inproc address `{0}` already in use")]
    AddressInUse(String),

    /// The connection to the peer was lost.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The operation ran past its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The component has shut down and accepts no further commands.
    #[error("component is terminating")]
    Terminating,

    /// Underlying socket or reactor I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeelsonError {
    /// True for transient conditions the caller may retry after backing
    /// off (full/empty pipes, timeouts).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            KeelsonError::PipeFull | KeelsonError::PipeEmpty | KeelsonError::Timeout
        )
    }

    /// True when the session should tear the engine down and (for
    /// connecters) schedule a reconnect.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            KeelsonError::ConnectionLost(_)
            | KeelsonError::Framing(_)
            | KeelsonError::FrameTooLarge { .. } => true,
            KeelsonError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// True once the peer or the local runtime has begun shutdown.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            KeelsonError::PipeTerminated | KeelsonError::Terminating
        )
    }
}

/// Convenience alias used across the workspace.
pub type KeelsonResult<T> = Result<T, KeelsonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(KeelsonError::PipeFull.is_recoverable());
        assert!(KeelsonError::PipeEmpty.is_recoverable());
        assert!(!KeelsonError::PipeTerminated.is_recoverable());
        assert!(KeelsonError::PipeTerminated.is_terminal());

        assert!(KeelsonError::ConnectionLost("reset".into()).is_connection_fatal());
        assert!(KeelsonError::Framing("bad flags".into()).is_connection_fatal());
        assert!(!KeelsonError::PipeFull.is_connection_fatal());
    }

    #[test]
    fn io_kinds() {
        let refused = KeelsonError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(refused.is_connection_fatal());

        let perm = KeelsonError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!perm.is_connection_fatal());
    }
}
