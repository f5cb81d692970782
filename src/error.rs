use thiserror::Error;

/// Convenient type alias for `Result<T, DmuxError>`.
pub type Result<T> = std::result::Result<T, DmuxError>;

/// Error types for the dmux library.
///
/// Errors are local to the operation that produced them: a failed `write`
/// or `consumer_since` never affects other consumers or other keys. The
/// only producer-to-all-consumers failure signal is `close_with_error`,
/// which every live and future consumer observes as a terminal
/// [`Aborted`](DmuxError::Aborted) packet instead of a hang.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DmuxError {
    #[error("stream is closed")]
    StreamClosed,

    #[error("sequence {requested} is not retained (oldest retained is {oldest})")]
    ReplayUnavailable { requested: u64, oldest: u64 },

    #[error("stream aborted: {0}")]
    Aborted(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DmuxError {
    /// Whether the caller can usefully retry the failed operation with
    /// different arguments. Terminal stream states are not retryable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DmuxError::ReplayUnavailable { .. } | DmuxError::Config(_) => true,
            DmuxError::StreamClosed | DmuxError::Aborted(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DmuxError::StreamClosed;
        assert_eq!(err.to_string(), "stream is closed");

        let err = DmuxError::ReplayUnavailable {
            requested: 3,
            oldest: 7,
        };
        assert_eq!(
            err.to_string(),
            "sequence 3 is not retained (oldest retained is 7)"
        );

        let err = DmuxError::Aborted("connection lost".to_string());
        assert_eq!(err.to_string(), "stream aborted: connection lost");

        let err = DmuxError::Config("invalid threshold".to_string());
        assert_eq!(err.to_string(), "configuration error: invalid threshold");
    }

    #[test]
    fn test_is_recoverable() {
        let err = DmuxError::ReplayUnavailable {
            requested: 0,
            oldest: 1,
        };
        assert!(err.is_recoverable());
        assert!(DmuxError::Config("bad".to_string()).is_recoverable());

        assert!(!DmuxError::StreamClosed.is_recoverable());
        assert!(!DmuxError::Aborted("gone".to_string()).is_recoverable());
    }
}
