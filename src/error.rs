//! Error types for streamline.

use thiserror::Error;

/// Result type alias using streamline's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A blocking operation reached its deadline before making progress.
    /// Recoverable: the caller may retry.
    #[error("operation timed out")]
    Timeout,

    /// The buffer or port was aborted. Level-triggered: stays in force for
    /// current and future callers until the instance is reset.
    #[error("operation aborted")]
    Aborted,

    /// End of stream. The producer marked completion and no data remains.
    /// Expected during normal shutdown, not a failure.
    #[error("end of stream")]
    Done,

    /// A processing stage rejected or could not transform its input.
    #[error("processing failed: {0}")]
    Process(String),

    /// The operation is not implemented by the active port variant.
    #[error("{op} is not supported by a {variant} port")]
    Unsupported {
        /// The operation that was attempted.
        op: &'static str,
        /// The port variant it was attempted on.
        variant: &'static str,
    },

    /// A constructor or call was given an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not legal in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Name lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// I/O error, e.g. task spawn failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the signals a driver loop handles inline (`Timeout`,
    /// `Aborted`, `Done`) rather than treating as a processing failure.
    pub fn is_flow_control(&self) -> bool {
        matches!(self, Error::Timeout | Error::Aborted | Error::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(Error::Timeout.to_string(), "operation timed out");
        assert_eq!(Error::Done.to_string(), "end of stream");
        let e = Error::Unsupported {
            op: "read",
            variant: "callback",
        };
        assert_eq!(e.to_string(), "read is not supported by a callback port");
    }

    #[test]
    fn test_flow_control_classification() {
        assert!(Error::Timeout.is_flow_control());
        assert!(Error::Aborted.is_flow_control());
        assert!(Error::Done.is_flow_control());
        assert!(!Error::Process("x".into()).is_flow_control());
        assert!(!Error::InvalidArgument("x".into()).is_flow_control());
    }
}
